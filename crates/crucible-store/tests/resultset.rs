use crucible_core::{fields, metadata_keys, CrucibleError, Kind, ResultRecord, Value};
use crucible_store::{ResultSet, CANCELLED_EXCEPTION};

fn success_record(x: i64, z: f64) -> ResultRecord {
    ResultRecord::new(
        fields([("x", x)]),
        fields([("z", z)]),
        fields([
            (metadata_keys::STATUS, Value::Bool(true)),
            (metadata_keys::EXCEPTION, Value::Text(String::new())),
        ]),
    )
}

#[test]
fn appended_records_come_back_intact() {
    let mut set = ResultSet::new("append");
    set.add_record(success_record(1, 0.5)).expect("add");
    let records = set.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].parameters.get("x"), Some(&Value::Int(1)));
    assert_eq!(records[0].results.get("z"), Some(&Value::Float(0.5)));
    assert!(records[0].success());
}

#[test]
fn schema_promotes_on_drift_and_flags_the_change() {
    let mut set = ResultSet::new("promotion");
    set.add_record(success_record(1, 0.5)).expect("add");
    set.clear_type_changed();

    // an int arriving in a float field widens nothing; a float arriving in an
    // int field promotes the whole column
    let drifted = ResultRecord::new(
        fields([("x", Value::Float(1.5))]),
        fields([("z", 2i64)]),
        fields([(metadata_keys::STATUS, true)]),
    );
    set.add_record(drifted).expect("add");
    assert!(set.is_type_changed());
    assert_eq!(set.schema().kind_of("x"), Some(Kind::Float));

    let records = set.records();
    assert_eq!(records[0].parameters.get("x"), Some(&Value::Float(1.0)));
    assert_eq!(records[1].results.get("z"), Some(&Value::Float(2.0)));
}

#[test]
fn conflicting_kinds_coerce_to_text() {
    let mut set = ResultSet::new("text fallback");
    set.add_record(success_record(1, 0.5)).expect("add");
    let clash = ResultRecord::new(
        fields([("x", Value::Bool(true))]),
        fields([("z", 1.0)]),
        fields([(metadata_keys::STATUS, true)]),
    );
    set.add_record(clash).expect("add");
    assert_eq!(set.schema().kind_of("x"), Some(Kind::Text));
    let records = set.records();
    assert_eq!(records[0].parameters.get("x"), Some(&Value::Text("1".to_string())));
    assert_eq!(records[1].parameters.get("x"), Some(&Value::Text("true".to_string())));
}

#[test]
fn new_fields_backfill_with_zero_values() {
    let mut set = ResultSet::new("backfill");
    set.add_record(success_record(1, 0.5)).expect("add");
    let wider = ResultRecord::new(
        fields([("x", 2i64)]),
        fields([("z", 1.0), ("extra", 9.0)]),
        fields([(metadata_keys::STATUS, true)]),
    );
    set.add_record(wider).expect("add");
    let records = set.records();
    assert_eq!(records[0].results.get("extra"), Some(&Value::Float(0.0)));
    assert_eq!(records[1].results.get("extra"), Some(&Value::Float(9.0)));
}

#[test]
fn failed_records_zero_their_results() {
    let mut set = ResultSet::new("failures");
    set.add_record(success_record(1, 0.5)).expect("add");
    let failed = ResultRecord::new(
        fields([("x", 2i64)]),
        fields([("z", 42.0)]),
        fields([
            (metadata_keys::STATUS, Value::Bool(false)),
            (metadata_keys::EXCEPTION, Value::Text("boom".to_string())),
        ]),
    );
    set.add_record(failed).expect("add");
    let records = set.records();
    assert_eq!(records[1].results.get("z"), Some(&Value::Float(0.0)));
    assert_eq!(
        records[1].metadata.get(metadata_keys::EXCEPTION),
        Some(&Value::Text("boom".to_string()))
    );
}

#[test]
fn locking_is_absorbing() {
    let mut set = ResultSet::new("locks");
    set.add_record(success_record(1, 0.5)).expect("add");
    set.add_pending(fields([("x", 2i64)]), "job-1").expect("pending");
    set.finish();
    assert!(set.is_locked());
    // the pending record became a synthetic failed record
    assert_eq!(set.number_of_pending(), 0);
    assert_eq!(set.number_of_results(), 2);
    let snapshot = set.records();
    assert_eq!(
        snapshot[1].metadata.get(metadata_keys::EXCEPTION),
        Some(&Value::Text(CANCELLED_EXCEPTION.to_string()))
    );

    // every further mutation is refused and the content is unchanged
    assert!(matches!(
        set.add_record(success_record(3, 1.0)),
        Err(CrucibleError::ResultSetLocked(_))
    ));
    assert!(matches!(
        set.add_pending(fields([("x", 4i64)]), "job-2"),
        Err(CrucibleError::ResultSetLocked(_))
    ));
    assert!(matches!(
        set.set_attribute("note", "nope"),
        Err(CrucibleError::ResultSetLocked(_))
    ));
    set.finish();
    assert_eq!(set.records(), snapshot);
}

#[test]
fn pending_records_resolve_into_real_ones() {
    let mut set = ResultSet::new("pending");
    set.add_pending(fields([("x", 1i64)]), "job-1").expect("pending");
    assert!(!set.ready());
    assert_eq!(set.ready_fraction(), 0.0);

    set.resolve_pending("job-1", [success_record(1, 0.5)]).expect("resolve");
    assert!(set.ready());
    assert_eq!(set.ready_fraction(), 1.0);
    assert_eq!(set.number_of_results(), 1);
    let records = set.records();
    assert_eq!(
        records[0].metadata.get(metadata_keys::JOB_ID),
        Some(&Value::Text("job-1".to_string()))
    );

    assert!(matches!(
        set.resolve_pending("job-1", [success_record(1, 0.5)]),
        Err(CrucibleError::PendingResult(_))
    ));
}

#[test]
fn duplicate_pending_job_ids_are_refused() {
    let mut set = ResultSet::new("dup");
    set.add_pending(fields([("x", 1i64)]), "job-1").expect("pending");
    assert!(matches!(
        set.add_pending(fields([("x", 2i64)]), "job-1"),
        Err(CrucibleError::PendingResult(_))
    ));
}

#[test]
fn ready_fraction_is_one_for_an_empty_set() {
    let set = ResultSet::new("empty");
    assert!(set.ready());
    assert_eq!(set.ready_fraction(), 1.0);
}

#[test]
fn parameter_ranges_and_combinations_deduplicate() {
    let mut set = ResultSet::new("ranges");
    for (x, y) in [(1, 10), (1, 20), (2, 10), (1, 10)] {
        let record = ResultRecord::new(
            fields([("x", x as i64), ("y", y as i64)]),
            fields([("z", 0.0)]),
            fields([(metadata_keys::STATUS, true)]),
        );
        set.add_record(record).expect("add");
    }
    assert_eq!(set.parameter_range("x"), vec![Value::Int(1), Value::Int(2)]);
    assert_eq!(set.parameter_range("y"), vec![Value::Int(10), Value::Int(20)]);
    assert_eq!(set.parameter_combinations().len(), 3);

    let matching = set.records_for(&fields([("x", 1i64)]));
    assert_eq!(matching.len(), 3);
}

#[test]
fn dirtiness_tracks_unsaved_changes() {
    let mut set = ResultSet::new("dirty");
    assert!(!set.is_dirty());
    set.add_record(success_record(1, 0.5)).expect("add");
    assert!(set.is_dirty());
    set.mark_clean();
    assert!(!set.is_dirty());
}
