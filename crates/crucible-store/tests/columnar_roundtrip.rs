use crucible_core::{fields, metadata_keys, Complex, CrucibleError, Kind, ResultRecord, Value};
use crucible_store::Notebook;
use tempfile::tempdir;

fn mixed_record(x: i64, label: &str) -> ResultRecord {
    ResultRecord::new(
        fields([("x", Value::Int(x)), ("label", Value::Text(label.to_string()))]),
        fields([
            ("z", Value::Float(x as f64 / 2.0)),
            ("ok", Value::Bool(x % 2 == 0)),
            ("amp", Value::Complex(Complex::new(x as f64, -0.5))),
            ("trace", Value::FloatArray(vec![0.1 * x as f64, 0.2 * x as f64])),
        ]),
        fields([
            (metadata_keys::STATUS, Value::Bool(true)),
            (metadata_keys::EXCEPTION, Value::Text(String::new())),
            (
                metadata_keys::START_TIME,
                Value::Text("2024-05-01T10:00:00+00:00".to_string()),
            ),
            (
                metadata_keys::END_TIME,
                Value::Text("2024-05-01T10:00:05+00:00".to_string()),
            ),
        ]),
    )
}

#[test]
fn two_sets_with_mixed_records_roundtrip() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("nb.sqlite");

    let mut notebook = Notebook::columnar(&path, true).expect("create");
    notebook.set_description("columnar round trip").expect("describe");
    notebook.add_result_set("first", "first family").expect("add");
    notebook.add_result(mixed_record(1, "one")).expect("add");
    notebook.add_result(mixed_record(2, "two")).expect("add");
    notebook.add_result_set("second", "second family").expect("add");
    notebook.add_result(mixed_record(3, "three")).expect("add");
    notebook.select("first").expect("select");
    notebook.commit().expect("commit");

    let reloaded = Notebook::columnar(&path, false).expect("reload");
    assert_eq!(reloaded.description(), "columnar round trip");
    assert_eq!(reloaded.current_tag(), "first");
    assert_eq!(reloaded.tags(), notebook.tags());

    for tag in ["first", "second"] {
        let original = notebook.result_set(tag).expect("set");
        let restored = reloaded.result_set(tag).expect("set");
        assert_eq!(restored.description(), original.description());
        assert_eq!(restored.records(), original.records(), "records for {tag}");
        assert_eq!(
            restored.schema().kind_of("trace"),
            Some(Kind::FloatArray),
            "schema for {tag}"
        );
        assert_eq!(restored.schema().kind_of("ok"), Some(Kind::Bool));
        assert_eq!(restored.schema().kind_of("amp"), Some(Kind::Complex));
        assert_eq!(restored.schema().kind_of("label"), Some(Kind::Text));
    }
}

#[test]
fn timestamps_survive_the_native_time_columns() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("nb.sqlite");

    let mut notebook = Notebook::columnar(&path, true).expect("create");
    notebook.add_result(mixed_record(1, "one")).expect("add");
    notebook.commit().expect("commit");

    let reloaded = Notebook::columnar(&path, false).expect("reload");
    let record = &reloaded.current().records()[0];
    let start = record
        .metadata
        .get(metadata_keys::START_TIME)
        .and_then(Value::as_text)
        .expect("start time");
    assert_eq!(
        chrono::DateTime::parse_from_rfc3339(start)
            .expect("parse")
            .timestamp(),
        chrono::DateTime::parse_from_rfc3339("2024-05-01T10:00:00+00:00")
            .expect("parse")
            .timestamp()
    );
}

#[test]
fn the_pending_dataset_exists_only_while_pending() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("nb.sqlite");

    let mut notebook = Notebook::columnar(&path, true).expect("create");
    notebook.add_result(mixed_record(1, "one")).expect("add");
    notebook
        .add_pending_with_id(
            fields([("x", Value::Int(9)), ("label", Value::Text("nine".to_string()))]),
            "job-9",
        )
        .expect("pending");
    notebook.commit().expect("commit");

    let table_count = |name: &str| -> i64 {
        let conn = rusqlite::Connection::open(&path).expect("open");
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )
        .expect("query")
    };
    assert_eq!(table_count("pending_0"), 1);

    let mut reloaded = Notebook::columnar(&path, false).expect("reload");
    assert_eq!(reloaded.current().pending_job_ids(), vec!["job-9".to_string()]);
    reloaded
        .resolve_pending("job-9", [mixed_record(9, "nine")])
        .expect("resolve");
    reloaded.commit().expect("commit");
    assert_eq!(table_count("pending_0"), 0);
}

#[test]
fn locked_sets_stay_locked_on_reload() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("nb.sqlite");

    let mut notebook = Notebook::columnar(&path, true).expect("create");
    notebook.add_result(mixed_record(1, "one")).expect("add");
    notebook.current_mut().finish();
    notebook.commit().expect("commit");

    let mut reloaded = Notebook::columnar(&path, false).expect("reload");
    assert!(reloaded.current().is_locked());
    assert!(matches!(
        reloaded.add_result(mixed_record(2, "two")),
        Err(CrucibleError::ResultSetLocked(_))
    ));
}

#[test]
fn backfilled_array_fields_stay_empty_through_a_commit() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("nb.sqlite");

    // the first record never carried the array field; the second widens the
    // schema with a three-element trace
    let mut notebook = Notebook::columnar(&path, true).expect("create");
    let mut bare = mixed_record(1, "one");
    bare.results.remove("trace");
    notebook.add_result(bare).expect("add");
    let mut full = mixed_record(2, "two");
    full.results
        .insert("trace".to_string(), Value::FloatArray(vec![1.0, 2.0, 3.0]));
    notebook.add_result(full).expect("add");

    let in_memory = notebook.current().records();
    assert_eq!(in_memory[0].results.get("trace"), Some(&Value::FloatArray(Vec::new())));

    notebook.commit().expect("commit");
    let reloaded = Notebook::columnar(&path, false).expect("reload");
    let records = reloaded.current().records();
    // the backfilled cell must come back empty, not widened to the column
    // length with manufactured zeros
    assert_eq!(records[0].results.get("trace"), Some(&Value::FloatArray(Vec::new())));
    assert_eq!(
        records[1].results.get("trace"),
        Some(&Value::FloatArray(vec![1.0, 2.0, 3.0]))
    );
    assert_eq!(records, in_memory);
}

#[test]
fn ragged_array_columns_are_rejected_at_write() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("nb.sqlite");

    let mut notebook = Notebook::columnar(&path, true).expect("create");
    notebook.add_result(mixed_record(1, "one")).expect("add");
    let mut ragged = mixed_record(2, "two");
    ragged
        .results
        .insert("trace".to_string(), Value::FloatArray(vec![1.0, 2.0, 3.0]));
    notebook.add_result(ragged).expect("add");
    assert!(matches!(
        notebook.commit(),
        Err(CrucibleError::ResultsStructure(_))
    ));
}

#[test]
fn numeric_widths_fit_observed_values_with_overrides() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("nb.sqlite");

    let mut notebook = Notebook::columnar(&path, true).expect("create");
    notebook.add_result(mixed_record(3, "small")).expect("add");
    notebook.current_mut().set_column_width("x", 8);
    notebook.commit().expect("commit");

    let conn = rusqlite::Connection::open(&path).expect("open");
    let sql: String = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE name = 'results_0'",
            [],
            |row| row.get(0),
        )
        .expect("table sql");
    assert!(sql.contains("\"x\" INT8"), "declared type in {sql}");

    let reloaded = Notebook::columnar(&path, false).expect("reload");
    assert_eq!(reloaded.current().width_overrides().get("x"), Some(&8));
}
