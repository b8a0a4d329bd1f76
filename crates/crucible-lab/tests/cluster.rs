use std::time::Duration;

use crucible_core::{fields, metadata_keys, CrucibleError, Params, Value};
use crucible_lab::{AsLab, ClusterLab, Experiment, LocalFarm, RetryPolicy, Yield};
use crucible_store::Notebook;
use tempfile::tempdir;

#[derive(Debug, Clone)]
struct Square;

impl Experiment for Square {
    fn perform(&mut self, params: &mut Params) -> anyhow::Result<Yield> {
        let n = params.get("n").and_then(Value::as_i64).unwrap_or(0);
        Ok(Yield::Single(fields([("sq", n * n)])))
    }
}

fn fast_retries() -> RetryPolicy {
    RetryPolicy {
        attempts: 1,
        base_delay: Duration::from_millis(1),
    }
}

#[test]
fn submission_returns_immediately_with_pending_records() {
    let farm = LocalFarm::new(4);
    let mut lab = ClusterLab::new(Notebook::new("nb", ""), Box::new(farm.clone()));
    lab.as_lab_mut().set_range("n", (0..10).map(Value::Int).collect());

    let submitted = lab.run_experiment(&Square).expect("submit");
    assert_eq!(submitted, 10);
    assert_eq!(lab.notebook().current().number_of_pending(), 10);
    assert_eq!(lab.notebook().current().number_of_results(), 0);
    assert_eq!(farm.queued(), 10);

    let resolved = lab.update_results().expect("update");
    assert_eq!(resolved, 10);
    assert!(lab.ready().expect("ready"));
    let records = lab.notebook().current().records();
    assert_eq!(records.len(), 10);
    for record in &records {
        assert!(record.success());
        let n = record.parameters.get("n").and_then(Value::as_i64).expect("n");
        assert_eq!(record.results.get("sq"), Some(&Value::Int(n * n)));
        assert!(record.metadata.contains_key(metadata_keys::JOB_ID));
    }
}

#[test]
fn completions_land_in_their_submit_time_set() {
    let farm = LocalFarm::new(2);
    let mut lab = ClusterLab::new(Notebook::new("nb", ""), Box::new(farm));
    lab.as_lab_mut()
        .notebook_mut()
        .add_result_set("alpha", "submitted here")
        .expect("add set");
    lab.as_lab_mut().set_range("n", (0..5).map(Value::Int).collect());
    lab.run_experiment(&Square).expect("submit");

    // switch the current set before the results arrive
    lab.notebook_mut().select(crucible_store::DEFAULT_TAG).expect("select");
    lab.update_results().expect("update");

    let alpha = lab.notebook().result_set("alpha").expect("alpha");
    assert_eq!(alpha.number_of_results(), 5);
    assert_eq!(alpha.number_of_pending(), 0);
    assert_eq!(
        lab.notebook().result_set(crucible_store::DEFAULT_TAG).expect("default").number_of_results(),
        0
    );
}

#[test]
fn ready_fraction_grows_monotonically() {
    let farm = LocalFarm::new(2);
    farm.set_drain_limit(Some(10));
    let mut lab = ClusterLab::new(Notebook::new("nb", ""), Box::new(farm));
    lab.as_lab_mut().set_range("n", (0..30).map(Value::Int).collect());
    lab.run_experiment(&Square).expect("submit");

    let mut fractions = vec![lab.notebook().current().ready_fraction()];
    loop {
        lab.update_results().expect("update");
        fractions.push(lab.notebook().current().ready_fraction());
        if lab.notebook().current().ready() {
            break;
        }
    }
    assert_eq!(fractions.first(), Some(&0.0));
    assert_eq!(fractions.last(), Some(&1.0));
    assert!(fractions.windows(2).all(|w| w[0] <= w[1]), "fractions {fractions:?}");
    assert_eq!(fractions.len(), 4);
}

#[test]
fn wait_blocks_until_ready_and_respects_the_timeout() {
    let farm = LocalFarm::new(2);
    let mut lab = ClusterLab::new(Notebook::new("nb", ""), Box::new(farm.clone()))
        .with_wait_interval(Duration::from_millis(5));
    lab.as_lab_mut().set_range("n", (0..4).map(Value::Int).collect());
    lab.run_experiment(&Square).expect("submit");
    assert!(lab.wait(Some(Duration::from_secs(5))).expect("wait"));

    // nothing pending: an immediate true
    assert!(lab.wait(Some(Duration::from_millis(1))).expect("wait"));

    // a farm that never completes: the timeout expires
    farm.set_drain_limit(Some(0));
    lab.as_lab_mut().set_range("n", vec![Value::Int(99)]);
    lab.run_experiment(&Square).expect("submit");
    assert!(!lab.wait(Some(Duration::from_millis(20))).expect("wait"));
}

#[test]
fn cancellation_is_best_effort_and_idempotent() {
    let farm = LocalFarm::new(2);
    let mut lab = ClusterLab::new(Notebook::new("nb", ""), Box::new(farm.clone()));
    lab.as_lab_mut().set_range("n", (0..3).map(Value::Int).collect());
    lab.run_experiment(&Square).expect("submit");

    let job_id = lab.notebook().pending_job_ids()[0].clone();
    assert!(lab.cancel_pending(&job_id).expect("cancel"));
    assert_eq!(farm.queued(), 2);
    assert_eq!(lab.notebook().current().number_of_pending(), 2);

    // the synthetic cancelled record preserves the audit trail
    let records = lab.notebook().current().records();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success());

    // a second cancellation of the same job is a no-op
    assert!(!lab.cancel_pending(&job_id).expect("cancel again"));
}

#[test]
fn transient_errors_exhaust_the_retry_budget_as_dispatch() {
    let farm = LocalFarm::new(2);
    farm.set_connected(false);
    let mut lab = ClusterLab::new(Notebook::new("nb", ""), Box::new(farm))
        .with_retry_policy(fast_retries());
    lab.as_lab_mut().set_range("n", (0..3).map(Value::Int).collect());
    let err = lab.run_experiment(&Square).expect_err("disconnected");
    assert!(matches!(err, CrucibleError::Dispatch(_)));
}

#[test]
fn engine_counts_come_from_the_farm() {
    let farm = LocalFarm::new(7);
    let mut lab = ClusterLab::new(Notebook::new("nb", ""), Box::new(farm));
    assert_eq!(lab.engine_count().expect("engines"), 7);
    lab.imports(&["math".to_string()]).expect("imports");
}

#[test]
fn disconnected_operation_loses_no_tasks() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("cluster.json");
    let farm = LocalFarm::new(8);

    // submit 300 tasks, then drop the connection immediately
    let notebook = Notebook::json(&path, true).expect("create");
    let mut lab = ClusterLab::new(notebook, Box::new(farm.clone()));
    lab.as_lab_mut().set_range("n", (0..300).map(Value::Int).collect());
    let submitted = lab.run_experiment(&Square).expect("submit");
    assert_eq!(submitted, 300);
    farm.set_connected(false);
    drop(lab.into_parts());

    // reopen the notebook from disk: all 300 pending records restored
    let notebook = Notebook::json(&path, false).expect("reload");
    assert_eq!(notebook.current().number_of_pending(), 300);
    let records_before = notebook.current().number_of_results();

    // reconnect and drain in batches until ready
    farm.set_connected(true);
    farm.set_drain_limit(Some(64));
    let mut lab = ClusterLab::new(notebook, Box::new(farm.clone()))
        .with_wait_interval(Duration::from_millis(1));
    while !lab.ready().expect("ready") {}

    let records_after = lab.notebook().current().number_of_results();
    assert_eq!(records_after - records_before, 300);
    assert_eq!(lab.notebook().current().number_of_pending(), 0);
    assert_eq!(farm.queued(), 0);

    // and the drained state survives on disk
    drop(lab.into_parts());
    let reloaded = Notebook::json(&path, false).expect("reload again");
    assert_eq!(reloaded.current().number_of_results(), 300);
    assert!(reloaded.current().ready());
}
