use std::collections::BTreeSet;

use anyhow::bail;

use crucible_core::{fields, Params, Value};
use crucible_lab::{AsLab, Experiment, ParallelLab, Yield};
use crucible_store::Notebook;

#[derive(Debug, Clone)]
struct Square;

impl Experiment for Square {
    fn perform(&mut self, params: &mut Params) -> anyhow::Result<Yield> {
        let n = params.get("n").and_then(Value::as_i64).unwrap_or(0);
        Ok(Yield::Single(fields([("sq", n * n)])))
    }
}

#[test]
fn the_pool_covers_every_point() {
    let mut lab = ParallelLab::with_cores(Notebook::new("nb", ""), 4);
    lab.as_lab_mut()
        .set_range("n", (0..40).map(Value::Int).collect());
    lab.run_experiment(&Square).expect("run");

    let records = lab.notebook().current().records();
    assert_eq!(records.len(), 40);
    let mut seen = BTreeSet::new();
    for record in &records {
        assert!(record.success());
        let n = record.parameters.get("n").and_then(Value::as_i64).expect("n");
        let sq = record.results.get("sq").and_then(Value::as_i64).expect("sq");
        assert_eq!(sq, n * n);
        seen.insert(n);
    }
    assert_eq!(seen.len(), 40);
}

/// Fails on multiples of three.
#[derive(Debug, Clone)]
struct Fussy;

impl Experiment for Fussy {
    fn perform(&mut self, params: &mut Params) -> anyhow::Result<Yield> {
        let n = params.get("n").and_then(Value::as_i64).unwrap_or(0);
        if n % 3 == 0 {
            bail!("refusing {n}");
        }
        Ok(Yield::Single(fields([("n_out", n)])))
    }
}

#[test]
fn failures_do_not_halt_the_pool() {
    let mut lab = ParallelLab::with_cores(Notebook::new("nb", ""), 3);
    lab.as_lab_mut()
        .set_range("n", (0..30).map(Value::Int).collect());
    lab.run_experiment(&Fussy).expect("run");

    let records = lab.notebook().current().records();
    assert_eq!(records.len(), 30);
    let failures = records.iter().filter(|r| !r.success()).count();
    assert_eq!(failures, 10);
}

#[test]
fn worker_counts_are_capped_and_at_least_one() {
    let lab = ParallelLab::with_cores(Notebook::new("nb", ""), 0);
    assert_eq!(lab.cores(), 1);
    let lab = ParallelLab::with_cores(Notebook::new("nb", ""), 10_000);
    assert!(lab.cores() <= std::thread::available_parallelism().map(usize::from).unwrap_or(1));
    let lab = ParallelLab::new(Notebook::new("nb", ""));
    assert!(lab.cores() >= 1);
}

/// Mutates its own state per run; the lab must never observe it.
#[derive(Debug, Clone)]
struct Hoarder {
    seen: Vec<i64>,
}

impl Experiment for Hoarder {
    fn perform(&mut self, params: &mut Params) -> anyhow::Result<Yield> {
        let n = params.get("n").and_then(Value::as_i64).unwrap_or(0);
        self.seen.push(n);
        Ok(Yield::Single(fields([("count", self.seen.len() as i64)])))
    }
}

#[test]
fn workers_share_no_state_with_the_caller() {
    let mut lab = ParallelLab::with_cores(Notebook::new("nb", ""), 4);
    lab.as_lab_mut()
        .set_range("n", (0..20).map(Value::Int).collect());
    let experiment = Hoarder { seen: Vec::new() };
    lab.run_experiment(&experiment).expect("run");

    // each task ran on its own clone, so every record saw exactly one point
    // and the caller's experiment saw none
    assert!(experiment.seen.is_empty());
    for record in lab.notebook().current().records() {
        assert_eq!(record.results.get("count"), Some(&Value::Int(1)));
    }
}
