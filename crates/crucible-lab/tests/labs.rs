use std::collections::BTreeSet;

use crucible_core::{fields, CrucibleError, ErrorInfo, Params, Value};
use crucible_lab::{
    linspace, AsLab, CreateOptions, Experiment, Lab, PointwiseDesign, Runner, Yield,
};
use crucible_store::Notebook;

#[derive(Debug, Clone)]
struct CurveExperiment;

impl Experiment for CurveExperiment {
    fn perform(&mut self, params: &mut Params) -> anyhow::Result<Yield> {
        let x = params.get("x").and_then(Value::as_f64).unwrap_or(0.0);
        let y = params.get("y").and_then(Value::as_f64).unwrap_or(0.0);
        Ok(Yield::Single(fields([("z", (x * x + y * y).sqrt().sin())])))
    }
}

#[test]
fn a_factorial_sweep_covers_every_point_exactly_once() {
    use std::f64::consts::PI;

    let mut lab = Lab::new(Notebook::new("nb", ""));
    lab.set_range("x", linspace(-2.0 * PI, 2.0 * PI, 50));
    lab.set_range("y", linspace(-2.0 * PI, 2.0 * PI, 50));
    let mut runner = Runner::new(CurveExperiment);
    lab.run_experiment(&mut runner).expect("run");

    let records = lab.notebook().current().records();
    assert_eq!(records.len(), 2500);
    let mut seen = BTreeSet::new();
    for record in &records {
        assert!(record.success());
        let x = record.parameters.get("x").and_then(Value::as_f64).expect("x");
        let y = record.parameters.get("y").and_then(Value::as_f64).expect("y");
        assert!(seen.insert((x.to_bits(), y.to_bits())), "duplicate point {x},{y}");
    }
    assert_eq!(seen.len(), 2500);
}

#[test]
fn sequential_runs_preserve_design_order() {
    let mut lab = Lab::new(Notebook::new("nb", ""));
    lab.set_range("a", vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    let mut runner = Runner::new(CurveExperiment);
    lab.run_experiment(&mut runner).expect("run");

    let order: Vec<i64> = lab
        .notebook()
        .current()
        .records()
        .iter()
        .map(|r| r.parameters.get("a").and_then(Value::as_i64).expect("a"))
        .collect();
    assert_eq!(order, vec![1, 2, 3]);
}

#[test]
fn a_pointwise_sweep_zips_ranges_and_broadcasts_constants() {
    let mut lab = Lab::with_design(Notebook::new("nb", ""), Box::new(PointwiseDesign));
    lab.set_range("a", (1..=100).map(Value::Int).collect());
    lab.set_range("b", (100..=199).map(Value::Int).collect());
    lab.set_value("c", 4i64);
    let mut runner = Runner::new(CurveExperiment);
    lab.run_experiment(&mut runner).expect("run");

    let records = lab.notebook().current().records();
    assert_eq!(records.len(), 100);
    for record in &records {
        let a = record.parameters.get("a").and_then(Value::as_i64).expect("a");
        let b = record.parameters.get("b").and_then(Value::as_i64).expect("b");
        let c = record.parameters.get("c").and_then(Value::as_i64).expect("c");
        assert_eq!(b - a, 99);
        assert_eq!(c, 4);
    }
}

#[test]
fn empty_ranges_produce_no_records() {
    let mut lab = Lab::new(Notebook::new("nb", ""));
    let mut runner = Runner::new(CurveExperiment);
    lab.run_experiment(&mut runner).expect("run");
    assert_eq!(lab.notebook().current().number_of_results(), 0);

    lab.set_range("x", Vec::new());
    lab.run_experiment(&mut runner).expect("run");
    assert_eq!(lab.notebook().current().number_of_results(), 0);
}

#[test]
fn a_single_point_range_yields_exactly_one_record() {
    let mut lab = Lab::new(Notebook::new("nb", ""));
    lab.set_value("x", 0.0);
    lab.set_value("y", 0.0);
    let mut runner = Runner::new(CurveExperiment);
    lab.run_experiment(&mut runner).expect("run");
    assert_eq!(lab.notebook().current().number_of_results(), 1);
}

#[test]
fn create_with_computes_once_and_reuses_after() {
    let mut lab = Lab::new(Notebook::new("nb", ""));
    lab.set_value("unrelated", 1i64);

    let computed = lab
        .create_with("surface", "the surface", CreateOptions::default(), |lab| {
            lab.set_range("x", linspace(0.0, 1.0, 3));
            lab.set_range("y", linspace(0.0, 1.0, 3));
            let mut runner = Runner::new(CurveExperiment);
            lab.run_experiment(&mut runner)
        })
        .expect("create");
    assert!(computed);
    assert_eq!(lab.notebook().current_tag(), "surface");
    assert_eq!(lab.notebook().current().number_of_results(), 9);
    // ranges were reset before the constructor ran
    assert!(!lab.ranges().contains_key("unrelated"));
    // and the set was locked afterwards
    assert!(lab.notebook().current().is_locked());

    // the second invocation reuses the stored set
    let computed = lab
        .create_with("surface", "ignored", CreateOptions::default(), |_| {
            panic!("constructor must not run again")
        })
        .expect("reuse");
    assert!(!computed);
    assert_eq!(lab.notebook().current().number_of_results(), 9);
}

#[test]
fn create_with_deletes_the_partial_set_on_failure() {
    let mut lab = Lab::new(Notebook::new("nb", ""));
    let result = lab.create_with(
        "doomed",
        "will fail",
        CreateOptions::default(),
        |lab| {
            lab.set_value("x", 1i64);
            let mut runner = Runner::new(CurveExperiment);
            lab.run_experiment(&mut runner)?;
            Err(CrucibleError::Design(ErrorInfo::new(
                "ctor-failed",
                "constructor gave up",
            )))
        },
    );
    assert!(result.is_err());
    assert!(!lab.notebook().contains("doomed"));
}

#[test]
fn ranges_can_be_edited_and_cleared() {
    let mut lab = Lab::new(Notebook::new("nb", ""));
    lab.set_range("a", vec![Value::Int(1), Value::Int(2)]);
    lab.set_value("b", 3i64);
    assert_eq!(lab.parameter_names(), vec!["a", "b"]);
    assert_eq!(lab.experiments().expect("space").len(), 2);

    lab.del_range("a");
    assert_eq!(lab.experiments().expect("space").len(), 1);
    lab.clear_ranges();
    assert!(lab.experiments().expect("space").is_empty());
}
