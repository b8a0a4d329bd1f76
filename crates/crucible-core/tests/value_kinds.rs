use crucible_core::{Complex, Kind, Value};

#[test]
fn numeric_kinds_widen_along_the_lattice() {
    assert_eq!(Kind::unify(Kind::Int, Kind::Int), Kind::Int);
    assert_eq!(Kind::unify(Kind::Int, Kind::Float), Kind::Float);
    assert_eq!(Kind::unify(Kind::Float, Kind::Int), Kind::Float);
    assert_eq!(Kind::unify(Kind::Int, Kind::Complex), Kind::Complex);
    assert_eq!(Kind::unify(Kind::Float, Kind::Complex), Kind::Complex);
}

#[test]
fn disjoint_kinds_fall_back_to_text() {
    assert_eq!(Kind::unify(Kind::Bool, Kind::Int), Kind::Text);
    assert_eq!(Kind::unify(Kind::Text, Kind::Float), Kind::Text);
    assert_eq!(Kind::unify(Kind::Bool, Kind::Text), Kind::Text);
    assert_eq!(Kind::unify(Kind::IntArray, Kind::Int), Kind::Text);
}

#[test]
fn array_kinds_unify_elementwise() {
    assert_eq!(Kind::unify(Kind::IntArray, Kind::FloatArray), Kind::FloatArray);
    assert_eq!(Kind::unify(Kind::FloatArray, Kind::ComplexArray), Kind::ComplexArray);
    assert_eq!(Kind::unify(Kind::BoolArray, Kind::IntArray), Kind::TextArray);
}

#[test]
fn zero_values_match_their_kinds() {
    assert_eq!(Kind::Int.zero(), Value::Int(0));
    assert_eq!(Kind::Float.zero(), Value::Float(0.0));
    assert_eq!(Kind::Complex.zero(), Value::Complex(Complex::new(0.0, 0.0)));
    assert_eq!(Kind::Bool.zero(), Value::Bool(false));
    assert_eq!(Kind::Text.zero(), Value::Text(String::new()));
    assert_eq!(Kind::FloatArray.zero(), Value::FloatArray(Vec::new()));
}

#[test]
fn coercion_widens_numbers_and_renders_text() {
    assert_eq!(Value::Int(3).coerce(Kind::Float), Value::Float(3.0));
    assert_eq!(
        Value::Float(2.5).coerce(Kind::Complex),
        Value::Complex(Complex::new(2.5, 0.0))
    );
    assert_eq!(Value::Int(7).coerce(Kind::Text), Value::Text("7".to_string()));
    assert_eq!(Value::Bool(true).coerce(Kind::Text), Value::Text("true".to_string()));
    assert_eq!(
        Value::IntArray(vec![1, 2]).coerce(Kind::FloatArray),
        Value::FloatArray(vec![1.0, 2.0])
    );
}

#[test]
fn json_numbers_parse_as_int_or_float() {
    let int = Value::from_json(&serde_json::json!(42)).expect("int");
    assert_eq!(int, Value::Int(42));
    let float = Value::from_json(&serde_json::json!(42.5)).expect("float");
    assert_eq!(float, Value::Float(42.5));
}

#[test]
fn complex_objects_parse_and_other_objects_are_rejected() {
    let complex = Value::from_json(&serde_json::json!({"re": 1.0, "im": -2.0})).expect("complex");
    assert_eq!(complex, Value::Complex(Complex::new(1.0, -2.0)));
    assert!(Value::from_json(&serde_json::json!({"a": 1})).is_err());
    assert!(Value::from_json(&serde_json::Value::Null).is_err());
}

#[test]
fn arrays_unify_their_elements_and_reject_nesting() {
    let mixed = Value::from_json(&serde_json::json!([1, 2.5])).expect("mixed numeric");
    assert_eq!(mixed, Value::FloatArray(vec![1.0, 2.5]));
    let empty = Value::from_json(&serde_json::json!([])).expect("empty");
    assert_eq!(empty, Value::IntArray(Vec::new()));
    assert!(Value::from_json(&serde_json::json!([[1, 2], [3, 4]])).is_err());
}

#[test]
fn strings_are_scalars_not_arrays() {
    let value = Value::from_json(&serde_json::json!("hello")).expect("text");
    assert_eq!(value.kind(), Kind::Text);
    assert_eq!(value.array_len(), None);
}
