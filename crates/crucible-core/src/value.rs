//! Tagged values for parameters and results, and the kind lattice used for
//! schema inference.

use std::fmt::{self, Display};

use serde::de::Error as DeError;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A complex scalar carried as a pair of 64-bit floats.
///
/// Serialized as a two-field object `{"re": ..., "im": ...}` so that JSON
/// notebooks round-trip without a special encoding.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Complex {
    /// Real part.
    pub re: f64,
    /// Imaginary part.
    pub im: f64,
}

impl Complex {
    /// Creates a complex value from its real and imaginary parts.
    pub fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }
}

impl Display for Complex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.im < 0.0 {
            write!(f, "{}{}i", self.re, self.im)
        } else {
            write!(f, "{}+{}i", self.re, self.im)
        }
    }
}

impl From<f64> for Complex {
    fn from(re: f64) -> Self {
        Self { re, im: 0.0 }
    }
}

/// The kind of a [`Value`], forming the small closed lattice used for schema
/// promotion: `Int < Float < Complex`, with `Bool` and `Text` disjoint and
/// one array kind per scalar kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// 64-bit signed integer.
    Int,
    /// 64-bit float.
    Float,
    /// Complex number over 64-bit floats.
    Complex,
    /// Boolean.
    Bool,
    /// Text. Strings are scalar, never iterable.
    Text,
    /// One-dimensional array of integers.
    IntArray,
    /// One-dimensional array of floats.
    FloatArray,
    /// One-dimensional array of complex numbers.
    ComplexArray,
    /// One-dimensional array of booleans.
    BoolArray,
    /// One-dimensional array of text values.
    TextArray,
}

impl Kind {
    /// True for the array kinds.
    pub fn is_array(&self) -> bool {
        matches!(
            self,
            Kind::IntArray | Kind::FloatArray | Kind::ComplexArray | Kind::BoolArray | Kind::TextArray
        )
    }

    /// Returns the element kind of an array kind, or the kind itself for scalars.
    pub fn element(&self) -> Kind {
        match self {
            Kind::IntArray => Kind::Int,
            Kind::FloatArray => Kind::Float,
            Kind::ComplexArray => Kind::Complex,
            Kind::BoolArray => Kind::Bool,
            Kind::TextArray => Kind::Text,
            other => *other,
        }
    }

    /// Returns the array kind whose elements have the given scalar kind.
    pub fn array_of(element: Kind) -> Kind {
        match element.element() {
            Kind::Int => Kind::IntArray,
            Kind::Float => Kind::FloatArray,
            Kind::Complex => Kind::ComplexArray,
            Kind::Bool => Kind::BoolArray,
            _ => Kind::TextArray,
        }
    }

    /// Computes the join of two kinds under the promotion lattice.
    ///
    /// Numeric kinds widen (`Int < Float < Complex`), arrays join element-wise,
    /// and every other conflict falls back to text, the weakest kind that
    /// accepts both sides.
    pub fn unify(a: Kind, b: Kind) -> Kind {
        if a == b {
            return a;
        }
        match (a.is_array(), b.is_array()) {
            (false, false) => Self::unify_scalar(a, b),
            (true, true) => Kind::array_of(Self::unify_scalar(a.element(), b.element())),
            _ => Kind::Text,
        }
    }

    fn unify_scalar(a: Kind, b: Kind) -> Kind {
        use Kind::{Complex, Float, Int};
        match (a, b) {
            (Int, Float) | (Float, Int) => Float,
            (Int, Complex) | (Complex, Int) => Complex,
            (Float, Complex) | (Complex, Float) => Complex,
            _ => Kind::Text,
        }
    }

    /// Returns the zero value for this kind, used to backfill missing fields.
    pub fn zero(&self) -> Value {
        match self {
            Kind::Int => Value::Int(0),
            Kind::Float => Value::Float(0.0),
            Kind::Complex => Value::Complex(Complex::default()),
            Kind::Bool => Value::Bool(false),
            Kind::Text => Value::Text(String::new()),
            Kind::IntArray => Value::IntArray(Vec::new()),
            Kind::FloatArray => Value::FloatArray(Vec::new()),
            Kind::ComplexArray => Value::ComplexArray(Vec::new()),
            Kind::BoolArray => Value::BoolArray(Vec::new()),
            Kind::TextArray => Value::TextArray(Vec::new()),
        }
    }

    /// Stable textual name for persistence catalogs.
    pub fn name(&self) -> &'static str {
        match self {
            Kind::Int => "int",
            Kind::Float => "float",
            Kind::Complex => "complex",
            Kind::Bool => "bool",
            Kind::Text => "text",
            Kind::IntArray => "int_array",
            Kind::FloatArray => "float_array",
            Kind::ComplexArray => "complex_array",
            Kind::BoolArray => "bool_array",
            Kind::TextArray => "text_array",
        }
    }

    /// Parses a kind from its catalog name.
    pub fn from_name(name: &str) -> Option<Kind> {
        Some(match name {
            "int" => Kind::Int,
            "float" => Kind::Float,
            "complex" => Kind::Complex,
            "bool" => Kind::Bool,
            "text" => Kind::Text,
            "int_array" => Kind::IntArray,
            "float_array" => Kind::FloatArray,
            "complex_array" => Kind::ComplexArray,
            "bool_array" => Kind::BoolArray,
            "text_array" => Kind::TextArray,
            _ => return None,
        })
    }
}

/// A parameter or result value from the safe scalar/array set.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Complex number.
    Complex(Complex),
    /// Boolean.
    Bool(bool),
    /// Text.
    Text(String),
    /// One-dimensional integer array.
    IntArray(Vec<i64>),
    /// One-dimensional float array.
    FloatArray(Vec<f64>),
    /// One-dimensional complex array.
    ComplexArray(Vec<Complex>),
    /// One-dimensional boolean array.
    BoolArray(Vec<bool>),
    /// One-dimensional text array.
    TextArray(Vec<String>),
}

impl Value {
    /// Returns the kind of this value.
    pub fn kind(&self) -> Kind {
        match self {
            Value::Int(_) => Kind::Int,
            Value::Float(_) => Kind::Float,
            Value::Complex(_) => Kind::Complex,
            Value::Bool(_) => Kind::Bool,
            Value::Text(_) => Kind::Text,
            Value::IntArray(_) => Kind::IntArray,
            Value::FloatArray(_) => Kind::FloatArray,
            Value::ComplexArray(_) => Kind::ComplexArray,
            Value::BoolArray(_) => Kind::BoolArray,
            Value::TextArray(_) => Kind::TextArray,
        }
    }

    /// Coerces this value to the given kind.
    ///
    /// Identity when the kinds already match; numeric values widen; any value
    /// renders to text for the text kinds; arrays convert element-wise. A
    /// combination the lattice can never produce falls back to the target
    /// kind's zero.
    pub fn coerce(&self, kind: Kind) -> Value {
        if self.kind() == kind {
            return self.clone();
        }
        match (self, kind) {
            (Value::Int(v), Kind::Float) => Value::Float(*v as f64),
            (Value::Int(v), Kind::Complex) => Value::Complex(Complex::new(*v as f64, 0.0)),
            (Value::Float(v), Kind::Complex) => Value::Complex(Complex::new(*v, 0.0)),
            (value, Kind::Text) => Value::Text(value.to_string()),
            (Value::IntArray(vs), Kind::FloatArray) => {
                Value::FloatArray(vs.iter().map(|v| *v as f64).collect())
            }
            (Value::IntArray(vs), Kind::ComplexArray) => {
                Value::ComplexArray(vs.iter().map(|v| Complex::new(*v as f64, 0.0)).collect())
            }
            (Value::FloatArray(vs), Kind::ComplexArray) => {
                Value::ComplexArray(vs.iter().map(|v| Complex::new(*v, 0.0)).collect())
            }
            (Value::IntArray(vs), Kind::TextArray) => {
                Value::TextArray(vs.iter().map(|v| v.to_string()).collect())
            }
            (Value::FloatArray(vs), Kind::TextArray) => {
                Value::TextArray(vs.iter().map(|v| v.to_string()).collect())
            }
            (Value::ComplexArray(vs), Kind::TextArray) => {
                Value::TextArray(vs.iter().map(|v| v.to_string()).collect())
            }
            (Value::BoolArray(vs), Kind::TextArray) => {
                Value::TextArray(vs.iter().map(|v| v.to_string()).collect())
            }
            _ => kind.zero(),
        }
    }

    /// Returns the number of elements for array values, `None` for scalars.
    pub fn array_len(&self) -> Option<usize> {
        match self {
            Value::IntArray(vs) => Some(vs.len()),
            Value::FloatArray(vs) => Some(vs.len()),
            Value::ComplexArray(vs) => Some(vs.len()),
            Value::BoolArray(vs) => Some(vs.len()),
            Value::TextArray(vs) => Some(vs.len()),
            _ => None,
        }
    }

    /// The integer payload, if this is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The numeric payload widened to a float, if this is an integer or float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// The boolean payload, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// The text payload, if this is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Converts a JSON value into a typed value.
    ///
    /// Integral JSON numbers become `Int`, other numbers `Float`; an object
    /// with exactly the keys `re` and `im` becomes `Complex`; arrays must be
    /// one-dimensional with elements unifiable under the kind lattice.
    pub fn from_json(json: &serde_json::Value) -> Result<Value, String> {
        match json {
            serde_json::Value::Bool(v) => Ok(Value::Bool(*v)),
            serde_json::Value::String(v) => Ok(Value::Text(v.clone())),
            serde_json::Value::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Ok(Value::Int(v))
                } else if let Some(v) = n.as_f64() {
                    Ok(Value::Float(v))
                } else {
                    Err(format!("number {n} out of the 64-bit range"))
                }
            }
            serde_json::Value::Object(map) => {
                if map.len() == 2 {
                    if let (Some(re), Some(im)) = (map.get("re"), map.get("im")) {
                        if let (Some(re), Some(im)) = (re.as_f64(), im.as_f64()) {
                            return Ok(Value::Complex(Complex::new(re, im)));
                        }
                    }
                }
                Err("objects other than {re, im} are not in the safe value set".to_string())
            }
            serde_json::Value::Array(items) => {
                let mut elements = Vec::with_capacity(items.len());
                for item in items {
                    let element = Value::from_json(item)?;
                    if element.kind().is_array() {
                        return Err("arrays must be one-dimensional".to_string());
                    }
                    elements.push(element);
                }
                let element_kind = elements
                    .iter()
                    .map(Value::kind)
                    .reduce(Kind::unify)
                    .unwrap_or(Kind::Int);
                Ok(Value::collect_array(&elements, element_kind))
            }
            serde_json::Value::Null => Err("null is not in the safe value set".to_string()),
        }
    }

    fn collect_array(elements: &[Value], element_kind: Kind) -> Value {
        match element_kind {
            Kind::Int => Value::IntArray(
                elements.iter().map(|v| v.as_i64().unwrap_or(0)).collect(),
            ),
            Kind::Float => Value::FloatArray(
                elements.iter().map(|v| v.as_f64().unwrap_or(0.0)).collect(),
            ),
            Kind::Complex => Value::ComplexArray(
                elements
                    .iter()
                    .map(|v| match v.coerce(Kind::Complex) {
                        Value::Complex(c) => c,
                        _ => Complex::default(),
                    })
                    .collect(),
            ),
            Kind::Bool => Value::BoolArray(
                elements.iter().map(|v| v.as_bool().unwrap_or(false)).collect(),
            ),
            _ => Value::TextArray(elements.iter().map(|v| v.to_string()).collect()),
        }
    }

    /// Converts this value into its JSON representation.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Complex(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
            Value::IntArray(vs) => write_array(f, vs),
            Value::FloatArray(vs) => write_array(f, vs),
            Value::ComplexArray(vs) => write_array(f, vs),
            Value::BoolArray(vs) => write_array(f, vs),
            Value::TextArray(vs) => write_array(f, vs),
        }
    }
}

fn write_array<T: Display>(f: &mut fmt::Formatter<'_>, vs: &[T]) -> fmt::Result {
    write!(f, "[")?;
    for (idx, v) in vs.iter().enumerate() {
        if idx > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{v}")?;
    }
    write!(f, "]")
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Complex(v) => v.serialize(serializer),
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::Text(v) => serializer.serialize_str(v),
            Value::IntArray(vs) => serialize_seq(serializer, vs),
            Value::FloatArray(vs) => serialize_seq(serializer, vs),
            Value::ComplexArray(vs) => serialize_seq(serializer, vs),
            Value::BoolArray(vs) => serialize_seq(serializer, vs),
            Value::TextArray(vs) => serialize_seq(serializer, vs),
        }
    }
}

fn serialize_seq<S: Serializer, T: Serialize>(
    serializer: S,
    items: &[T],
) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(items.len()))?;
    for item in items {
        seq.serialize_element(item)?;
    }
    seq.end()
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Value::from_json(&json).map_err(D::Error::custom)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<Complex> for Value {
    fn from(v: Complex) -> Self {
        Value::Complex(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::IntArray(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::FloatArray(v)
    }
}

impl From<Vec<bool>> for Value {
    fn from(v: Vec<bool>) -> Self {
        Value::BoolArray(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::TextArray(v)
    }
}
