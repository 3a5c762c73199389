//! Dynamic values passed between pipeline stages.

use std::{fmt, sync::Arc};

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn};
use serde_json::{Number, Value};
use thiserror::Error;

use crate::callback::CallbackError;

/// Value flowing through the pipeline.
///
/// Loaders produce one, transforms and the prediction callable consume and
/// return one, and [`crate::serialize`] turns the final one into JSON.
#[derive(Clone)]
pub enum Payload {
    /// A value the wire format can already represent.
    Json(Value),
    /// Dense n-dimensional array.
    Array(NdArray),
    /// Raw bytes, e.g. an uploaded or fetched image.
    Bytes(Vec<u8>),
    /// Ordered mapping; insertion order is kept.
    Map(Vec<(String, Payload)>),
    /// Ordered sequence.
    Seq(Vec<Payload>),
    /// Anything else. Serialized through its [`Opaque`] capabilities.
    Object(Arc<dyn Opaque>),
}

/// Capabilities an opaque value may expose to the serializer.
///
/// Both probes default to "not supported"; a value that supports neither is
/// rendered with its `Display` implementation.
pub trait Opaque: fmt::Debug + fmt::Display + Send + Sync {
    /// Plain ordered sequence form of the value, when it has one.
    fn to_sequence(&self) -> Option<Vec<Payload>> {
        None
    }

    /// Element-wise iteration. `Some(Err(_))` means the value claims to be
    /// iterable but producing the elements failed.
    fn elements(&self) -> Option<Result<Vec<Payload>, CallbackError>> {
        None
    }
}

impl Payload {
    /// Wrap raw bytes.
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Payload::Bytes(data.into())
    }

    /// Build an ordered mapping.
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Payload>,
    {
        Payload::Map(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    /// Wrap an opaque value.
    pub fn object(value: impl Opaque + 'static) -> Self {
        Payload::Object(Arc::new(value))
    }

    /// Short label used in error messages and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Json(_) => "json",
            Payload::Array(_) => "array",
            Payload::Bytes(_) => "bytes",
            Payload::Map(_) => "map",
            Payload::Seq(_) => "sequence",
            Payload::Object(_) => "object",
        }
    }

    pub fn as_array(&self) -> Option<&NdArray> {
        match self {
            Payload::Array(array) => Some(array),
            _ => None,
        }
    }

    /// Coerce the payload into the dense array container.
    ///
    /// Arrays pass through untouched. JSON values must form a rectangular nest
    /// of numbers or strings. Sequences are coerced element by element and
    /// stacked along a new leading axis, so float elements keep non-finite
    /// values. Opaque values are converted only when they expose a sequence
    /// form.
    pub fn into_array(self) -> Result<Payload, ArrayError> {
        self.into_ndarray().map(Payload::Array)
    }

    fn into_ndarray(self) -> Result<NdArray, ArrayError> {
        match self {
            Payload::Array(array) => Ok(array),
            Payload::Json(value) => NdArray::from_json(&value),
            Payload::Seq(items) => {
                let parts = items
                    .into_iter()
                    .map(Payload::into_ndarray)
                    .collect::<Result<Vec<_>, _>>()?;
                NdArray::stack(&parts)
            }
            Payload::Object(object) => match object.to_sequence() {
                Some(items) => Payload::Seq(items).into_ndarray(),
                None => Err(ArrayError::Unsupported("object")),
            },
            Payload::Bytes(_) => Err(ArrayError::Unsupported("bytes")),
            Payload::Map(_) => Err(ArrayError::Unsupported("map")),
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Payload::Array(array) => f.debug_tuple("Array").field(array).finish(),
            Payload::Bytes(bytes) => write!(f, "Bytes(<{} bytes>)", bytes.len()),
            Payload::Map(entries) => f
                .debug_map()
                .entries(entries.iter().map(|(key, value)| (key, value)))
                .finish(),
            Payload::Seq(items) => f.debug_list().entries(items).finish(),
            Payload::Object(object) => f.debug_tuple("Object").field(object).finish(),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Json(Value::String(value.to_owned()))
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Json(Value::String(value))
    }
}

impl From<NdArray> for Payload {
    fn from(array: NdArray) -> Self {
        Payload::Array(array)
    }
}

impl From<ArrayD<f64>> for Payload {
    fn from(array: ArrayD<f64>) -> Self {
        Payload::Array(NdArray::Float(array))
    }
}

impl From<ArrayD<i64>> for Payload {
    fn from(array: ArrayD<i64>) -> Self {
        Payload::Array(NdArray::Int(array))
    }
}

impl<T: Into<Payload>> FromIterator<T> for Payload {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Payload::Seq(iter.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Error)]
pub enum ArrayError {
    #[error("ragged nested sequence: expected length {expected} at depth {depth}, found {found}")]
    Ragged {
        depth: usize,
        expected: usize,
        found: usize,
    },
    #[error("inconsistent nesting at depth {depth}")]
    Nesting { depth: usize },
    #[error("unsupported array element {0}")]
    Element(String),
    #[error("cannot mix {0} and {1} elements in one array")]
    Mixed(&'static str, &'static str),
    #[error("cannot convert a {0} payload into an array")]
    Unsupported(&'static str),
    #[error("string arrays have no numeric form")]
    NotNumeric,
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

/// Dense array with a dynamic number of dimensions.
#[derive(Clone, Debug, PartialEq)]
pub enum NdArray {
    Float(ArrayD<f64>),
    Int(ArrayD<i64>),
    Str(ArrayD<String>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ElementKind {
    Int,
    Float,
    Str,
}

impl ElementKind {
    fn label(self) -> &'static str {
        match self {
            ElementKind::Int => "integer",
            ElementKind::Float => "float",
            ElementKind::Str => "string",
        }
    }
}

impl NdArray {
    pub fn shape(&self) -> &[usize] {
        match self {
            NdArray::Float(array) => array.shape(),
            NdArray::Int(array) => array.shape(),
            NdArray::Str(array) => array.shape(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Build an array from a rectangular nest of JSON arrays.
    ///
    /// All-integer (or boolean) leaves give an integer array, any float among
    /// the numbers promotes the whole array to floats, and all-string leaves
    /// give a string array. An empty array is a float array.
    pub fn from_json(value: &Value) -> Result<Self, ArrayError> {
        let shape = infer_shape(value);
        let mut leaves = Vec::new();
        collect_leaves(value, &shape, 0, &mut leaves)?;
        let dim = IxDyn(&shape);

        let array = match classify(&leaves)? {
            ElementKind::Int => {
                let data = leaves.iter().map(|leaf| int_leaf(leaf)).collect();
                NdArray::Int(ArrayD::from_shape_vec(dim, data)?)
            }
            ElementKind::Float => {
                let data = leaves.iter().map(|leaf| float_leaf(leaf)).collect();
                NdArray::Float(ArrayD::from_shape_vec(dim, data)?)
            }
            ElementKind::Str => {
                let data = leaves
                    .iter()
                    .map(|leaf| leaf.as_str().unwrap_or_default().to_owned())
                    .collect();
                NdArray::Str(ArrayD::from_shape_vec(dim, data)?)
            }
        };
        Ok(array)
    }

    /// Stack equally shaped arrays along a new leading axis. Integer parts
    /// are widened when any part is float; an empty list gives an empty
    /// float array.
    fn stack(parts: &[NdArray]) -> Result<Self, ArrayError> {
        let Some(first) = parts.first() else {
            return Ok(NdArray::Float(ArrayD::zeros(IxDyn(&[0]))));
        };
        let mut kind = first.element_kind();
        for part in &parts[1..] {
            kind = match (kind, part.element_kind()) {
                (current, next) if current == next => current,
                (ElementKind::Int | ElementKind::Float, ElementKind::Int | ElementKind::Float) => {
                    ElementKind::Float
                }
                (current, next) => return Err(ArrayError::Mixed(current.label(), next.label())),
            };
        }

        let stacked = match kind {
            ElementKind::Int => {
                let views: Vec<ArrayViewD<'_, i64>> = parts
                    .iter()
                    .filter_map(|part| match part {
                        NdArray::Int(array) => Some(array.view()),
                        _ => None,
                    })
                    .collect();
                NdArray::Int(ndarray::stack(Axis(0), &views)?)
            }
            ElementKind::Float => {
                let owned = parts
                    .iter()
                    .map(NdArray::to_f64)
                    .collect::<Result<Vec<_>, _>>()?;
                let views: Vec<ArrayViewD<'_, f64>> = owned.iter().map(|array| array.view()).collect();
                NdArray::Float(ndarray::stack(Axis(0), &views)?)
            }
            ElementKind::Str => {
                let views: Vec<ArrayViewD<'_, String>> = parts
                    .iter()
                    .filter_map(|part| match part {
                        NdArray::Str(array) => Some(array.view()),
                        _ => None,
                    })
                    .collect();
                NdArray::Str(ndarray::stack(Axis(0), &views)?)
            }
        };
        Ok(stacked)
    }

    fn element_kind(&self) -> ElementKind {
        match self {
            NdArray::Float(_) => ElementKind::Float,
            NdArray::Int(_) => ElementKind::Int,
            NdArray::Str(_) => ElementKind::Str,
        }
    }

    /// Float copy of a numeric array.
    pub fn to_f64(&self) -> Result<ArrayD<f64>, ArrayError> {
        match self {
            NdArray::Float(array) => Ok(array.clone()),
            NdArray::Int(array) => Ok(array.mapv(|value| value as f64)),
            NdArray::Str(_) => Err(ArrayError::NotNumeric),
        }
    }

    /// Nested sequence form: one [`Payload::Seq`] per axis with JSON scalars at
    /// the leaves. A 0-d array yields its scalar.
    pub fn to_sequence(&self) -> Payload {
        match self {
            NdArray::Float(array) => nest(array.view(), &float_scalar),
            NdArray::Int(array) => nest(array.view(), &|value: &i64| {
                Payload::Json(Value::from(*value))
            }),
            NdArray::Str(array) => nest(array.view(), &|value: &String| {
                Payload::Json(Value::String(value.clone()))
            }),
        }
    }
}

fn nest<T>(view: ArrayViewD<'_, T>, leaf: &dyn Fn(&T) -> Payload) -> Payload {
    if view.ndim() == 0 {
        return view
            .iter()
            .next()
            .map(leaf)
            .unwrap_or(Payload::Json(Value::Null));
    }
    Payload::Seq(view.outer_iter().map(|row| nest(row, leaf)).collect())
}

// Non-finite floats have no JSON number form and fall back to their string form.
fn float_scalar(value: &f64) -> Payload {
    match Number::from_f64(*value) {
        Some(number) => Payload::Json(Value::Number(number)),
        None => Payload::Json(Value::String(value.to_string())),
    }
}

fn infer_shape(value: &Value) -> Vec<usize> {
    let mut shape = Vec::new();
    let mut cursor = value;
    while let Value::Array(items) = cursor {
        shape.push(items.len());
        match items.first() {
            Some(first) => cursor = first,
            None => break,
        }
    }
    shape
}

fn collect_leaves<'a>(
    value: &'a Value,
    shape: &[usize],
    depth: usize,
    out: &mut Vec<&'a Value>,
) -> Result<(), ArrayError> {
    match (value, shape.get(depth)) {
        (Value::Array(items), Some(&expected)) => {
            if items.len() != expected {
                return Err(ArrayError::Ragged {
                    depth,
                    expected,
                    found: items.len(),
                });
            }
            for item in items {
                collect_leaves(item, shape, depth + 1, out)?;
            }
            Ok(())
        }
        (Value::Array(_), None) | (_, Some(_)) => Err(ArrayError::Nesting { depth }),
        (leaf, None) => {
            out.push(leaf);
            Ok(())
        }
    }
}

fn classify(leaves: &[&Value]) -> Result<ElementKind, ArrayError> {
    let mut kind: Option<ElementKind> = None;
    for leaf in leaves {
        let next = match leaf {
            Value::Number(number) if number.is_i64() => ElementKind::Int,
            Value::Number(_) => ElementKind::Float,
            Value::Bool(_) => ElementKind::Int,
            Value::String(_) => ElementKind::Str,
            other => return Err(ArrayError::Element(other.to_string())),
        };
        kind = Some(match (kind, next) {
            (None, next) => next,
            (Some(ElementKind::Int), ElementKind::Int) => ElementKind::Int,
            (
                Some(ElementKind::Int | ElementKind::Float),
                ElementKind::Int | ElementKind::Float,
            ) => ElementKind::Float,
            (Some(ElementKind::Str), ElementKind::Str) => ElementKind::Str,
            (Some(current), next) => return Err(ArrayError::Mixed(current.label(), next.label())),
        });
    }
    Ok(kind.unwrap_or(ElementKind::Float))
}

fn int_leaf(leaf: &Value) -> i64 {
    match leaf {
        Value::Bool(flag) => i64::from(*flag),
        Value::Number(number) => number.as_i64().unwrap_or_default(),
        _ => 0,
    }
}

fn float_leaf(leaf: &Value) -> f64 {
    match leaf {
        Value::Bool(flag) => f64::from(u8::from(*flag)),
        Value::Number(number) => number.as_f64().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use serde_json::json;

    #[test]
    fn integer_matrix_from_json() {
        let array = NdArray::from_json(&json!([[1, 2, 3], [4, 5, 6]])).unwrap();
        assert_eq!(array.shape(), &[2, 3]);
        assert_eq!(array, NdArray::Int(arr2(&[[1, 2, 3], [4, 5, 6]]).into_dyn()));
    }

    #[test]
    fn one_float_promotes_the_array() {
        let array = NdArray::from_json(&json!([[1, 2.5], [3, 4]])).unwrap();
        assert_eq!(
            array,
            NdArray::Float(arr2(&[[1.0, 2.5], [3.0, 4.0]]).into_dyn())
        );
    }

    #[test]
    fn scalar_is_zero_dimensional() {
        let array = NdArray::from_json(&json!(7)).unwrap();
        assert_eq!(array.ndim(), 0);
    }

    #[test]
    fn empty_rows_keep_their_shape() {
        let array = NdArray::from_json(&json!([[], []])).unwrap();
        assert_eq!(array.shape(), &[2, 0]);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = NdArray::from_json(&json!([[1, 2], [3]])).unwrap_err();
        assert!(matches!(
            err,
            ArrayError::Ragged {
                depth: 1,
                expected: 2,
                found: 1
            }
        ));
    }

    #[test]
    fn scalar_where_row_expected_is_rejected() {
        let err = NdArray::from_json(&json!([[1, 2], 3])).unwrap_err();
        assert!(matches!(err, ArrayError::Nesting { depth: 1 }));
    }

    #[test]
    fn strings_and_numbers_do_not_mix() {
        let err = NdArray::from_json(&json!([1, "a"])).unwrap_err();
        assert!(matches!(err, ArrayError::Mixed("integer", "string")));
    }

    #[test]
    fn null_elements_are_rejected() {
        let err = NdArray::from_json(&json!([1, null])).unwrap_err();
        assert!(matches!(err, ArrayError::Element(_)));
    }

    #[test]
    fn bytes_cannot_become_an_array() {
        let err = Payload::bytes(vec![1, 2, 3]).into_array().unwrap_err();
        assert!(matches!(err, ArrayError::Unsupported("bytes")));
    }

    #[test]
    fn sequence_payload_becomes_an_array() {
        let payload: Payload = vec![json!([1.0, 2.0]), json!([3.0, 4.0])]
            .into_iter()
            .collect();
        let array = payload.into_array().unwrap();
        assert_eq!(array.as_array().map(NdArray::shape), Some(&[2, 2][..]));
    }

    #[test]
    fn sequence_keeps_non_finite_floats() {
        let payload: Payload = vec![
            Payload::from(ndarray::arr1(&[f64::NAN, 1.0]).into_dyn()),
            Payload::from(ndarray::arr1(&[f64::INFINITY, 2.0]).into_dyn()),
        ]
        .into_iter()
        .collect();
        let Some(NdArray::Float(array)) = payload.into_array().unwrap().as_array().cloned() else {
            panic!("expected float array");
        };
        assert_eq!(array.shape(), &[2, 2]);
        assert!(array[&[0, 0][..]].is_nan());
        assert_eq!(array[&[1, 0][..]], f64::INFINITY);
    }

    #[test]
    fn sequence_of_ints_and_floats_widens() {
        let payload: Payload = vec![
            Payload::from(ndarray::arr1(&[1_i64, 2]).into_dyn()),
            Payload::from(json!([0.5, 1.5])),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            payload.into_array().unwrap().as_array(),
            Some(&NdArray::Float(arr2(&[[1.0, 2.0], [0.5, 1.5]]).into_dyn()))
        );
    }

    #[test]
    fn sequence_with_unequal_elements_is_rejected() {
        let payload: Payload = vec![json!([1, 2]), json!([3])].into_iter().collect();
        assert!(matches!(payload.into_array(), Err(ArrayError::Shape(_))));
    }

    #[test]
    fn sequence_of_strings_and_numbers_is_rejected() {
        let payload: Payload = vec![json!("a"), json!(1)].into_iter().collect();
        assert!(matches!(payload.into_array(), Err(ArrayError::Mixed(_, _))));
    }

    #[test]
    fn int_array_widens_to_float() {
        let array = NdArray::Int(arr2(&[[1, 2]]).into_dyn());
        assert_eq!(array.to_f64().unwrap(), arr2(&[[1.0, 2.0]]).into_dyn());
        let strings = NdArray::from_json(&json!(["a"])).unwrap();
        assert!(matches!(strings.to_f64(), Err(ArrayError::NotNumeric)));
    }
}
