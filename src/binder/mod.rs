//! Argument binding - request body to handler arguments.
//!
//! Every handler declares an ordered list of [`ParamSpec`]s. [`bind`] turns a
//! raw body into a [`BoundArgs`] aligned with that list:
//!
//! - Scalar kinds read the field named after the parameter when the body is a
//!   JSON object, or the whole body when it is a bare scalar (`5`, `"abc"`, `true`).
//!   A value that does not convert leaves the slot empty.
//! - [`ParamKind::Composite`] takes the whole body; malformed JSON is an error.
//! - An empty body leaves every slot empty.
//!
//! Slots stay positional: a skipped parameter never shifts the ones after it.
//!
//! # Example
//!
//! ```
//! use queuerpc::binder::{bind, ArgValue, ParamKind, ParamSpec};
//!
//! let params = [ParamSpec::new("x", ParamKind::I32), ParamSpec::new("y", ParamKind::String)];
//! let args = bind(br#"{"x": 5, "y": "a"}"#, &params).unwrap();
//!
//! assert_eq!(args.present(), vec![&ArgValue::Int(5), &ArgValue::String("a".into())]);
//! ```

mod convert;
mod extract;

use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, RpcError};

pub use extract::{Enum, FromArg, FromArgs, SymbolicEnum};

/// Declared type of a handler parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Bool,
    Char,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    String,
    DateTime,
    Uuid,
    /// Enumeration, matched case-insensitively against these names.
    Enum(&'static [&'static str]),
    /// Anything else: the whole body is deserialized.
    Composite,
}

impl ParamKind {
    /// Whether values of this kind are converted individually.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, ParamKind::Composite)
    }
}

/// A declared parameter: name and kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

impl fmt::Display for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:?}", self.name, self.kind)
    }
}

/// A converted argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Bool(bool),
    Char(char),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    DateTime(DateTime<FixedOffset>),
    Uuid(Uuid),
    /// Index into the declared variant names.
    Enum(usize),
    Composite(Value),
}

/// One bound slot.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundArg {
    pub name: String,
    pub value: Option<ArgValue>,
}

/// Arguments bound for one invocation, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundArgs {
    slots: Vec<BoundArg>,
}

impl BoundArgs {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
        }
    }

    fn push(&mut self, name: &str, value: Option<ArgValue>) {
        self.slots.push(BoundArg {
            name: name.to_string(),
            value,
        });
    }

    /// Number of declared slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Value bound for a parameter name.
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.slots
            .iter()
            .find(|slot| slot.name == name)
            .and_then(|slot| slot.value.as_ref())
    }

    /// Values that were produced, in declaration order.
    pub fn present(&self) -> Vec<&ArgValue> {
        self.slots.iter().filter_map(|s| s.value.as_ref()).collect()
    }

    pub fn slots(&self) -> &[BoundArg] {
        &self.slots
    }
}

impl IntoIterator for BoundArgs {
    type Item = BoundArg;
    type IntoIter = std::vec::IntoIter<BoundArg>;

    fn into_iter(self) -> Self::IntoIter {
        self.slots.into_iter()
    }
}

/// Bind a request body to the declared parameters.
///
/// # Errors
///
/// Returns [`RpcError::Binding`] when a composite parameter is declared and the
/// body is not valid JSON. Scalar conversion failures are never errors.
pub fn bind(body: &[u8], params: &[ParamSpec]) -> Result<BoundArgs> {
    let mut bound = BoundArgs::with_capacity(params.len());

    if body.is_empty() {
        for param in params {
            bound.push(&param.name, None);
        }
        return Ok(bound);
    }

    let parsed = serde_json::from_slice::<Value>(body);

    for param in params {
        let value = match (&param.kind, &parsed) {
            (ParamKind::Composite, Ok(Value::Null)) => None,
            (ParamKind::Composite, Ok(root)) => Some(ArgValue::Composite(root.clone())),
            (ParamKind::Composite, Err(e)) => return Err(RpcError::binding(&param.name, e)),
            (kind, Ok(root)) => bind_scalar(&param.name, *kind, root),
            (_, Err(e)) => {
                tracing::debug!(
                    parameter = %param.name,
                    error = %e,
                    "Body is not JSON, skipping parameter"
                );
                None
            }
        };
        bound.push(&param.name, value);
    }

    Ok(bound)
}

fn bind_scalar(name: &str, kind: ParamKind, root: &Value) -> Option<ArgValue> {
    let source = match root {
        Value::Object(fields) => fields.get(name)?,
        Value::String(_) | Value::Number(_) | Value::Bool(_) => root,
        Value::Null | Value::Array(_) => return None,
    };

    let text = convert::scalar_text(source)?;
    match convert::convert(kind, &text) {
        Ok(value) => Some(value),
        Err(reason) => {
            tracing::debug!(
                parameter = name,
                %reason,
                "Skipping parameter that failed conversion"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(name: &str, kind: ParamKind) -> ParamSpec {
        ParamSpec::new(name, kind)
    }

    #[test]
    fn test_bare_scalar_body() {
        let args = bind(b"5", &[spec("x", ParamKind::I32)]).unwrap();
        assert_eq!(args.present(), vec![&ArgValue::Int(5)]);
    }

    #[test]
    fn test_quoted_scalar_body() {
        let args = bind(br#""5""#, &[spec("x", ParamKind::I32)]).unwrap();
        assert_eq!(args.present(), vec![&ArgValue::Int(5)]);
    }

    #[test]
    fn test_named_fields() {
        let params = [spec("x", ParamKind::I32), spec("y", ParamKind::String)];
        let args = bind(br#"{"x": 5, "y": "a"}"#, &params).unwrap();
        assert_eq!(
            args.present(),
            vec![&ArgValue::Int(5), &ArgValue::String("a".into())]
        );
    }

    #[test]
    fn test_field_names_are_case_sensitive() {
        let args = bind(br#"{"X": 5}"#, &[spec("x", ParamKind::I32)]).unwrap();
        assert!(args.present().is_empty());
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn test_empty_body_binds_nothing() {
        let params = [spec("x", ParamKind::I32), spec("o", ParamKind::Composite)];
        let args = bind(b"", &params).unwrap();
        assert_eq!(args.len(), 2);
        assert!(args.present().is_empty());
    }

    #[test]
    fn test_no_params_ignores_body() {
        let args = bind(b"{definitely not json", &[]).unwrap();
        assert!(args.is_empty());
    }

    #[test]
    fn test_skipped_parameter_keeps_position() {
        let params = [spec("x", ParamKind::I32), spec("y", ParamKind::String)];
        let args = bind(br#"{"x": "five", "y": "a"}"#, &params).unwrap();

        assert_eq!(args.slots()[0].value, None);
        assert_eq!(args.slots()[1].value, Some(ArgValue::String("a".into())));
        assert_eq!(args.get("y"), Some(&ArgValue::String("a".into())));
    }

    #[test]
    fn test_invalid_json_skips_scalars() {
        let args = bind(b"{oops", &[spec("x", ParamKind::I32)]).unwrap();
        assert!(args.present().is_empty());
    }

    #[test]
    fn test_invalid_json_fails_composite() {
        let params = [spec("order", ParamKind::Composite)];
        let err = bind(b"{oops", &params).unwrap_err();
        assert!(matches!(err, RpcError::Binding { ref parameter, .. } if parameter == "order"));
    }

    #[test]
    fn test_composite_takes_whole_body() {
        let body = br#"{"id": 3, "lines": [1, 2]}"#;
        let args = bind(body, &[spec("order", ParamKind::Composite)]).unwrap();
        assert_eq!(
            args.present(),
            vec![&ArgValue::Composite(json!({"id": 3, "lines": [1, 2]}))]
        );
    }

    #[test]
    fn test_mixed_scalar_and_composite() {
        let params = [
            spec("id", ParamKind::I64),
            spec("order", ParamKind::Composite),
        ];
        let args = bind(br#"{"id": 3}"#, &params).unwrap();
        assert_eq!(args.get("id"), Some(&ArgValue::Int(3)));
        assert_eq!(
            args.get("order"),
            Some(&ArgValue::Composite(json!({"id": 3})))
        );
    }

    #[test]
    fn test_null_field_is_absent() {
        let params = [spec("x", ParamKind::String)];
        let args = bind(br#"{"x": null}"#, &params).unwrap();
        assert!(args.present().is_empty());
    }

    #[test]
    fn test_array_root_binds_no_scalar() {
        let args = bind(b"[1, 2]", &[spec("x", ParamKind::I32)]).unwrap();
        assert!(args.present().is_empty());
    }

    #[test]
    fn test_enum_case_insensitive() {
        const LEVELS: &[&str] = &["Low", "Medium", "High"];
        let params = [spec("level", ParamKind::Enum(LEVELS))];

        let args = bind(br#"{"level": "hIgH"}"#, &params).unwrap();
        assert_eq!(args.present(), vec![&ArgValue::Enum(2)]);

        let args = bind(br#""medium""#, &params).unwrap();
        assert_eq!(args.present(), vec![&ArgValue::Enum(1)]);
    }

    #[test]
    fn test_string_param_from_number_field() {
        let params = [spec("code", ParamKind::String)];
        let args = bind(br#"{"code": 42}"#, &params).unwrap();
        assert_eq!(args.present(), vec![&ArgValue::String("42".into())]);
    }
}
