//! Invocation outcomes and their wire form.
//!
//! [`RpcResult`] is what a caller receives: `{ok, value, error, message, statusCode}`
//! with absent fields omitted. [`Response`] is the encoded body published as the
//! reply. Handlers may return an [`RpcResult`] directly, or any [`IntoReply`]
//! value which gets wrapped in a success result.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::JsonCodec;
use crate::error::{Result, RpcError};

/// Status code attached to failures produced by the dispatch pipeline.
pub const INTERNAL_ERROR_STATUS: u16 = 500;

/// Outcome of an RPC invocation.
///
/// `ok == true` never carries `error` or `statusCode`; `ok == false` always
/// carries `error`. The constructors are the only way to build one, and
/// deserialization rejects input that breaks this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RpcResultRepr")]
pub struct RpcResult {
    ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status_code: Option<u16>,
}

impl RpcResult {
    /// Success carrying a value.
    ///
    /// ```
    /// use queuerpc::RpcResult;
    ///
    /// let result = RpcResult::ok(42);
    /// assert!(result.is_ok());
    /// assert_eq!(result.value(), Some(&serde_json::json!(42)));
    /// ```
    pub fn ok<T: Serialize>(value: T) -> Self {
        match serde_json::to_value(value) {
            Ok(Value::Null) => Self::ok_empty(),
            Ok(value) => Self::ok_value(value),
            Err(e) => Self::internal_error("Serialization", e.to_string()),
        }
    }

    /// Success without a value.
    pub fn ok_empty() -> Self {
        Self {
            ok: true,
            value: None,
            error: None,
            message: None,
            status_code: None,
        }
    }

    fn ok_value(value: Value) -> Self {
        Self {
            value: Some(value),
            ..Self::ok_empty()
        }
    }

    /// Failure with an error kind and message, without a status code.
    pub fn failure(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            value: None,
            error: Some(error.into()),
            message: Some(message.into()),
            status_code: None,
        }
    }

    /// Failure with an explicit status code.
    pub fn failure_with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status_code: u16,
    ) -> Self {
        Self {
            status_code: Some(status_code),
            ..Self::failure(error, message)
        }
    }

    /// Failure with status code 500, as produced by the dispatch pipeline.
    pub fn internal_error(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self::failure_with_status(error, message, INTERNAL_ERROR_STATUS)
    }

    /// Attach a message (allowed on success and failure).
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }
}

/// Unchecked wire form of [`RpcResult`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcResultRepr {
    ok: bool,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status_code: Option<u16>,
}

impl TryFrom<RpcResultRepr> for RpcResult {
    type Error = String;

    fn try_from(repr: RpcResultRepr) -> std::result::Result<Self, Self::Error> {
        if repr.ok && (repr.error.is_some() || repr.status_code.is_some()) {
            return Err("successful result carries error or statusCode".to_string());
        }
        if !repr.ok && repr.error.is_none() {
            return Err("failed result carries no error".to_string());
        }

        Ok(Self {
            ok: repr.ok,
            value: repr.value,
            error: repr.error,
            message: repr.message,
            status_code: repr.status_code,
        })
    }
}

impl From<&RpcError> for RpcResult {
    fn from(err: &RpcError) -> Self {
        RpcResult::internal_error(err.kind(), err.message())
    }
}

/// Encoded reply body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response(Bytes);

impl Response {
    /// Encode a result as JSON.
    pub fn encode(result: &RpcResult) -> Result<Self> {
        Ok(Self(Bytes::from(JsonCodec::encode(result)?)))
    }

    /// Reply body with no content.
    pub fn empty() -> Self {
        Self(Bytes::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Marks a handler argument or return value as a JSON composite.
///
/// As an argument, the whole request body is deserialized into `T`.
/// As a return value, `T` is serialized into the result's `value`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

/// Conversion from a handler's return value into an optional result.
///
/// `None` means the handler produced nothing to report.
pub trait IntoReply {
    fn into_reply(self) -> Result<Option<RpcResult>>;
}

impl IntoReply for RpcResult {
    fn into_reply(self) -> Result<Option<RpcResult>> {
        Ok(Some(self))
    }
}

impl IntoReply for () {
    fn into_reply(self) -> Result<Option<RpcResult>> {
        Ok(None)
    }
}

impl IntoReply for Value {
    fn into_reply(self) -> Result<Option<RpcResult>> {
        Ok(match self {
            Value::Null => None,
            value => Some(RpcResult::ok_value(value)),
        })
    }
}

impl<T: IntoReply> IntoReply for Option<T> {
    fn into_reply(self) -> Result<Option<RpcResult>> {
        match self {
            Some(inner) => inner.into_reply(),
            None => Ok(None),
        }
    }
}

impl<T: Serialize> IntoReply for Json<T> {
    fn into_reply(self) -> Result<Option<RpcResult>> {
        serde_json::to_value(self.0)?.into_reply()
    }
}

macro_rules! scalar_reply {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoReply for $ty {
                fn into_reply(self) -> Result<Option<RpcResult>> {
                    Ok(Some(RpcResult::ok_value(serde_json::to_value(self)?)))
                }
            }
        )*
    };
}

scalar_reply!(
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    f32,
    f64,
    String,
    &'static str,
    uuid::Uuid,
    chrono::DateTime<chrono::Utc>,
);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wire(result: &RpcResult) -> Value {
        let response = Response::encode(result).unwrap();
        serde_json::from_slice(response.as_bytes()).unwrap()
    }

    #[test]
    fn test_ok_omits_error_fields() {
        let body = wire(&RpcResult::ok("pong"));
        assert_eq!(body, json!({"ok": true, "value": "pong"}));
    }

    #[test]
    fn test_internal_error_shape() {
        let body = wire(&RpcResult::internal_error("DivideByZero", "b is zero"));
        assert_eq!(
            body,
            json!({"ok": false, "error": "DivideByZero", "message": "b is zero", "statusCode": 500})
        );
    }

    #[test]
    fn test_result_invariant_holds_for_constructors() {
        let all = [
            RpcResult::ok(1),
            RpcResult::ok_empty(),
            RpcResult::ok(json!({"a": 1})).with_message("done"),
            RpcResult::failure("NotFound", "no such user"),
            RpcResult::failure_with_status("Forbidden", "nope", 403),
            RpcResult::internal_error("Panic", "boom"),
        ];

        for result in &all {
            assert_eq!(!result.is_ok(), result.error().is_some());
            if result.is_ok() {
                assert!(result.status_code().is_none());
            }
        }
    }

    #[test]
    fn test_ok_null_is_empty() {
        assert_eq!(RpcResult::ok(Option::<i32>::None), RpcResult::ok_empty());
    }

    #[test]
    fn test_decode_reply_body() {
        let encoded = Response::encode(&RpcResult::ok(json!([1, 2]))).unwrap();
        let decoded: RpcResult = JsonCodec::decode(encoded.as_bytes()).unwrap();
        assert_eq!(decoded.value(), Some(&json!([1, 2])));
    }

    #[test]
    fn test_decode_rejects_inconsistent_results() {
        let invalid = [
            json!({"ok": true, "error": "Boom"}),
            json!({"ok": true, "value": 1, "statusCode": 200}),
            json!({"ok": false, "message": "no kind"}),
            json!({"ok": false, "statusCode": 500}),
        ];
        for body in invalid {
            assert!(
                serde_json::from_value::<RpcResult>(body.clone()).is_err(),
                "{} should not decode",
                body
            );
        }

        let body = json!({"ok": false, "error": "NotFound", "statusCode": 404});
        let failure: RpcResult = serde_json::from_value(body).unwrap();
        assert!(!failure.is_ok());
        assert_eq!(failure.error(), Some("NotFound"));
        assert_eq!(failure.message(), None);
        assert_eq!(failure.status_code(), Some(404));
    }

    #[test]
    fn test_into_reply_normalization() {
        assert_eq!(().into_reply().unwrap(), None);
        assert_eq!(Value::Null.into_reply().unwrap(), None);
        assert_eq!(Option::<i32>::None.into_reply().unwrap(), None);
        assert_eq!(5i32.into_reply().unwrap(), Some(RpcResult::ok(5)));

        let custom = RpcResult::failure("Conflict", "already exists");
        assert_eq!(custom.clone().into_reply().unwrap(), Some(custom));
    }

    #[test]
    fn test_json_wrapper_reply() {
        #[derive(Serialize)]
        struct Sum {
            total: i64,
        }

        let reply = Json(Sum { total: 3 }).into_reply().unwrap().unwrap();
        assert_eq!(reply.value(), Some(&json!({"total": 3})));
    }

    #[test]
    fn test_rpc_error_to_failure() {
        let err = RpcError::MissingArgument("x".to_string());
        let result = RpcResult::from(&err);
        assert_eq!(result.error(), Some("MissingArgument"));
        assert_eq!(result.status_code(), Some(500));
    }
}
