//! Result/error envelope applied to every delivered value.

use serde::Serialize;

use crate::errors::ErrorBody;

/// One wire event: `{"result": value}` or `{"error": body}`, never both.
#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Envelope<'a, T: ?Sized> {
    /// Successful value.
    Result(&'a T),
    /// Application error.
    Error(&'a ErrorBody),
}

impl<T: Serialize + ?Sized> Envelope<'_, T> {
    /// Serialize to compact JSON bytes.
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Wrap already-serialized JSON in a result envelope without re-parsing it.
///
/// `json` must be a complete JSON value, as produced by `serde_json::to_vec`.
pub fn raw_result(json: &[u8]) -> Vec<u8> {
    const PREFIX: &[u8] = br#"{"result":"#;
    let mut out = Vec::with_capacity(PREFIX.len() + json.len() + 1);
    out.extend_from_slice(PREFIX);
    out.extend_from_slice(json);
    out.push(b'}');
    out
}

/// Serialize an error envelope. Falls back to a fixed internal error if the
/// body's details cannot be encoded.
pub fn error_bytes(body: &ErrorBody) -> Vec<u8> {
    Envelope::<()>::Error(body).to_vec().unwrap_or_else(|e| {
        tracing::error!(code = %body.code, error = %e, "failed to encode error envelope");
        br#"{"error":{"code":"INTERNAL_ERROR","message":"error encoding failed","details":{}}}"#
            .to_vec()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn result_envelope_shape() {
        let value = json!({"n": 1});
        let bytes = Envelope::Result(&value).to_vec().unwrap();
        assert_eq!(bytes, br#"{"result":{"n":1}}"#);
    }

    #[test]
    fn error_envelope_shape() {
        let body = ErrorBody::new("NOPE", "denied");
        let bytes = error_bytes(&body);
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["error"]["code"], "NOPE");
        assert_eq!(parsed["error"]["message"], "denied");
        assert_eq!(parsed["error"]["details"], json!({}));
        assert!(parsed.get("result").is_none());
    }

    #[test]
    fn raw_result_wraps_without_reencoding() {
        let bytes = raw_result(br#"[1,2,3]"#);
        assert_eq!(bytes, br#"{"result":[1,2,3]}"#);
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["result"][2], 3);
    }

    #[test]
    fn scalar_result() {
        let bytes = Envelope::Result(&42u32).to_vec().unwrap();
        assert_eq!(bytes, br#"{"result":42}"#);
    }
}
