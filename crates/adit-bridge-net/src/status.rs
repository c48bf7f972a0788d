//! ---
//! adit_section: "05-networking-external-interfaces"
//! adit_subsection: "module"
//! adit_type: "source"
//! adit_scope: "code"
//! adit_description: "Manager and Instance connectivity."
//! adit_version: "v0.0.0-prealpha"
//! adit_owner: "tbd"
//! ---
use std::time::Duration;

use serde_json::Value;

use crate::{NetError, Result};

/// Semantic tuple extracted from an Instance status payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceStatus {
    /// Raw status code reported by the Instance.
    pub status_code: i64,
    /// Whether the Instance considers itself the cluster primary.
    pub primary: bool,
}

/// Poll an Instance's HTTP status endpoint.
///
/// Instance builds disagree on the payload shape: older ones serve a flat
/// `{Status: N, Primary: bool}`, newer ones nest it as
/// `{Status: {Status: N, ...}, Primary: bool}`. Both decode to the same
/// semantic tuple here.
pub async fn fetch_instance_status(
    http: &reqwest::Client,
    host: &str,
    api_port: u16,
    timeout: Duration,
) -> Result<InstanceStatus> {
    let url = format!("http://{}:{}/status", host, api_port);
    let response = http
        .get(&url)
        .header(reqwest::header::ACCEPT, "application/json")
        .timeout(timeout)
        .send()
        .await
        .map_err(NetError::from_reqwest)?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(NetError::HttpStatus(status.as_u16()));
    }

    let value: Value = response
        .json()
        .await
        .map_err(|err| NetError::Decode(err.to_string()))?;
    decode_status(&value)
}

/// Decode either status payload shape into the semantic tuple.
pub(crate) fn decode_status(value: &Value) -> Result<InstanceStatus> {
    let primary = value
        .get("Primary")
        .and_then(Value::as_bool)
        .ok_or_else(|| NetError::Decode("missing Primary flag".to_owned()))?;

    let status_code = match value.get("Status") {
        Some(Value::Number(number)) => number
            .as_i64()
            .ok_or_else(|| NetError::Decode("non-integer Status".to_owned()))?,
        Some(Value::Object(nested)) => nested
            .get("Status")
            .and_then(Value::as_i64)
            .ok_or_else(|| NetError::Decode("nested Status missing inner code".to_owned()))?,
        _ => return Err(NetError::Decode("missing Status field".to_owned())),
    };

    Ok(InstanceStatus {
        status_code,
        primary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flat_shape_decodes() {
        let status = decode_status(&json!({"Status": 3, "Primary": true})).unwrap();
        assert_eq!(
            status,
            InstanceStatus {
                status_code: 3,
                primary: true
            }
        );
    }

    #[test]
    fn nested_shape_decodes() {
        let status = decode_status(&json!({
            "Status": {"Status": 2, "Uptime": 12345},
            "Primary": false
        }))
        .unwrap();
        assert_eq!(
            status,
            InstanceStatus {
                status_code: 2,
                primary: false
            }
        );
    }

    #[test]
    fn missing_primary_is_a_decode_error() {
        let err = decode_status(&json!({"Status": 3})).unwrap_err();
        assert!(matches!(err, NetError::Decode(_)));
    }

    #[test]
    fn string_status_is_a_decode_error() {
        let err = decode_status(&json!({"Status": "up", "Primary": true})).unwrap_err();
        assert!(matches!(err, NetError::Decode(_)));
    }
}
