// Response decoding shared by the session and the API dispatcher.
//
// Every exchange with the cloud yields a status plus a JSON payload; bodies
// that are not JSON are carried as a JSON string so callers can still show
// them.

use reqwest::{Response, StatusCode};
use serde_json::Value;

use crate::error::Result;

pub const DEFAULT_BASE_URL: &str = "https://lion.lamarzocco.io/api/customer-app";

/// Read the whole body and decode it into a payload.
///
/// Failing to read the body counts as a transport failure.
pub(crate) async fn read_payload(response: Response) -> Result<(StatusCode, Value)> {
    let status = response.status();
    let text = response.text().await?;
    Ok((status, parse_payload(&text)))
}

pub(crate) fn parse_payload(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
