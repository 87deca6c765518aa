#![forbid(unsafe_code)]

use crate::error::{Error, Result};
use crate::rest::client::ManagementCaller;
use reqwest::Method;
use serde_json::Value as JsonValue;

/// Collects every item of a paginated management listing. Each page carries a
/// `value` array and, while more pages remain, an absolute `nextLink` which is
/// reduced to management-relative form before being re-issued. A non-2xx page
/// aborts the listing; no transport retry happens at this layer.
pub async fn list_all(caller: &dyn ManagementCaller, path: &str) -> Result<Vec<JsonValue>> {
    let mut items = Vec::new();
    let mut next = path.to_string();

    loop {
        let response = caller.send(Method::GET, &next, None).await?;
        if !response.is_success() {
            return Err(Error::discovery(format!(
                "GET {next} returned {}: {}",
                response.status,
                response.body_text()
            )));
        }

        let page = response.body;
        match page.get("value") {
            Some(JsonValue::Array(values)) => items.extend(values.iter().cloned()),
            _ => {
                return Err(Error::discovery(format!(
                    "GET {next} returned a page without a `value` array"
                )))
            }
        }

        match page.get("nextLink").and_then(JsonValue::as_str) {
            Some(link) if !link.is_empty() => next = caller.relative_path(link),
            _ => break,
        }
    }

    Ok(items)
}
