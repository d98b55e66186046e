//! `http_request`: call an arbitrary HTTP endpoint.
//!
//! Params:
//! ```json
//! {"url": "https://…", "method": "POST", "headers": {"X-Token": "…"}, "body": {…}}
//! ```
//! `method` defaults to `GET`; `body` is sent as JSON. The step's
//! idempotency key goes out as the `Idempotency-Key` header. The result is
//! `{"status": 200, "body": …}` with the body parsed as JSON when possible.
//! Non-2xx responses fail the action.

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use tracing::debug;

use super::string_form;
use crate::{ActionContext, AdapterError, IntegrationAdapter};

/// Longest response body quoted in a failure message.
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, Clone, Default)]
pub struct HttpRequestAdapter {
    client: Client,
}

impl HttpRequestAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn build(&self, params: &Value, ctx: &ActionContext) -> Result<reqwest::RequestBuilder, AdapterError> {
        let url = params
            .get("url")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| AdapterError::InvalidParams("http_request needs a 'url' string".into()))?;

        let method = match params.get("method") {
            None => Method::GET,
            Some(Value::String(m)) => Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                .map_err(|_| AdapterError::InvalidParams(format!("invalid HTTP method '{m}'")))?,
            Some(other) => {
                return Err(AdapterError::InvalidParams(format!(
                    "'method' must be a string, got {other}"
                )))
            }
        };

        let mut request = self
            .client
            .request(method, url)
            .header("Idempotency-Key", ctx.idempotency_key());

        match params.get("headers") {
            None | Some(Value::Null) => {}
            Some(Value::Object(headers)) => {
                for (name, value) in headers {
                    request = request.header(name.as_str(), string_form(value));
                }
            }
            Some(other) => {
                return Err(AdapterError::InvalidParams(format!(
                    "'headers' must be an object, got {other}"
                )))
            }
        }

        if let Some(body) = params.get("body").filter(|b| !b.is_null()) {
            request = request.json(body);
        }

        Ok(request)
    }
}

#[async_trait]
impl IntegrationAdapter for HttpRequestAdapter {
    async fn execute(
        &self,
        _action_type: &str,
        params: Value,
        ctx: &ActionContext,
    ) -> Result<Value, AdapterError> {
        let request = self.build(&params, ctx)?;

        let response = request
            .send()
            .await
            .map_err(|e| AdapterError::Failed(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AdapterError::Failed(format!("failed to read HTTP response: {e}")))?;
        debug!("http_request -> {status}");

        if !status.is_success() {
            let mut excerpt: String = text.chars().take(ERROR_BODY_LIMIT).collect();
            if excerpt.len() < text.len() {
                excerpt.push('…');
            }
            return Err(AdapterError::Failed(format!("HTTP {status}: {excerpt}")));
        }

        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(json!({ "status": status.as_u16(), "body": body }))
    }
}
