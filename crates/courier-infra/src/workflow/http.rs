//! `HTTP Request` action.
//!
//! Config fields (already template-resolved by the engine):
//! - `url` (required)
//! - `method` (default `GET`)
//! - `headers`: object of header name to string value
//! - `body`: a string is sent as-is, any other JSON value as a JSON body
//!
//! Output is `{status, body}`, where `body` is parsed as JSON when possible.
//! A non-2xx status is a step failure so the engine's retry policy applies.

use std::time::Duration;

use courier_core::workflow::capability::{
    Capability, CapabilityError, CapabilityFuture, CapabilityInput,
};
use courier_types::config::HttpConfig;
use serde::Deserialize;
use serde_json::{json, Map, Value};

pub const ACTION_HTTP_REQUEST: &str = "HTTP Request";

#[derive(Debug, Deserialize)]
struct HttpRequestConfig {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: Map<String, Value>,
    #[serde(default)]
    body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Sends one HTTP request per attempt with a shared `reqwest::Client`.
#[derive(Clone)]
pub struct HttpRequestCapability {
    client: reqwest::Client,
}

impl HttpRequestCapability {
    pub fn new(config: &HttpConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self { client })
    }

    async fn send(&self, input: CapabilityInput) -> Result<Value, CapabilityError> {
        let config: HttpRequestConfig = serde_json::from_value(Value::Object(input.config))
            .map_err(|e| CapabilityError::InvalidInput(e.to_string()))?;
        if config.url.trim().is_empty() {
            return Err(CapabilityError::InvalidInput("url is empty".to_string()));
        }

        let method: reqwest::Method = config
            .method
            .to_uppercase()
            .parse()
            .map_err(|_| CapabilityError::InvalidInput(format!("invalid HTTP method: {}", config.method)))?;

        let mut request = self.client.request(method.clone(), &config.url);
        for (name, value) in &config.headers {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            request = request.header(name.as_str(), value);
        }
        request = match config.body {
            None | Some(Value::Null) => request,
            Some(Value::String(text)) => request.body(text),
            Some(other) => request.json(&other),
        };

        let response = request.send().await.map_err(|e| {
            CapabilityError::Failed(format!("HTTP request to '{}' failed: {e}", config.url))
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            CapabilityError::Failed(format!("failed to read HTTP response body: {e}"))
        })?;

        tracing::info!(
            node_id = %input.node_id,
            method = %method,
            url = config.url.as_str(),
            status = status.as_u16(),
            body_len = text.len(),
            "HTTP request completed"
        );

        if !status.is_success() {
            return Err(CapabilityError::Failed(format!(
                "HTTP {} from '{}'",
                status.as_u16(),
                config.url
            )));
        }

        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(json!({ "status": status.as_u16(), "body": body }))
    }
}

impl Capability for HttpRequestCapability {
    fn execute(&self, input: CapabilityInput) -> CapabilityFuture<'_> {
        Box::pin(self.send(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned response and hand back the raw request text.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.unwrap();
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });
        (url, handle)
    }

    fn input(config: Value) -> CapabilityInput {
        CapabilityInput {
            node_id: "http-1".into(),
            action_type: ACTION_HTTP_REQUEST.into(),
            config: config.as_object().cloned().unwrap_or_default(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_success_parses_json_body() {
        let (url, server) = serve_once("200 OK", r#"{"ok":true}"#).await;
        let capability = HttpRequestCapability::new(&HttpConfig::default()).unwrap();

        let output = capability
            .execute(input(json!({
                "url": url,
                "method": "post",
                "headers": { "x-trace": "abc" },
                "body": { "hello": "world" }
            })))
            .await
            .unwrap();

        assert_eq!(output, json!({ "status": 200, "body": { "ok": true } }));
        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /hook"));
        assert!(raw.to_lowercase().contains("x-trace: abc"));
    }

    #[tokio::test]
    async fn test_non_2xx_is_failure() {
        let (url, _server) = serve_once("503 Service Unavailable", "{}").await;
        let capability = HttpRequestCapability::new(&HttpConfig::default()).unwrap();

        let err = capability.execute(input(json!({ "url": url }))).await.unwrap_err();

        assert!(matches!(err, CapabilityError::Failed(ref msg) if msg.starts_with("HTTP 503")));
    }

    #[tokio::test]
    async fn test_missing_url_is_invalid_input() {
        let capability = HttpRequestCapability::new(&HttpConfig::default()).unwrap();

        let err = capability.execute(input(json!({ "method": "GET" }))).await.unwrap_err();

        assert!(matches!(err, CapabilityError::InvalidInput(_)));
    }
}
