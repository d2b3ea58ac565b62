//! Index task that delegates to an HTTP indexing service.
//!
//! Each resource is sent as `{"uri": "<identifier>"}` in a POST to the
//! configured endpoint. Any 2xx response is a success and its body becomes
//! the success payload. Any other status is a task fault, and so is a
//! transport error while sending or while reading the body.

use std::time::Duration;

use async_trait::async_trait;
use reindex_core::{IndexTask, TaskError};
use reqwest::Client;
use serde::Serialize;
use tracing::trace;

#[derive(Serialize)]
struct IndexRequest<'a> {
    uri: &'a str,
}

pub struct WebhookIndexTask {
    client: Client,
    url: String,
}

impl WebhookIndexTask {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl IndexTask for WebhookIndexTask {
    async fn index(&self, resource: &str) -> Result<String, TaskError> {
        let response = self
            .client
            .post(&self.url)
            .json(&IndexRequest { uri: resource })
            .send()
            .await
            .map_err(|e| TaskError::new(format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await;
        trace!(resource, %status, "Index response");

        match body {
            Ok(body) if status.is_success() => Ok(body),
            Ok(body) => Err(TaskError::new(format!("HTTP {}: {}", status, body))),
            Err(e) => Err(TaskError::new(format!(
                "HTTP {}: failed to read response: {}",
                status, e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn task_for(server: &MockServer) -> WebhookIndexTask {
        WebhookIndexTask::new(format!("{}/index", server.uri()), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_success_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/index"))
            .and(body_json(serde_json::json!({"uri": "https://repo/grants/1"})))
            .respond_with(ResponseTemplate::new(200).set_body_string("indexed"))
            .expect(1)
            .mount(&server)
            .await;

        let task = task_for(&server).await;
        let payload = task.index("https://repo/grants/1").await.unwrap();

        assert_eq!(payload, "indexed");
    }

    #[tokio::test]
    async fn test_error_status_is_fault() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/index"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let task = task_for(&server).await;
        let err = task.index("https://repo/grants/1").await.unwrap_err();

        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("busy"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_fault() {
        let task =
            WebhookIndexTask::new("http://127.0.0.1:9/index", Duration::from_secs(1)).unwrap();
        let err = task.index("https://repo/grants/1").await.unwrap_err();
        assert!(err.to_string().starts_with("request failed"));
    }

    #[tokio::test]
    async fn test_truncated_body_is_fault() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.ends_with(b"}") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial")
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });

        let task =
            WebhookIndexTask::new(format!("http://{}/index", addr), Duration::from_secs(5)).unwrap();
        let err = task.index("https://repo/grants/1").await.unwrap_err();

        assert!(err.to_string().starts_with("HTTP 200 OK: failed to read response"));
    }
}
