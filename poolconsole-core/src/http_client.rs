use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use crate::config::HttpCfg;
use crate::error::{ConsoleError, CoreResult};

/// Generic message used when a failed response carries no readable error.
pub const GENERIC_FAILURE: &str = "Request failed";

/// Per-request context.
#[derive(Clone, Copy, Default)]
pub struct RequestCtx<'a> {
    /// Full `Authorization` header value, e.g. `Bearer sk-...`.
    pub bearer: Option<&'a str>,
}

/// A boxed stream of raw body chunks.
pub type ByteStream =
    std::pin::Pin<Box<dyn futures_util::stream::Stream<Item = CoreResult<bytes::Bytes>> + Send>>;

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
    request_timeout: Duration,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::new(&HttpCfg::default())
    }

    /// The total timeout is applied per request to JSON calls only; streaming
    /// bodies may legitimately run longer.
    pub fn new(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder =
            Client::builder().connect_timeout(Duration::from_millis(cfg.connect_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| ConsoleError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: "poolconsole/0.1".to_string(),
            request_timeout: Duration::from_millis(cfg.request_timeout_ms),
        })
    }

    fn decorate(&self, mut req: RequestBuilder, ctx: &RequestCtx<'_>) -> RequestBuilder {
        req = req.header(http::header::USER_AGENT, &self.user_agent);
        if let Some(bearer) = ctx.bearer {
            req = req.header(http::header::AUTHORIZATION, bearer);
        }
        req
    }

    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<(R, u16)> {
        let req = self
            .inner
            .post(url)
            .json(body)
            .timeout(self.request_timeout);
        self.send_json(self.decorate(req, ctx)).await
    }

    pub async fn get_json<R: DeserializeOwned>(
        &self,
        url: &str,
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<(R, u16)> {
        let req = self.inner.get(url).timeout(self.request_timeout);
        self.send_json(self.decorate(req, ctx)).await
    }

    /// Returns the decoded body and the (2xx) status code.
    async fn send_json<R: DeserializeOwned>(&self, req: RequestBuilder) -> CoreResult<(R, u16)> {
        let resp = req.send().await.map_err(transport)?;
        let status = resp.status();

        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, &text));
        }

        let parsed = resp.json::<R>().await.map_err(|e| ConsoleError::Protocol {
            status: status.as_u16(),
            message: format!("json decode error: {e}"),
        })?;
        Ok((parsed, status.as_u16()))
    }

    /// POST JSON and return the status plus the raw body as a chunk stream.
    pub async fn post_stream<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<(u16, ByteStream)> {
        let req = self
            .inner
            .post(url)
            .json(body)
            .header(http::header::ACCEPT, "text/event-stream");
        let resp = self.decorate(req, ctx).send().await.map_err(transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body));
        }

        let byte_stream = resp.bytes_stream().map(|chunk| chunk.map_err(transport));
        Ok((status.as_u16(), Box::pin(byte_stream)))
    }
}

fn transport(e: reqwest::Error) -> ConsoleError {
    ConsoleError::Transport(e.to_string())
}

fn map_http_error(status: StatusCode, body: &str) -> ConsoleError {
    let message = extract_error_message(body)
        .unwrap_or_else(|| GENERIC_FAILURE.to_string());
    ConsoleError::Protocol {
        status: status.as_u16(),
        message: truncate(&message, 300),
    }
}

/// Pull a human-readable message out of an error body, trying the shapes the
/// upstream services use: `{error:{message}}`, `{detail}`, `{message}`, `{error}`.
pub(crate) fn extract_error_message(body: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    v.pointer("/error/message")
        .or_else(|| v.get("detail"))
        .or_else(|| v.get("message"))
        .or_else(|| v.get("error"))
        .and_then(|m| m.as_str())
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        let mut t = s[..end].to_string();
        t.push_str("...");
        t
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;
    use serde_json::json;

    #[tokio::test]
    async fn post_json_success_sends_bearer() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/chat")
                .header("authorization", "Bearer admin-token");
            then.status(201).json_body(json!({"ok": true}));
        });

        #[derive(serde::Deserialize)]
        struct Resp {
            ok: bool,
        }

        let client = HttpClient::new_default().unwrap();
        let ctx = RequestCtx {
            bearer: Some("Bearer admin-token"),
        };
        let url = format!("{}/chat", server.base_url());
        let (resp, status) = client
            .post_json::<_, Resp>(&url, &json!({"msg":"hi"}), &ctx)
            .await
            .unwrap();

        assert!(resp.ok);
        assert_eq!(status, 201);
        m.assert();
    }

    #[tokio::test]
    async fn structured_error_message_is_extracted() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(401)
                .json_body(json!({"error": {"message": "Invalid API key", "type": "auth"}}));
        });
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_json::<_, serde_json::Value>(
                &format!("{}/v1/chat/completions", server.base_url()),
                &json!({}),
                &RequestCtx::default(),
            )
            .await
            .unwrap_err();
        match err {
            ConsoleError::Protocol { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid API key");
            }
            other => panic!("expected Protocol, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unstructured_error_falls_back_to_generic() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(503).body("<html>bad gateway</html>");
        });
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_json::<_, serde_json::Value>(
                &format!("{}/chat", server.base_url()),
                &json!({}),
                &RequestCtx::default(),
            )
            .await
            .unwrap_err();
        match err {
            ConsoleError::Protocol { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, GENERIC_FAILURE);
            }
            other => panic!("expected Protocol, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn long_error_detail_is_truncated() {
        let server = MockServer::start();
        let big = "x".repeat(1000);
        let _m = server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(400).json_body(json!({ "detail": big }));
        });
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_json::<_, serde_json::Value>(
                &format!("{}/chat", server.base_url()),
                &json!({}),
                &RequestCtx::default(),
            )
            .await
            .unwrap_err();
        match err {
            ConsoleError::Protocol { message, .. } => {
                assert!(message.ends_with("..."));
                assert_eq!(message.len(), 303);
            }
            other => panic!("expected Protocol, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn ok_status_with_bad_json_is_protocol_error() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(GET).path("/admin/queue/status");
            then.status(200).body("not-json");
        });
        let client = HttpClient::new_default().expect("client");
        let err = client
            .get_json::<serde_json::Value>(
                &format!("{}/admin/queue/status", server.base_url()),
                &RequestCtx::default(),
            )
            .await
            .unwrap_err();
        match err {
            ConsoleError::Protocol { status, message } => {
                assert_eq!(status, 200);
                assert!(message.starts_with("json decode error"));
            }
            other => panic!("expected Protocol, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn network_error_maps_to_transport() {
        // port 9 (discard) is typically closed
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_json::<_, serde_json::Value>(
                "http://127.0.0.1:9/chat",
                &json!({"msg":"hi"}),
                &RequestCtx::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConsoleError::Transport(_)));
    }

    #[tokio::test]
    async fn post_stream_yields_body_chunks() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("accept", "text/event-stream");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body("data: [DONE]\n");
        });
        let client = HttpClient::new_default().expect("client");
        let (status, mut body) = client
            .post_stream(
                &format!("{}/v1/chat/completions", server.base_url()),
                &json!({"stream": true}),
                &RequestCtx::default(),
            )
            .await
            .expect("stream");
        assert_eq!(status, 200);
        let mut all = Vec::new();
        while let Some(chunk) = body.next().await {
            all.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(all, b"data: [DONE]\n");
    }

    #[test]
    fn extract_error_message_shapes() {
        assert_eq!(
            extract_error_message(r#"{"error":{"message":"m1"}}"#).as_deref(),
            Some("m1")
        );
        assert_eq!(extract_error_message(r#"{"detail":"m2"}"#).as_deref(), Some("m2"));
        assert_eq!(extract_error_message(r#"{"error":"m3"}"#).as_deref(), Some("m3"));
        assert_eq!(extract_error_message(r#"{"error":{"code":1}}"#), None);
        assert_eq!(extract_error_message("plain text"), None);
    }
}
