//! Streaming execution service client
//!
//! `execute` answers with the new invocation id in the
//! `x-brane-invocation` header and a body of newline-delimited
//! [`StatusUpdate`] documents. The last document has `close` set.

use super::segment;
use crate::error::{KernelError, Result, Service};
use crate::types::{InvocationId, SessionId, StatusUpdate};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client as HttpClient;
use serde::Serialize;
use std::pin::Pin;
use std::time::Duration;

/// Header carrying the invocation id of an accepted execution
pub const INVOCATION_HEADER: &str = "x-brane-invocation";

/// Ordered status updates of one invocation
pub type StatusStream = Pin<Box<dyn Stream<Item = Result<StatusUpdate>> + Send>>;

/// An accepted execution request
pub struct Execution {
    pub invocation: InvocationId,
    pub updates: StatusStream,
}

/// Streaming execution capability
#[async_trait]
pub trait Driver: Send + Sync {
    async fn execute(&self, session: &SessionId, source: &str) -> Result<Execution>;

    /// Re-open the update stream of an invocation that is already running.
    async fn observe(&self, invocation: &InvocationId) -> Result<StatusStream>;
}

#[derive(Debug, Serialize)]
struct ExecuteBody<'a> {
    input: &'a str,
}

/// Split a byte stream into status updates, one JSON document per line.
///
/// Ends after the first update with `close` set. A body that ends before
/// that is a transport failure.
pub fn ndjson_updates<S, B, E>(bytes: S) -> StatusStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    Box::pin(split_lines(bytes))
}

fn split_lines<S, B, E>(bytes: S) -> impl Stream<Item = Result<StatusUpdate>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::try_stream! {
        let mut bytes = Box::pin(bytes);
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| KernelError::transport(Service::Driver, e.to_string()))?;
            buffer.extend_from_slice(chunk.as_ref());

            while let Some(newline_pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let update: StatusUpdate = serde_json::from_str(line)
                    .map_err(|e| KernelError::malformed(Service::Driver, e.to_string()))?;
                let close = update.close;
                yield update;
                if close {
                    return;
                }
            }
        }

        // A final document without trailing newline.
        let rest = String::from_utf8_lossy(&buffer).trim().to_string();
        if !rest.is_empty() {
            let update: StatusUpdate = serde_json::from_str(&rest)
                .map_err(|e| KernelError::malformed(Service::Driver, e.to_string()))?;
            let close = update.close;
            yield update;
            if close {
                return;
            }
        }

        Err::<(), _>(KernelError::transport(
            Service::Driver,
            "update stream ended before the invocation closed",
        ))?;
    }
}

/// Driver reached over HTTP
pub struct HttpDriver {
    base_url: String,
    http_client: HttpClient,
}

impl HttpDriver {
    /// `connect_timeout` bounds connection setup only; update streams stay
    /// open for as long as the invocation runs.
    pub fn new(base_url: &str, connect_timeout: Duration) -> Result<Self> {
        let http_client = HttpClient::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("bakery/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| KernelError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn check(response: reqwest::Result<reqwest::Response>) -> Result<reqwest::Response> {
        let response = response.map_err(|e| KernelError::from_reqwest(Service::Driver, e))?;
        if !response.status().is_success() {
            return Err(KernelError::transport(
                Service::Driver,
                format!("{} returned {}", response.url().path(), response.status()),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl Driver for HttpDriver {
    async fn execute(&self, session: &SessionId, source: &str) -> Result<Execution> {
        let url = format!("{}/sessions/{}/execute", self.base_url, segment(session.as_str()));
        let response = self
            .http_client
            .post(&url)
            .json(&ExecuteBody { input: source })
            .send()
            .await;
        let response = Self::check(response)?;

        let invocation = response
            .headers()
            .get(INVOCATION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(InvocationId::new)
            .ok_or_else(|| {
                KernelError::malformed(Service::Driver, format!("missing {} header", INVOCATION_HEADER))
            })?;

        Ok(Execution {
            invocation,
            updates: ndjson_updates(response.bytes_stream()),
        })
    }

    async fn observe(&self, invocation: &InvocationId) -> Result<StatusStream> {
        let url = format!("{}/invocations/{}/updates", self.base_url, segment(invocation.as_str()));
        let response = self.http_client.get(&url).send().await;
        let response = Self::check(response)?;
        Ok(ndjson_updates(response.bytes_stream()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{http_response_with_headers, HttpStub};
    use futures::stream;

    fn chunks(parts: &[&str]) -> impl Stream<Item = std::result::Result<Vec<u8>, std::io::Error>> + Send + 'static {
        let parts: Vec<_> = parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(parts)
    }

    #[tokio::test]
    async fn test_updates_split_across_chunks() {
        let updates: Vec<_> = ndjson_updates(chunks(&[
            "{\"output\":\"\",\"bytecode\":\"AQ",
            "ID\"}\n\n{\"output\":\"1\"}\n{\"outp",
            "ut\":\"2\",\"close\":true}\n{\"output\":\"ignored\"}\n",
        ]))
        .collect()
        .await;

        assert_eq!(updates.len(), 3);
        let updates: Vec<StatusUpdate> = updates.into_iter().map(|u| u.unwrap()).collect();
        assert_eq!(updates[0].bytecode.as_deref(), Some("AQID"));
        assert_eq!(updates[1].output, "1");
        assert!(updates[2].close);
    }

    #[tokio::test]
    async fn test_final_line_without_newline() {
        let updates: Vec<_> = ndjson_updates(chunks(&["{\"output\":\"done\",\"close\":true}"]))
            .collect()
            .await;
        assert_eq!(updates.len(), 1);
        assert!(updates[0].as_ref().unwrap().close);
    }

    #[tokio::test]
    async fn test_stream_without_close_fails() {
        let updates: Vec<_> = ndjson_updates(chunks(&["{\"output\":\"1\"}\n"])).collect().await;
        assert_eq!(updates.len(), 2);
        assert!(updates[0].is_ok());
        assert!(matches!(updates[1], Err(KernelError::Transport { service: Service::Driver, .. })));
    }

    #[tokio::test]
    async fn test_bad_document_is_malformed() {
        let updates: Vec<_> = ndjson_updates(chunks(&["not json\n"])).collect().await;
        assert!(matches!(updates[0], Err(KernelError::MalformedResponse { .. })));
    }

    #[tokio::test]
    async fn test_execute_over_http() {
        let body = b"{\"output\":\"\",\"bytecode\":\"AQID\"}\n{\"output\":\"3\",\"close\":true}\n";
        let stub = HttpStub::start(vec![http_response_with_headers(
            200,
            "application/x-ndjson",
            &[(INVOCATION_HEADER, "I1")],
            body,
        )])
        .await;
        let driver = HttpDriver::new(&stub.base_url(), Duration::from_secs(5)).unwrap();

        let execution = driver.execute(&SessionId::new("S1"), "a := 1 + 2").await.unwrap();
        assert_eq!(execution.invocation, InvocationId::new("I1"));

        let updates: Vec<_> = execution.updates.collect().await;
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].as_ref().unwrap().output, "3");

        let requests = stub.requests().await;
        assert!(requests[0].starts_with("POST /sessions/S1/execute "));
        assert!(requests[0].contains(r#""input":"a := 1 + 2""#));
    }

    #[tokio::test]
    async fn test_execute_without_invocation_header() {
        let stub = HttpStub::start(vec![http_response_with_headers(200, "application/x-ndjson", &[], b"")]).await;
        let driver = HttpDriver::new(&stub.base_url(), Duration::from_secs(5)).unwrap();

        let err = driver.execute(&SessionId::new("S1"), "a := 1").await.err().unwrap();
        assert!(matches!(err, KernelError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn test_ids_are_encoded_in_routes() {
        let stub = HttpStub::start(vec![
            http_response_with_headers(200, "application/x-ndjson", &[(INVOCATION_HEADER, "I1")], b""),
            http_response_with_headers(200, "application/x-ndjson", &[], b""),
        ])
        .await;
        let driver = HttpDriver::new(&stub.base_url(), Duration::from_secs(5)).unwrap();

        driver.execute(&SessionId::new("S1?x=1"), "a := 1").await.unwrap();
        driver.observe(&InvocationId::new("../sessions/S1")).await.unwrap();

        let requests = stub.requests().await;
        assert!(requests[0].starts_with("POST /sessions/S1%3Fx%3D1/execute "));
        assert!(requests[1].starts_with("GET /invocations/..%2Fsessions%2FS1/updates "));
    }
}
