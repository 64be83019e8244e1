//! Session/invocation registry client
//!
//! The registry is a REST service. Routes:
//!
//! | Call | Route |
//! |------|-------|
//! | create session | `POST /sessions` |
//! | variables | `GET /sessions/{id}/variables` |
//! | active invocation | `GET /sessions/{id}/invocations?status=running` |
//! | file variable | `GET /sessions/{id}/files/{name}` |
//! | create invocation | `POST /invocations` |
//! | status | `GET /invocations/{id}/status` |

use super::segment;
use crate::error::{KernelError, Result, Service};
use crate::types::{InvocationId, InvocationStatus, SessionId, StatusSnapshot, Variable, Variables};
use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client as HttpClient, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Raw content of a file-typed session variable
#[derive(Debug, Clone, PartialEq)]
pub struct FileContent {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Registry capability
#[async_trait]
pub trait Registry: Send + Sync {
    async fn create_session(&self) -> Result<SessionId>;

    async fn get_variables(&self, session: &SessionId) -> Result<Variables>;

    async fn create_invocation(
        &self,
        session: &SessionId,
        instructions: &[serde_json::Value],
    ) -> Result<InvocationId>;

    async fn get_status(&self, invocation: &InvocationId) -> Result<StatusSnapshot>;

    async fn get_active_invocation(&self, session: &SessionId) -> Result<Option<InvocationId>>;

    async fn get_file(&self, session: &SessionId, name: &str) -> Result<FileContent>;

    /// Location of a file variable, for viewers that fetch it themselves.
    fn file_url(&self, session: &SessionId, name: &str) -> String;
}

#[derive(Debug, Serialize)]
struct CreateSessionBody {}

#[derive(Debug, Serialize)]
struct CreateInvocationBody<'a> {
    session: &'a str,
    instructions: &'a [serde_json::Value],
}

#[derive(Debug, Deserialize)]
struct Created {
    uuid: String,
}

#[derive(Debug, Deserialize)]
struct InvocationRecord {
    uuid: String,
    status: String,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    bytecode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusReply {
    invocation: InvocationRecord,
}

/// Map the registry's status vocabulary onto the client lifecycle.
fn parse_status(status: &str) -> InvocationStatus {
    match status.to_lowercase().as_str() {
        "complete" | "completed" | "done" | "finished" | "stopped" => InvocationStatus::Complete,
        "running" | "halted" | "suspended" => InvocationStatus::Running,
        _ => InvocationStatus::Pending,
    }
}

/// Registry reached over HTTP
pub struct HttpRegistry {
    base_url: String,
    http_client: HttpClient,
}

impl HttpRegistry {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(timeout)
            .user_agent(concat!("bakery/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| KernelError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: reqwest::Result<Response>) -> Result<Response> {
        let response = response.map_err(|e| KernelError::from_reqwest(Service::Registry, e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().path().to_string();
        let body = response.text().await.unwrap_or_default();
        let detail = if body.trim().is_empty() {
            String::new()
        } else {
            format!(": {}", body.trim())
        };
        Err(KernelError::transport(
            Service::Registry,
            format!("{} returned {}{}", url, status, detail),
        ))
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| KernelError::from_reqwest(Service::Registry, e))?;
        serde_json::from_slice(&bytes).map_err(|e| KernelError::malformed(Service::Registry, e.to_string()))
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn create_session(&self) -> Result<SessionId> {
        let response = self
            .http_client
            .post(self.url("/sessions"))
            .json(&CreateSessionBody {})
            .send()
            .await;
        let created: Created = Self::json(Self::check(response).await?).await?;
        Ok(SessionId::new(created.uuid))
    }

    async fn get_variables(&self, session: &SessionId) -> Result<Variables> {
        let response = self
            .http_client
            .get(self.url(&format!("/sessions/{}/variables", segment(session.as_str()))))
            .send()
            .await;
        let variables: Vec<Variable> = Self::json(Self::check(response).await?).await?;
        Ok(variables.into_iter().map(|v| (v.name, v.data_type)).collect())
    }

    async fn create_invocation(
        &self,
        session: &SessionId,
        instructions: &[serde_json::Value],
    ) -> Result<InvocationId> {
        let response = self
            .http_client
            .post(self.url("/invocations"))
            .json(&CreateInvocationBody {
                session: session.as_str(),
                instructions,
            })
            .send()
            .await;
        let created: Created = Self::json(Self::check(response).await?).await?;
        Ok(InvocationId::new(created.uuid))
    }

    async fn get_status(&self, invocation: &InvocationId) -> Result<StatusSnapshot> {
        let response = self
            .http_client
            .get(self.url(&format!("/invocations/{}/status", segment(invocation.as_str()))))
            .send()
            .await;
        let reply: StatusReply = Self::json(Self::check(response).await?).await?;
        Ok(StatusSnapshot {
            status: parse_status(&reply.invocation.status),
            output: reply.invocation.output,
            bytecode: reply.invocation.bytecode,
        })
    }

    async fn get_active_invocation(&self, session: &SessionId) -> Result<Option<InvocationId>> {
        let response = self
            .http_client
            .get(self.url(&format!("/sessions/{}/invocations", segment(session.as_str()))))
            .query(&[("status", "running")])
            .send()
            .await;
        let running: Vec<InvocationRecord> = Self::json(Self::check(response).await?).await?;
        Ok(running
            .into_iter()
            .find(|inv| !parse_status(&inv.status).is_complete())
            .map(|inv| InvocationId::new(inv.uuid)))
    }

    async fn get_file(&self, session: &SessionId, name: &str) -> Result<FileContent> {
        let response = self
            .http_client
            .get(self.file_url(session, name))
            .send()
            .await;
        let response = Self::check(response).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| KernelError::from_reqwest(Service::Registry, e))?;

        Ok(FileContent {
            content_type,
            bytes: bytes.to_vec(),
        })
    }

    fn file_url(&self, session: &SessionId, name: &str) -> String {
        self.url(&format!(
            "/sessions/{}/files/{}",
            segment(session.as_str()),
            segment(name)
        ))
    }
}
