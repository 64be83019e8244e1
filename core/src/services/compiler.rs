//! Compile service client
//!
//! Requests and replies are JSON documents, one per length-prefixed frame,
//! over a single TCP connection that is reopened after any failure.

use crate::error::{KernelError, Result, Service};
use crate::types::Variables;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::bytes::Bytes;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Compile outcome: instructions, or a diagnostic for the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant", content = "content", rename_all = "lowercase")]
pub enum CompileResult {
    Ok(Vec<serde_json::Value>),
    Error(String),
}

/// Compiler capability
#[async_trait]
pub trait Compiler: Send + Sync {
    async fn compile(&self, source: &str) -> Result<CompileResult>;

    /// Make session variables known to subsequently compiled code.
    async fn inject_variables(&self, variables: &Variables) -> Result<()>;
}

/// Wire request understood by the compile service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompilerRequest {
    Compile { source: String },
    InjectVariables { variables: Variables },
}

type Connection = Framed<TcpStream, LengthDelimitedCodec>;

/// Compiler reached over framed TCP
pub struct FramedCompiler {
    endpoint: String,
    timeout: Duration,
    connection: Mutex<Option<Connection>>,
}

impl FramedCompiler {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
            connection: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<Connection> {
        tracing::debug!(endpoint = %self.endpoint, "connecting to compile service");
        let stream = TcpStream::connect(&self.endpoint)
            .await
            .map_err(|e| KernelError::transport(Service::Compiler, format!("{}: {}", self.endpoint, e)))?;
        Ok(Framed::new(stream, LengthDelimitedCodec::new()))
    }

    async fn request(&self, request: &CompilerRequest) -> Result<CompileResult> {
        let payload = serde_json::to_vec(request)?;

        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(connection) = guard.as_mut() else {
            return Err(KernelError::transport(Service::Compiler, "no connection"));
        };

        let exchange = async {
            connection.send(Bytes::from(payload)).await?;
            connection.next().await.transpose()?.ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "compile service closed the connection",
                )
            })
        };
        let outcome = tokio::time::timeout(self.timeout, exchange).await;

        let frame = match outcome {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                *guard = None;
                return Err(KernelError::transport(Service::Compiler, e.to_string()));
            }
            Err(_) => {
                *guard = None;
                return Err(KernelError::transport(
                    Service::Compiler,
                    format!("no reply within {:?}", self.timeout),
                ));
            }
        };

        serde_json::from_slice(&frame).map_err(|e| KernelError::malformed(Service::Compiler, e.to_string()))
    }
}

#[async_trait]
impl Compiler for FramedCompiler {
    async fn compile(&self, source: &str) -> Result<CompileResult> {
        self.request(&CompilerRequest::Compile {
            source: source.to_string(),
        })
        .await
    }

    async fn inject_variables(&self, variables: &Variables) -> Result<()> {
        let reply = self
            .request(&CompilerRequest::InjectVariables {
                variables: variables.clone(),
            })
            .await?;

        match reply {
            CompileResult::Ok(_) => Ok(()),
            CompileResult::Error(message) => Err(KernelError::transport(
                Service::Compiler,
                format!("variables rejected: {}", message),
            )),
        }
    }
}
