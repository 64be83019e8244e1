//! Session identity and variable state
//!
//! One frontend instance binds at most one session at a time. The binding is
//! created lazily on first use or replaced by `attach`; it is never torn down
//! remotely.

use crate::error::Result;
use crate::services::{FileContent, Registry};
use crate::types::{Session, SessionId, Variables};
use std::sync::Arc;

pub struct SessionClient {
    registry: Arc<dyn Registry>,
    current: Option<SessionId>,
}

impl SessionClient {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            current: None,
        }
    }

    /// The bound session, if any.
    pub fn current(&self) -> Option<&SessionId> {
        self.current.as_ref()
    }

    /// Bound session id, creating a session on first call.
    pub async fn ensure_session(&mut self) -> Result<SessionId> {
        if let Some(id) = &self.current {
            return Ok(id.clone());
        }

        let id = self.registry.create_session().await?;
        tracing::info!(session = %id, "created session");
        self.current = Some(id.clone());
        Ok(id)
    }

    /// Bind an existing session. Its existence is checked by whatever
    /// registry call comes next.
    pub fn attach(&mut self, id: SessionId) {
        tracing::info!(session = %id, previous = ?self.current, "attached to session");
        self.current = Some(id);
    }

    pub async fn variables(&mut self) -> Result<Variables> {
        let id = self.ensure_session().await?;
        self.registry.get_variables(&id).await
    }

    /// Content of a file-typed variable.
    pub async fn file(&mut self, name: &str) -> Result<FileContent> {
        let id = self.ensure_session().await?;
        self.registry.get_file(&id, name).await
    }

    pub async fn file_url(&mut self, name: &str) -> Result<String> {
        let id = self.ensure_session().await?;
        Ok(self.registry.file_url(&id, name))
    }

    /// Full view of the bound session: variables and the invocation still
    /// running in it, if any.
    pub async fn describe(&mut self) -> Result<Session> {
        let id = self.ensure_session().await?;
        let variables = self.registry.get_variables(&id).await?;
        let active_invocation = self.registry.get_active_invocation(&id).await?;
        Ok(Session {
            id,
            variables,
            active_invocation,
        })
    }
}
