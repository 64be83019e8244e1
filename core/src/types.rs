//! Session and invocation types
//!
//! Identifiers are opaque tokens handed out by the remote services. The
//! client never interprets them, it only carries them back.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Media type used for invocation status displays.
pub const INVOCATION_MIME: &str = "application/vnd.brane.invocation+json";

/// Opaque identifier of a remote session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identifier of one remote execution request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationId(pub String);

impl InvocationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InvocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session variable bindings: name -> declared type
pub type Variables = BTreeMap<String, String>;

/// A variable as reported by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

/// Client-side view of a remote session
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub variables: Variables,
    pub active_invocation: Option<InvocationId>,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            variables: Variables::new(),
            active_invocation: None,
        }
    }
}

/// Invocation lifecycle as reported by the services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
    #[default]
    Pending,
    Running,
    Complete,
}

impl InvocationStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, InvocationStatus::Complete)
    }
}

/// Status of an invocation at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: InvocationStatus,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub bytecode: Option<String>,
}

impl StatusSnapshot {
    pub fn done(&self) -> bool {
        self.status.is_complete()
    }

    /// Display payload: `{ done, output, bytecode }`
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "done": self.done(),
            "output": self.output.clone().unwrap_or_default(),
            "bytecode": self.bytecode,
        })
    }
}

/// One message pushed by the streaming execution service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StatusUpdate {
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub bytecode: Option<String>,
    #[serde(default)]
    pub close: bool,
}

/// One remote execution request and everything observed about it
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub id: InvocationId,
    pub session_id: SessionId,
    pub instructions: Vec<serde_json::Value>,
    pub status: InvocationStatus,
    pub output: Option<String>,
    pub bytecode: Option<String>,
}

impl Invocation {
    pub fn new(id: InvocationId, session_id: SessionId, instructions: Vec<serde_json::Value>) -> Self {
        Self {
            id,
            session_id,
            instructions,
            status: InvocationStatus::Pending,
            output: None,
            bytecode: None,
        }
    }

    /// Merge a pushed update. Bytecode is carried forward when the update
    /// has none.
    pub fn apply_update(&mut self, update: &StatusUpdate) {
        self.merge_bytecode(update.bytecode.as_deref());
        self.output = Some(update.output.clone());
        self.status = if update.close {
            InvocationStatus::Complete
        } else {
            InvocationStatus::Running
        };
    }

    /// Merge a polled snapshot, with the same carry-forward rule.
    pub fn apply_snapshot(&mut self, snapshot: &StatusSnapshot) {
        self.merge_bytecode(snapshot.bytecode.as_deref());
        if snapshot.output.is_some() {
            self.output = snapshot.output.clone();
        }
        self.status = snapshot.status;
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            status: self.status,
            output: self.output.clone(),
            bytecode: self.bytecode.clone(),
        }
    }

    fn merge_bytecode(&mut self, bytecode: Option<&str>) {
        if let Some(bytecode) = bytecode.filter(|b| !b.is_empty()) {
            self.bytecode = Some(bytecode.to_string());
        }
    }
}
