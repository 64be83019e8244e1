//! Invocation orchestration
//!
//! Drives one invocation from dispatch to completion and renders its status
//! as it goes. Lifecycle: `Created -> Dispatched -> Polling|Streaming ->
//! Complete`. Execution errors are ordinary output; only transport failures
//! end a run with `Err`.
//!
//! Both strategies render the same way: one `display_data` for the
//! invocation, then `update_display_data` for every later status, in the
//! order the statuses were received.

pub mod backoff;
pub mod poll;
pub mod stream;

use crate::error::Result;
use crate::output::{bundle, Classifier, DisplayHandle, DisplaySurface, MimeBundle};
use crate::services::{Driver, Registry};
use crate::types::{Invocation, InvocationId, SessionId, StatusSnapshot, INVOCATION_MIME};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use backoff::backoff;

/// How the execution service is observed
#[derive(Clone)]
pub enum Strategy {
    /// Invocations are created in the registry and their status polled
    Poll(Arc<dyn Registry>),
    /// The driver executes source and pushes status updates
    Stream(Arc<dyn Driver>),
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Poll(_) => "poll",
            Strategy::Stream(_) => "stream",
        }
    }
}

/// Orchestration lifecycle of one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Created,
    Dispatched,
    Polling,
    Streaming,
    Complete,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Complete,
    /// Interrupted by the caller before completion was observed
    Aborted,
}

/// Final state of a run
#[derive(Debug, Clone)]
pub struct Outcome {
    pub invocation: Invocation,
    pub termination: Termination,
}

impl Outcome {
    pub fn is_complete(&self) -> bool {
        self.termination == Termination::Complete
    }
}

struct Lifecycle {
    phase: Phase,
}

impl Lifecycle {
    fn new() -> Self {
        Self { phase: Phase::Created }
    }

    fn advance(&mut self, next: Phase, invocation: &InvocationId) {
        debug_assert!(next > self.phase, "{:?} -> {:?}", self.phase, next);
        tracing::debug!(invocation = %invocation, from = ?self.phase, to = ?next, "invocation phase");
        self.phase = next;
    }
}

pub(crate) fn status_bundle(snapshot: &StatusSnapshot) -> MimeBundle {
    bundle(INVOCATION_MIME, snapshot.to_payload())
}

/// Stop observing. The invocation is rendered at least once even when no
/// status was ever received.
pub(crate) fn abort(
    invocation: &Invocation,
    display: &mut DisplayHandle,
    surface: &dyn DisplaySurface,
) -> Termination {
    tracing::info!(invocation = %invocation.id, "observation interrupted");
    if !display.shown() {
        display.show(surface, status_bundle(&invocation.snapshot()));
    }
    Termination::Aborted
}

pub struct Orchestrator {
    strategy: Strategy,
    classifier: Classifier,
    max_poll_failures: u32,
}

impl Orchestrator {
    pub fn new(strategy: Strategy, classifier: Classifier, max_poll_failures: u32) -> Self {
        Self {
            strategy,
            classifier,
            max_poll_failures,
        }
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Dispatch a compiled submission and drive it to completion.
    pub async fn run(
        &self,
        session: &SessionId,
        instructions: Vec<serde_json::Value>,
        source: &str,
        surface: &dyn DisplaySurface,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let mut lifecycle = Lifecycle::new();

        let (invocation, termination) = match &self.strategy {
            Strategy::Poll(registry) => {
                let id = registry.create_invocation(session, &instructions).await?;
                let mut invocation = Invocation::new(id, session.clone(), instructions);
                lifecycle.advance(Phase::Dispatched, &invocation.id);
                lifecycle.advance(Phase::Polling, &invocation.id);
                let termination = poll::drive(
                    registry.as_ref(),
                    &mut invocation,
                    surface,
                    cancel,
                    self.max_poll_failures,
                )
                .await?;
                (invocation, termination)
            }
            Strategy::Stream(driver) => {
                let execution = driver.execute(session, source).await?;
                let mut invocation = Invocation::new(execution.invocation, session.clone(), instructions);
                lifecycle.advance(Phase::Dispatched, &invocation.id);
                lifecycle.advance(Phase::Streaming, &invocation.id);
                let termination = stream::drive(
                    execution.updates,
                    &mut invocation,
                    surface,
                    cancel,
                    &self.classifier,
                )
                .await?;
                (invocation, termination)
            }
        };

        if termination == Termination::Complete {
            lifecycle.advance(Phase::Complete, &invocation.id);
        }
        Ok(Outcome {
            invocation,
            termination,
        })
    }

    /// Observe an invocation that was started elsewhere.
    pub async fn resume(
        &self,
        session: &SessionId,
        id: InvocationId,
        surface: &dyn DisplaySurface,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let mut lifecycle = Lifecycle::new();
        let mut invocation = Invocation::new(id, session.clone(), Vec::new());
        lifecycle.advance(Phase::Dispatched, &invocation.id);
        tracing::info!(invocation = %invocation.id, session = %session, "resuming invocation");

        let termination = match &self.strategy {
            Strategy::Poll(registry) => {
                lifecycle.advance(Phase::Polling, &invocation.id);
                poll::drive(
                    registry.as_ref(),
                    &mut invocation,
                    surface,
                    cancel,
                    self.max_poll_failures,
                )
                .await?
            }
            Strategy::Stream(driver) => {
                let updates = driver.observe(&invocation.id).await?;
                lifecycle.advance(Phase::Streaming, &invocation.id);
                stream::drive(updates, &mut invocation, surface, cancel, &self.classifier).await?
            }
        };

        if termination == Termination::Complete {
            lifecycle.advance(Phase::Complete, &invocation.id);
        }
        Ok(Outcome {
            invocation,
            termination,
        })
    }
}
