//! Execution façade
//!
//! The entry point a frontend calls once per submitted cell. A cell runs its
//! directives, is compiled, and is executed remotely as one invocation.
//! Submissions are serialized: a second call waits until the first one has
//! finished, so a session never has two invocations started from here.

use crate::config::{KernelConfig, StrategyKind};
use crate::error::{KernelError, Result};
use crate::magic::{self, DispatchContext, DispatchOutcome, DispatchTable};
use crate::orchestrator::{Orchestrator, Outcome, Strategy};
use crate::output::{Classifier, DisplaySurface, RenderEvent};
use crate::services::{CompileResult, Compiler, FramedCompiler, HttpDriver, HttpRegistry, Registry};
use crate::session::SessionClient;
use crate::types::SessionId;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// How a submission ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    Ok,
    /// Interrupted before the invocation completed
    Aborted,
    /// A service failed; the reason was rendered on stderr
    Error,
}

/// Terminal record of one submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Completion {
    pub status: CompletionStatus,
    pub execution_count: u64,
}

struct KernelState {
    session: SessionClient,
    execution_count: u64,
}

pub struct Kernel {
    /// Doubles as the run lock
    state: Mutex<KernelState>,
    compiler: Arc<dyn Compiler>,
    orchestrator: Orchestrator,
    directives: DispatchTable,
    surface: Arc<dyn DisplaySurface>,
    interrupt: parking_lot::Mutex<CancellationToken>,
}

impl Kernel {
    /// Connect the network services described by `config`.
    pub fn new(config: &KernelConfig, surface: Arc<dyn DisplaySurface>) -> Result<Self> {
        let timeout = config.request_timeout();
        let registry: Arc<dyn Registry> = Arc::new(HttpRegistry::new(&config.registry_endpoint, timeout)?);
        let compiler: Arc<dyn Compiler> =
            Arc::new(FramedCompiler::new(config.compiler_endpoint.clone(), timeout));

        let strategy = match config.effective_strategy() {
            StrategyKind::Stream => {
                let endpoint = config.execution_endpoint.as_deref().ok_or_else(|| {
                    KernelError::Config("strategy 'stream' requires an execution_endpoint".to_string())
                })?;
                Strategy::Stream(Arc::new(HttpDriver::new(endpoint, timeout)?))
            }
            _ => Strategy::Poll(registry.clone()),
        };
        tracing::info!(
            strategy = strategy.name(),
            registry = %config.registry_endpoint,
            compiler = %config.compiler_endpoint,
            "kernel configured"
        );

        let classifier = Classifier::new(&config.data_root, config.data_prefix.clone());
        Ok(Self::with_services(
            compiler,
            registry,
            Orchestrator::new(strategy, classifier, config.max_poll_failures),
            surface,
        ))
    }

    pub fn with_services(
        compiler: Arc<dyn Compiler>,
        registry: Arc<dyn Registry>,
        orchestrator: Orchestrator,
        surface: Arc<dyn DisplaySurface>,
    ) -> Self {
        Self {
            state: Mutex::new(KernelState {
                session: SessionClient::new(registry),
                execution_count: 0,
            }),
            compiler,
            orchestrator,
            directives: DispatchTable::standard(),
            surface,
            interrupt: parking_lot::Mutex::new(CancellationToken::new()),
        }
    }

    /// Replace the directive table.
    pub fn with_directives(mut self, directives: DispatchTable) -> Self {
        self.directives = directives;
        self
    }

    pub fn strategy_name(&self) -> &'static str {
        self.orchestrator.strategy().name()
    }

    /// Session the kernel is bound to, if one was created or attached.
    pub async fn session_id(&self) -> Option<SessionId> {
        self.state.lock().await.session.current().cloned()
    }

    /// Whether a submission is in flight.
    pub fn is_busy(&self) -> bool {
        self.state.try_lock().is_err()
    }

    /// Interrupt the submission in flight, if any.
    pub fn interrupt(&self) {
        tracing::debug!("interrupt requested");
        self.interrupt.lock().cancel();
    }

    /// Run one cell to its end. Failures are rendered and reported in the
    /// completion, never returned.
    pub async fn submit(&self, code: &str) -> Completion {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if code.trim().is_empty() {
            return Completion {
                status: CompletionStatus::Ok,
                execution_count: state.execution_count,
            };
        }

        state.execution_count += 1;
        let cancel = {
            let mut slot = self.interrupt.lock();
            *slot = CancellationToken::new();
            slot.clone()
        };

        let status = match self.execute(&mut state.session, code, &cancel).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(error = %e, execution_count = state.execution_count, "submission failed");
                self.surface.emit(RenderEvent::stderr(e.user_message()));
                CompletionStatus::Error
            }
        };

        Completion {
            status,
            execution_count: state.execution_count,
        }
    }

    async fn execute(
        &self,
        session: &mut SessionClient,
        code: &str,
        cancel: &CancellationToken,
    ) -> Result<CompletionStatus> {
        let directives = magic::parse(code);
        let dispatched = if directives.is_empty() {
            DispatchOutcome::default()
        } else {
            let mut ctx = DispatchContext {
                session: &mut *session,
                compiler: self.compiler.as_ref(),
                surface: self.surface.as_ref(),
            };
            self.directives.dispatch(&mut ctx, &directives).await?
        };

        // An attached session with work in progress is observed instead of
        // starting another invocation.
        if let Some(invocation) = dispatched.resume {
            let session_id = session.ensure_session().await?;
            let outcome = self
                .orchestrator
                .resume(&session_id, invocation, self.surface.as_ref(), cancel)
                .await?;
            return Ok(completion_status(&outcome));
        }

        if !magic::has_executable_code(code) {
            return Ok(CompletionStatus::Ok);
        }

        let instructions = match self.compiler.compile(code).await? {
            CompileResult::Ok(instructions) => instructions,
            CompileResult::Error(diagnostic) => {
                tracing::debug!("compilation failed");
                self.surface.emit(RenderEvent::stderr(diagnostic));
                return Ok(CompletionStatus::Ok);
            }
        };
        if instructions.is_empty() {
            return Ok(CompletionStatus::Ok);
        }

        let session_id = session.ensure_session().await?;
        let outcome = self
            .orchestrator
            .run(&session_id, instructions, code, self.surface.as_ref(), cancel)
            .await?;
        Ok(completion_status(&outcome))
    }
}

fn completion_status(outcome: &Outcome) -> CompletionStatus {
    if outcome.is_complete() {
        CompletionStatus::Ok
    } else {
        CompletionStatus::Aborted
    }
}
