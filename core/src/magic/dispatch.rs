//! Directive dispatch
//!
//! Known directives map to handlers through a table keyed by
//! [`DirectiveKind`]. Handlers run in order of appearance before the cell is
//! compiled. Unknown names are skipped; a known directive with missing
//! arguments fails the cell and stops dispatch.

use super::parser::Directive;
use crate::error::{KernelError, Result};
use crate::output::{render_file, DisplaySurface, RenderEvent};
use crate::services::Compiler;
use crate::session::SessionClient;
use crate::types::{InvocationId, SessionId};
use futures::future::BoxFuture;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    Attach,
    Session,
    Variables,
    Display,
    Js9,
}

impl DirectiveKind {
    pub const ALL: [DirectiveKind; 5] = [
        DirectiveKind::Attach,
        DirectiveKind::Session,
        DirectiveKind::Variables,
        DirectiveKind::Display,
        DirectiveKind::Js9,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "attach" => Some(DirectiveKind::Attach),
            "session" => Some(DirectiveKind::Session),
            "variables" => Some(DirectiveKind::Variables),
            "display" => Some(DirectiveKind::Display),
            "js9" => Some(DirectiveKind::Js9),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DirectiveKind::Attach => "attach",
            DirectiveKind::Session => "session",
            DirectiveKind::Variables => "variables",
            DirectiveKind::Display => "display",
            DirectiveKind::Js9 => "js9",
        }
    }
}

/// What a handler may touch
pub struct DispatchContext<'a> {
    pub session: &'a mut SessionClient,
    pub compiler: &'a dyn Compiler,
    pub surface: &'a dyn DisplaySurface,
}

/// Follow-up requested by a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    None,
    /// Observe this invocation instead of starting a new one
    Resume(InvocationId),
}

/// Result of dispatching all directives of one cell
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub handled: usize,
    /// Invocation to resume. The last request wins.
    pub resume: Option<InvocationId>,
}

pub type Handler =
    for<'c, 'd> fn(&'c mut DispatchContext<'d>, &'c Directive) -> BoxFuture<'c, Result<Effect>>;

struct Entry {
    min_args: usize,
    handler: Handler,
}

pub struct DispatchTable {
    entries: HashMap<DirectiveKind, Entry>,
}

impl DispatchTable {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Table with every built-in directive.
    pub fn standard() -> Self {
        let mut table = Self::empty();
        let builtins: [(DirectiveKind, usize, Handler); 5] = [
            (DirectiveKind::Attach, 1, attach),
            (DirectiveKind::Session, 0, session),
            (DirectiveKind::Variables, 0, variables),
            (DirectiveKind::Display, 1, display),
            (DirectiveKind::Js9, 1, js9),
        ];
        for (kind, min_args, handler) in builtins {
            table.entries.insert(kind, Entry { min_args, handler });
        }
        table
    }

    /// Add a handler. Each kind can be registered once.
    pub fn register(&mut self, kind: DirectiveKind, min_args: usize, handler: Handler) -> Result<()> {
        if self.entries.contains_key(&kind) {
            return Err(KernelError::Config(format!(
                "directive '{}' is already registered",
                kind.name()
            )));
        }
        self.entries.insert(kind, Entry { min_args, handler });
        Ok(())
    }

    pub fn contains(&self, kind: DirectiveKind) -> bool {
        self.entries.contains_key(&kind)
    }

    /// Run directives in order. The first failing directive stops the rest.
    pub async fn dispatch(
        &self,
        ctx: &mut DispatchContext<'_>,
        directives: &[Directive],
    ) -> Result<DispatchOutcome> {
        let mut outcome = DispatchOutcome::default();

        for directive in directives {
            let Some(entry) = DirectiveKind::from_name(&directive.name).and_then(|kind| self.entries.get(&kind))
            else {
                tracing::debug!(name = %directive.name, line = directive.line, "ignoring unknown directive");
                continue;
            };

            if directive.args.len() < entry.min_args {
                return Err(KernelError::directive(
                    &directive.name,
                    format!(
                        "expected {} argument(s) on line {}, got {}",
                        entry.min_args,
                        directive.line,
                        directive.args.len()
                    ),
                ));
            }

            tracing::debug!(name = %directive.name, args = ?directive.args, "dispatching directive");
            if let Effect::Resume(id) = (entry.handler)(&mut *ctx, directive).await? {
                outcome.resume = Some(id);
            }
            outcome.handled += 1;
        }

        Ok(outcome)
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::standard()
    }
}

fn required<'a>(directive: &'a Directive) -> Result<&'a str> {
    directive
        .arg()
        .ok_or_else(|| KernelError::directive(&directive.name, "missing argument"))
}

fn attach<'c, 'd>(ctx: &'c mut DispatchContext<'d>, directive: &'c Directive) -> BoxFuture<'c, Result<Effect>> {
    Box::pin(async move {
        let id = required(directive)?;
        ctx.session.attach(SessionId::new(id));

        let session = ctx.session.describe().await?;
        ctx.compiler.inject_variables(&session.variables).await?;

        Ok(match session.active_invocation {
            Some(invocation) => Effect::Resume(invocation),
            None => Effect::None,
        })
    })
}

fn session<'c, 'd>(ctx: &'c mut DispatchContext<'d>, _: &'c Directive) -> BoxFuture<'c, Result<Effect>> {
    Box::pin(async move {
        let id = ctx.session.ensure_session().await?;
        ctx.surface.emit(RenderEvent::stdout(id.to_string()));
        Ok(Effect::None)
    })
}

fn variables<'c, 'd>(ctx: &'c mut DispatchContext<'d>, _: &'c Directive) -> BoxFuture<'c, Result<Effect>> {
    Box::pin(async move {
        let variables = ctx.session.variables().await?;
        ctx.surface
            .emit(RenderEvent::display("application/json", serde_json::to_value(&variables)?));
        Ok(Effect::None)
    })
}

fn display<'c, 'd>(ctx: &'c mut DispatchContext<'d>, directive: &'c Directive) -> BoxFuture<'c, Result<Effect>> {
    Box::pin(async move {
        let name = required(directive)?;
        let file = ctx.session.file(name).await?;

        let event = match render_file(&file) {
            Some(data) => RenderEvent::Display {
                data,
                display_id: None,
            },
            None => RenderEvent::stderr(format!(
                "Cannot display '{}': unsupported content ({})",
                name, file.content_type
            )),
        };
        ctx.surface.emit(event);
        Ok(Effect::None)
    })
}

fn js9<'c, 'd>(ctx: &'c mut DispatchContext<'d>, directive: &'c Directive) -> BoxFuture<'c, Result<Effect>> {
    Box::pin(async move {
        let name = required(directive)?;
        let url = ctx.session.file_url(name).await?;
        ctx.surface
            .emit(RenderEvent::display("image/fits", serde_json::Value::String(url)));
        Ok(Effect::None)
    })
}
