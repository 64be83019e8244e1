//! In-band control directives

pub mod dispatch;
pub mod parser;

pub use dispatch::{DirectiveKind, DispatchContext, DispatchOutcome, DispatchTable, Effect, Handler};
pub use parser::{has_executable_code, parse, Directive, SENTINEL};
