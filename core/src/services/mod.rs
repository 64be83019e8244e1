//! Remote collaborators: compile service, registry and execution driver

pub mod compiler;
pub mod driver;
pub mod registry;

pub use compiler::{CompileResult, Compiler, FramedCompiler};
pub use driver::{Driver, Execution, HttpDriver, StatusStream};
pub use registry::{FileContent, HttpRegistry, Registry};

/// Percent-encode one URL path segment. Separators such as `/`, `?` and
/// `#` stay inside the segment.
pub(crate) fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}
