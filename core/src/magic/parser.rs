//! Magic directive parsing
//!
//! A directive is a line starting with `//!`. The sentinel is a comment to
//! the compiler, so directive lines stay in the source untouched.

/// Marker that opens a directive line
pub const SENTINEL: &str = "//!";

/// One parsed directive line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub name: String,
    pub args: Vec<String>,
    /// 1-based line number in the submitted cell
    pub line: usize,
}

impl Directive {
    /// The first argument, if any.
    pub fn arg(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

/// Extract directives in order of appearance.
pub fn parse(code: &str) -> Vec<Directive> {
    code.lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let rest = line.strip_prefix(SENTINEL)?;
            let mut tokens = rest.split_whitespace().map(str::to_string);
            let name = tokens.next()?;
            Some(Directive {
                name,
                args: tokens.collect(),
                line: index + 1,
            })
        })
        .collect()
}

/// Whether anything besides directives and blank lines is left to compile.
pub fn has_executable_code(code: &str) -> bool {
    code.lines()
        .any(|line| !line.starts_with(SENTINEL) && !line.trim().is_empty())
}
