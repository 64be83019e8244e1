//! Terminal rendering of kernel output

use bakery_core::types::INVOCATION_MIME;
use bakery_core::{Completion, CompletionStatus, DisplaySurface, RenderEvent, StreamName};
use console::Style;
use serde::Serialize;
use std::io::Write;

/// Final line printed for a submission in `--json` mode
#[derive(Serialize)]
struct Reply<'a> {
    msg_type: &'static str,
    #[serde(flatten)]
    completion: &'a Completion,
}

/// Writes render events to stdout, diagnostics to stderr.
pub struct TerminalSurface {
    json: bool,
}

impl TerminalSurface {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn completion(&self, completion: &Completion) {
        if self.json {
            let reply = Reply {
                msg_type: "execute_reply",
                completion,
            };
            print_json(&reply);
            return;
        }

        if completion.status == CompletionStatus::Aborted {
            eprintln!("{}", Style::new().yellow().apply_to("interrupted"));
        }
    }

    fn render_text(&self, event: &RenderEvent) {
        match event {
            RenderEvent::Stream {
                name: StreamName::Stdout,
                text,
            } => print_line(text),
            RenderEvent::Stream {
                name: StreamName::Stderr,
                text,
            } => eprintln!("{}", Style::new().red().apply_to(text.trim_end())),
            RenderEvent::Display { data, display_id } => {
                if let Some(status) = data.get(INVOCATION_MIME) {
                    render_status(display_id.as_deref().unwrap_or("-"), status, true);
                } else {
                    render_bundle(data);
                }
            }
            RenderEvent::DisplayUpdate { data, display_id } => {
                if let Some(status) = data.get(INVOCATION_MIME) {
                    render_status(display_id, status, false);
                } else {
                    render_bundle(data);
                }
            }
        }
    }
}

impl DisplaySurface for TerminalSurface {
    fn emit(&self, event: RenderEvent) {
        if self.json {
            print_json(&event);
        } else {
            self.render_text(&event);
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => {
            let mut stdout = std::io::stdout().lock();
            let _ = writeln!(stdout, "{}", line);
            let _ = stdout.flush();
        }
        Err(e) => tracing::warn!(error = %e, "could not encode output"),
    }
}

fn print_line(text: &str) {
    if text.ends_with('\n') {
        print!("{}", text);
    } else {
        println!("{}", text);
    }
}

/// Progress is shown once; the final output when the invocation is done.
fn render_status(id: &str, status: &serde_json::Value, first: bool) {
    let done = status["done"].as_bool().unwrap_or(false);
    let output = status["output"].as_str().unwrap_or_default();

    if done {
        if !output.is_empty() {
            print_line(output);
        }
    } else if first {
        eprintln!("{}", Style::new().dim().apply_to(format!("[{}] running", id)));
    }
}

fn render_bundle(data: &bakery_core::output::MimeBundle) {
    let dim = Style::new().dim();
    for (mime, payload) in data {
        match (mime.as_str(), payload) {
            ("text/plain", serde_json::Value::String(text)) => print_line(text),
            ("application/json", value) => match serde_json::to_string_pretty(value) {
                Ok(pretty) => println!("{}", pretty),
                Err(_) => println!("{}", value),
            },
            ("image/fits", serde_json::Value::String(url)) => println!("{}", url),
            (mime, serde_json::Value::String(content)) => {
                println!("{}", dim.apply_to(format!("<{}, {} bytes>", mime, content.len())))
            }
            (mime, _) => println!("{}", dim.apply_to(format!("<{}>", mime))),
        }
    }
}
