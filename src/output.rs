//! Output plumbing: progress messages and final result rendering.
//!
//! Progress and results are separate sinks. In text mode both go to stdout;
//! in JSON mode progress is a no-op and the final result is a single JSON
//! document. Each result type exposes a structured representation and a
//! rendered string; the renderer only picks between them, it never inspects
//! the concrete type.

use std::io::Write;
use std::str::FromStr;

use crate::errors::FlowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

impl OutputFormat {
    /// Resolve the effective format once at startup: explicit flag first,
    /// then the `TICKETFLOW_OUTPUT_FORMAT` environment variable, then text.
    pub fn resolve(flag: Option<OutputFormat>) -> OutputFormat {
        if let Some(format) = flag {
            return format;
        }
        std::env::var("TICKETFLOW_OUTPUT_FORMAT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(OutputFormat::Text)
    }
}

/// Progress-message sink, suppressed entirely in JSON mode.
#[derive(Debug, Clone, Copy)]
pub struct StatusChannel {
    enabled: bool,
}

impl StatusChannel {
    pub fn new(format: OutputFormat) -> Self {
        StatusChannel {
            enabled: format == OutputFormat::Text,
        }
    }

    /// A silent channel, for callers that never want progress output.
    pub fn silent() -> Self {
        StatusChannel { enabled: false }
    }

    pub fn info(&self, message: impl std::fmt::Display) {
        if self.enabled {
            println!("{message}");
        }
    }

    pub fn warn(&self, message: impl std::fmt::Display) {
        if self.enabled {
            eprintln!("warning: {message}");
        }
    }
}

/// Final results render both ways; the renderer picks one.
pub trait Render {
    fn structured(&self) -> serde_json::Value;
    fn text(&self) -> String;
}

/// Structured view of one ticket, shared by list/show/status results.
pub fn ticket_json(ticket: &crate::ticket::Ticket) -> serde_json::Value {
    use crate::ticket::format_timestamp;
    let meta = &ticket.meta;
    serde_json::json!({
        "id": ticket.id,
        "status": ticket.status(),
        "priority": meta.priority,
        "description": meta.description,
        "created_at": format_timestamp(&meta.created_at),
        "started_at": meta.started_at.as_ref().map(format_timestamp),
        "closed_at": meta.closed_at.as_ref().map(format_timestamp),
        "related": meta.related,
        "close_reason": meta.close_reason,
        "path": ticket.path,
    })
}

/// One-line summary used by list output.
pub fn ticket_line(ticket: &crate::ticket::Ticket) -> String {
    let description = if ticket.meta.description.is_empty() {
        ticket.slug()
    } else {
        ticket.meta.description.as_str()
    };
    format!(
        "{:<7} p{} {}  {}",
        ticket.status().as_str(),
        ticket.meta.priority,
        ticket.id,
        description
    )
}

/// Print a final result to stdout in the chosen format.
pub fn emit(format: OutputFormat, result: &dyn Render) {
    match format {
        OutputFormat::Text => {
            let rendered = result.text();
            if !rendered.is_empty() {
                println!("{rendered}");
            }
        }
        OutputFormat::Json => {
            let doc = result.structured();
            println!("{}", serde_json::to_string_pretty(&doc).unwrap_or_else(|_| "{}".into()));
        }
    }
}

/// Print a failure to stderr: an `Error:` block in text mode, a single
/// `{"error": ...}` document in JSON mode.
pub fn emit_error(format: OutputFormat, err: &anyhow::Error) {
    match format {
        OutputFormat::Text => {
            let mut stderr = std::io::stderr().lock();
            if let Some(flow) = err.downcast_ref::<FlowError>() {
                let _ = writeln!(stderr, "Error: {}", flow.message);
                if let Some(details) = &flow.details {
                    let _ = writeln!(stderr, "Details: {details}");
                }
                if !flow.suggestions.is_empty() {
                    let _ = writeln!(stderr, "Suggestions:");
                    for suggestion in &flow.suggestions {
                        let _ = writeln!(stderr, "  - {suggestion}");
                    }
                }
            } else {
                let _ = writeln!(stderr, "Error: {err:#}");
            }
        }
        OutputFormat::Json => {
            let doc = match err.downcast_ref::<FlowError>() {
                Some(flow) => serde_json::json!({ "error": flow }),
                None => serde_json::json!({
                    "error": { "code": "GIT_ERROR", "message": format!("{err:#}") }
                }),
            };
            eprintln!("{}", serde_json::to_string_pretty(&doc).unwrap_or_else(|_| "{}".into()));
        }
    }
}
