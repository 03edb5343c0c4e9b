//! Read-only views: `list`, `show` and `status`.

use std::cmp::Reverse;

use crate::context::Context;
use crate::exec::CancelToken;
use crate::output::{self, ticket_json, ticket_line, OutputFormat, Render};
use crate::store::{CurrentTicket, StatusFilter};
use crate::ticket::{Status, Ticket};

struct ListResult {
    tickets: Vec<Ticket>,
}

impl Render for ListResult {
    fn structured(&self) -> serde_json::Value {
        serde_json::json!({
            "tickets": self.tickets.iter().map(ticket_json).collect::<Vec<_>>(),
        })
    }

    fn text(&self) -> String {
        if self.tickets.is_empty() {
            return "No tickets".to_string();
        }
        self.tickets.iter().map(ticket_line).collect::<Vec<_>>().join("\n")
    }
}

struct TicketView {
    ticket: Ticket,
}

impl Render for TicketView {
    fn structured(&self) -> serde_json::Value {
        ticket_json(&self.ticket)
    }

    fn text(&self) -> String {
        let t = &self.ticket;
        let mut lines = vec![
            format!("ID: {}", t.id),
            format!("Status: {}", t.status()),
            format!("Priority: {}", t.meta.priority),
            format!("Description: {}", t.meta.description),
            format!("Created: {}", crate::ticket::format_timestamp(&t.meta.created_at)),
        ];
        if let Some(started) = &t.meta.started_at {
            lines.push(format!("Started: {}", crate::ticket::format_timestamp(started)));
        }
        if let Some(closed) = &t.meta.closed_at {
            lines.push(format!("Closed: {}", crate::ticket::format_timestamp(closed)));
        }
        if !t.meta.related.is_empty() {
            lines.push(format!("Related: {}", t.meta.related.join(", ")));
        }
        if let Some(reason) = &t.meta.close_reason {
            lines.push(format!("Close reason: {reason}"));
        }
        lines.push(String::new());
        lines.push(t.body.trim_start_matches('\n').to_string());
        lines.join("\n")
    }
}

struct StatusView {
    current: Option<Ticket>,
    todo: usize,
    doing: usize,
    done: usize,
}

impl Render for StatusView {
    fn structured(&self) -> serde_json::Value {
        serde_json::json!({
            "current_ticket": self.current.as_ref().map(ticket_json),
            "tickets": { "todo": self.todo, "doing": self.doing, "done": self.done },
        })
    }

    fn text(&self) -> String {
        let current = match &self.current {
            Some(t) => format!("Current ticket: {} ({})", t.id, t.meta.description),
            None => "No active ticket".to_string(),
        };
        format!(
            "{current}\nTickets: {} todo, {} doing, {} done",
            self.todo, self.doing, self.done
        )
    }
}

pub fn run_list(
    format: OutputFormat,
    cancel: CancelToken,
    filter: StatusFilter,
    count: Option<usize>,
) -> anyhow::Result<()> {
    let ctx = Context::resolve(cancel)?;
    let mut tickets = ctx.store.list(filter)?;
    sort_tickets(&mut tickets);
    if let Some(count) = count {
        tickets.truncate(count);
    }
    output::emit(format, &ListResult { tickets });
    Ok(())
}

/// Newest first within each status band; `done` orders by close time.
fn sort_tickets(tickets: &mut [Ticket]) {
    tickets.sort_by_key(|t| {
        let band = match t.status() {
            Status::Todo => 0,
            Status::Doing => 1,
            Status::Done => 2,
        };
        let closed = t.meta.closed_at.map(|c| c.timestamp()).unwrap_or(i64::MIN);
        (band, Reverse(closed), Reverse(t.id.clone()))
    });
}

pub fn run_show(format: OutputFormat, cancel: CancelToken, id: &str) -> anyhow::Result<()> {
    let ctx = Context::resolve(cancel)?;
    let ticket = ctx.store.get(id)?;
    output::emit(format, &TicketView { ticket });
    Ok(())
}

pub fn run_status(format: OutputFormat, cancel: CancelToken) -> anyhow::Result<()> {
    let ctx = Context::resolve(cancel)?;
    let current = match ctx.store.get_current()? {
        CurrentTicket::Ticket(t) => Some(t),
        _ => None,
    };
    let count = |filter| -> anyhow::Result<usize> { Ok(ctx.store.list(filter)?.len()) };
    let view = StatusView {
        current,
        todo: count(StatusFilter::Todo)?,
        doing: count(StatusFilter::Doing)?,
        done: count(StatusFilter::Done)?,
    };
    output::emit(format, &view);
    Ok(())
}
