//! Ticket data model and frontmatter codec.
//!
//! A ticket is a Markdown file with YAML frontmatter between two `---`
//! fences. Identity is the filename stem (`YYMMDD-HHMMSS-<slug>`); status is
//! never stored, it is derived from the `started_at`/`closed_at` timestamps.
//! Timestamps are RFC3339 at second precision: sub-second input is accepted
//! but truncated on the next write.

use std::path::PathBuf;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, FixedOffset, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::FlowError;

pub const PARENT_PREFIX: &str = "parent:";

static SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9-]+$").expect("static regex"));
static ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{6}-\d{6}-[a-z0-9-]+$").expect("static regex"));

/// Validate a human-chosen slug.
pub fn validate_slug(slug: &str) -> Result<(), FlowError> {
    if slug.is_empty() || !SLUG_RE.is_match(slug) {
        return Err(FlowError::invalid_slug(slug));
    }
    Ok(())
}

/// Whether `s` has the shape of a ticket id. Branch names are matched
/// against this when deciding if the current branch is a ticket branch.
pub fn is_ticket_id(s: &str) -> bool {
    ID_RE.is_match(s)
}

/// Synthesize a ticket id from the creation instant (UTC) and a slug.
pub fn new_id(slug: &str, now: DateTime<Utc>) -> String {
    format!("{}-{}", now.format("%y%m%d-%H%M%S"), slug)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Todo,
    Doing,
    Done,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Todo => "todo",
            Status::Doing => "doing",
            Status::Done => "done",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable ticket metadata, serialized as YAML frontmatter.
///
/// Field order here is the emitted key order. `started_at`/`closed_at` are
/// always written (as `null` when unset) while `related`/`close_reason` are
/// omitted when empty; readers accept both shapes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metadata {
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default)]
    pub description: String,
    #[serde(with = "rfc3339")]
    pub created_at: DateTime<FixedOffset>,
    #[serde(default, with = "rfc3339_opt")]
    pub started_at: Option<DateTime<FixedOffset>>,
    #[serde(default, with = "rfc3339_opt")]
    pub closed_at: Option<DateTime<FixedOffset>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,
}

fn default_priority() -> i64 {
    2
}

impl Metadata {
    pub fn new(created_at: DateTime<FixedOffset>) -> Self {
        Metadata {
            priority: default_priority(),
            description: String::new(),
            created_at,
            started_at: None,
            closed_at: None,
            related: Vec::new(),
            close_reason: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ticket {
    pub id: String,
    /// Absolute path of the ticket file in its status directory.
    pub path: PathBuf,
    pub meta: Metadata,
    /// Everything after the closing frontmatter fence, verbatim.
    pub body: String,
}

impl Ticket {
    /// Status derived purely from timestamps.
    pub fn status(&self) -> Status {
        if self.meta.closed_at.is_some() {
            Status::Done
        } else if self.meta.started_at.is_some() {
            Status::Doing
        } else {
            Status::Todo
        }
    }

    /// Work duration: `closed_at - started_at`, clamped at zero for
    /// inverted timestamps. `None` unless both timestamps are set.
    pub fn duration(&self) -> Option<Duration> {
        let started = self.meta.started_at?;
        let closed = self.meta.closed_at?;
        Some((closed - started).max(Duration::zero()))
    }

    /// First `parent:` entry in `related`, if any.
    pub fn parent(&self) -> Option<&str> {
        self.meta
            .related
            .iter()
            .find_map(|r| r.strip_prefix(PARENT_PREFIX))
    }

    pub fn has_parent(&self, parent_id: &str) -> bool {
        self.parent() == Some(parent_id)
            || self
                .meta
                .related
                .iter()
                .any(|r| r.strip_prefix(PARENT_PREFIX) == Some(parent_id))
    }

    /// The human-chosen tail of the id.
    pub fn slug(&self) -> &str {
        // id shape is validated on the way in; the two date segments are
        // fixed-width
        self.id.get(14..).unwrap_or(&self.id)
    }
}

/// Render a duration the way results display it: days/hours/minutes, zero
/// as `0m`, negative as `0s`.
pub fn format_duration(d: Duration) -> String {
    if d < Duration::zero() {
        return "0s".to_string();
    }
    let total_minutes = d.num_minutes();
    let days = total_minutes / (24 * 60);
    let hours = (total_minutes % (24 * 60)) / 60;
    let minutes = total_minutes % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if parts.is_empty() {
        return "0m".to_string();
    }
    parts.join(" ")
}

/// Parse an RFC3339 timestamp, truncating any sub-second precision.
pub fn parse_timestamp(s: &str) -> Result<DateTime<FixedOffset>, chrono::ParseError> {
    use chrono::Timelike;
    let dt = DateTime::parse_from_rfc3339(s.trim())?;
    Ok(dt.with_nanosecond(0).expect("zero nanoseconds is valid"))
}

/// Format a timestamp the way frontmatter stores it: RFC3339, whole
/// seconds, numeric offset.
pub fn format_timestamp(dt: &DateTime<FixedOffset>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, false)
}

mod rfc3339 {
    use super::*;
    use serde::Deserializer;

    pub fn serialize<S: serde::Serializer>(
        dt: &DateTime<FixedOffset>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_timestamp(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<FixedOffset>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

mod rfc3339_opt {
    use super::*;
    use serde::Deserializer;

    pub fn serialize<S: serde::Serializer>(
        dt: &Option<DateTime<FixedOffset>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => serializer.serialize_some(&format_timestamp(dt)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<FixedOffset>>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) => parse_timestamp(&s).map(Some).map_err(serde::de::Error::custom),
        }
    }
}

/// Split a ticket file into frontmatter and body.
pub fn parse_content(content: &str, id: &str) -> Result<(Metadata, String), FlowError> {
    let rest = content
        .strip_prefix("---\n")
        .ok_or_else(|| FlowError::ticket_invalid(id, "missing frontmatter opening fence"))?;
    let fence = rest
        .find("\n---\n")
        .ok_or_else(|| FlowError::ticket_invalid(id, "missing frontmatter closing fence"))?;
    let yaml = &rest[..fence + 1];
    let body = &rest[fence + 5..];

    let meta: Metadata = serde_yaml::from_str(yaml)
        .map_err(|e| FlowError::ticket_invalid(id, format!("frontmatter: {e}")))?;
    Ok((meta, body.to_string()))
}

/// Serialize frontmatter and body back into file content. Key order is
/// stable (struct field order) so diffs stay minimal.
pub fn serialize_content(meta: &Metadata, body: &str) -> Result<String, FlowError> {
    let yaml = serde_yaml::to_string(meta)
        .map_err(|e| FlowError::validation(format!("failed to serialize frontmatter: {e}")))?;
    Ok(format!("---\n{yaml}---\n{body}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(s: &str) -> DateTime<FixedOffset> {
        parse_timestamp(s).unwrap()
    }

    fn sample_ticket() -> Ticket {
        Ticket {
            id: "240101-100000-add-auth".to_string(),
            path: PathBuf::from("/p/tickets/todo/240101-100000-add-auth.md"),
            meta: Metadata::new(ts("2024-01-01T10:00:00+00:00")),
            body: "\n# Summary\n".to_string(),
        }
    }

    #[test]
    fn test_slug_validation() {
        assert!(validate_slug("add-logging").is_ok());
        assert!(validate_slug("fix2").is_ok());
        assert!(validate_slug("").is_err());
        assert!(validate_slug("Add-Logging").is_err());
        assert!(validate_slug("with space").is_err());
        assert!(validate_slug("uns@fe").is_err());
    }

    #[test]
    fn test_id_shape() {
        assert!(is_ticket_id("240101-100000-add-auth"));
        assert!(is_ticket_id("991231-235959-x"));
        assert!(!is_ticket_id("main"));
        assert!(!is_ticket_id("240101-add-auth"));
        assert!(!is_ticket_id("240101-100000-"));
    }

    #[test]
    fn test_new_id_uses_utc_seconds() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 9).unwrap();
        assert_eq!(new_id("add-auth", now), "240305-143009-add-auth");
    }

    #[test]
    fn test_status_derivation() {
        let mut t = sample_ticket();
        assert_eq!(t.status(), Status::Todo);
        t.meta.started_at = Some(ts("2024-01-01T11:00:00+00:00"));
        assert_eq!(t.status(), Status::Doing);
        t.meta.closed_at = Some(ts("2024-01-01T12:00:00+00:00"));
        assert_eq!(t.status(), Status::Done);
    }

    #[test]
    fn test_duration_and_clamping() {
        let mut t = sample_ticket();
        assert_eq!(t.duration(), None);
        t.meta.started_at = Some(ts("2024-01-01T10:00:00Z"));
        t.meta.closed_at = Some(ts("2024-01-01T12:30:00Z"));
        assert_eq!(t.duration(), Some(Duration::minutes(150)));

        // inverted timestamps clamp to zero
        t.meta.closed_at = Some(ts("2024-01-01T09:00:00Z"));
        assert_eq!(t.duration(), Some(Duration::zero()));
    }

    #[test]
    fn test_format_duration_boundaries() {
        assert_eq!(format_duration(Duration::zero()), "0m");
        assert_eq!(format_duration(Duration::hours(25)), "1d 1h");
        assert_eq!(format_duration(Duration::minutes(24 * 60 + 30)), "1d 30m");
        assert_eq!(format_duration(Duration::minutes(59)), "59m");
        assert_eq!(format_duration(Duration::minutes(150)), "2h 30m");
        assert_eq!(format_duration(Duration::seconds(-5)), "0s");
    }

    #[test]
    fn test_parent_extraction() {
        let mut t = sample_ticket();
        assert_eq!(t.parent(), None);
        t.meta.related = vec![
            "blocks:999999-000000-other".to_string(),
            "parent:240101-090000-base".to_string(),
            "parent:240101-080000-older".to_string(),
        ];
        assert_eq!(t.parent(), Some("240101-090000-base"));
        assert!(t.has_parent("240101-080000-older"));
        assert!(!t.has_parent("main"));
    }

    #[test]
    fn test_roundtrip_preserves_semantics() {
        let mut t = sample_ticket();
        t.meta.description = "add structured logging".to_string();
        t.meta.started_at = Some(ts("2024-01-01T11:00:00+09:00"));
        t.meta.related = vec!["parent:240101-090000-base".to_string()];
        let content = serialize_content(&t.meta, &t.body).unwrap();
        let (meta, body) = parse_content(&content, &t.id).unwrap();
        assert_eq!(meta, t.meta);
        assert_eq!(body, t.body);

        // serializing again is byte-stable
        assert_eq!(serialize_content(&meta, &body).unwrap(), content);
    }

    #[test]
    fn test_subseconds_truncate_on_write() {
        let content = "---\npriority: 1\ndescription: \"\"\ncreated_at: 2024-01-01T10:00:00.123456+00:00\nstarted_at: null\nclosed_at: null\n---\n";
        let (meta, _) = parse_content(content, "x").unwrap();
        assert_eq!(format_timestamp(&meta.created_at), "2024-01-01T10:00:00+00:00");
    }

    #[test]
    fn test_reader_accepts_omitted_and_null_fields() {
        let nulls = "---\ncreated_at: 2024-01-01T10:00:00+00:00\nstarted_at: null\nclosed_at: null\n---\nbody\n";
        let (meta, body) = parse_content(nulls, "x").unwrap();
        assert_eq!(meta.priority, 2);
        assert_eq!(meta.started_at, None);
        assert!(meta.related.is_empty());
        assert_eq!(body, "body\n");

        let omitted = "---\ncreated_at: 2024-01-01T10:00:00+00:00\n---\n";
        let (meta, _) = parse_content(omitted, "x").unwrap();
        assert_eq!(meta.closed_at, None);
        assert_eq!(meta.close_reason, None);
    }

    #[test]
    fn test_emitted_key_order_is_stable() {
        let meta = Metadata::new(ts("2024-01-01T10:00:00+00:00"));
        let content = serialize_content(&meta, "").unwrap();
        let priority = content.find("priority:").unwrap();
        let description = content.find("description:").unwrap();
        let created = content.find("created_at:").unwrap();
        let started = content.find("started_at:").unwrap();
        let closed = content.find("closed_at:").unwrap();
        assert!(priority < description && description < created);
        assert!(created < started && started < closed);
        // empty related / close_reason are omitted entirely
        assert!(!content.contains("related:"));
        assert!(!content.contains("close_reason:"));
    }

    #[test]
    fn test_missing_fence_is_invalid() {
        assert!(parse_content("# no frontmatter\n", "x").is_err());
        assert!(parse_content("---\npriority: 1\n", "x").is_err());
    }
}
