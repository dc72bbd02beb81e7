//! Malformed JSON repair
//!
//! Upstream providers occasionally emit payloads that *should* be JSON but do
//! not parse: raw newlines inside string values, a doubled opening brace on
//! `event_data`, `https: //` links, `\'` escapes and HTML anchors whose
//! attribute quotes close the surrounding JSON string early.
//!
//! Repair is strictly textual and best-effort. The original text is parsed
//! first; only when that fails is the ordered fix pipeline applied and the
//! result parsed once more. If the second attempt fails too, the caller gets
//! the **original** parse error.
//!
//! Fix order matters: control-character escaping relies on intact string
//! boundaries, so it runs before any structural rewrite.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error_handling::RelayError;
use crate::logging::{preview, snippet_around};

static EVENT_DATA_DOUBLE_BRACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""event_data"\s*:\s*\{\s*\{"#).expect("static regex"));

static ANCHOR_OPEN_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<a\s[^>]*>").expect("static regex"));

static DOUBLE_QUOTED_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*"([^"]*)""#).expect("static regex")
});

const SNIPPET_RADIUS: usize = 60;

/// A single textual rewrite in the repair pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Fix {
    ControlCharacters,
    DoubleBrace,
    UrlSpace,
    EscapedSingleQuote,
    HtmlAnchorQuotes,
}

impl Fix {
    pub fn as_str(&self) -> &'static str {
        match self {
            Fix::ControlCharacters => "control_characters",
            Fix::DoubleBrace => "double_brace",
            Fix::UrlSpace => "url_space",
            Fix::EscapedSingleQuote => "escaped_single_quote",
            Fix::HtmlAnchorQuotes => "html_anchor_quotes",
        }
    }
}

/// Text that parsed as JSON, possibly after repair
#[derive(Debug, Clone)]
pub struct RepairedPayload {
    pub value: Value,
    /// Rewritten text; `None` when the input parsed untouched
    pub repaired_text: Option<String>,
    pub applied_fixes: Vec<Fix>,
}

impl RepairedPayload {
    pub fn was_repaired(&self) -> bool {
        self.repaired_text.is_some()
    }
}

/// Both parse failures of an unrepairable payload. Displays the original.
#[derive(Debug, thiserror::Error)]
#[error("{original}")]
pub struct RepairError {
    #[source]
    pub original: serde_json::Error,
    pub after_fix: serde_json::Error,
}

impl From<RepairError> for RelayError {
    fn from(err: RepairError) -> Self {
        RelayError::repair(
            format!("payload is not valid JSON after repair (after fix: {})", err.after_fix),
            err.original,
        )
    }
}

/// Parse `text`, repairing it if needed. On failure the original parse error is returned.
pub fn repair(text: &str) -> Result<Value, serde_json::Error> {
    repair_payload(text).map(|p| p.value).map_err(|e| e.original)
}

pub fn repair_payload(text: &str) -> Result<RepairedPayload, RepairError> {
    let original = match serde_json::from_str::<Value>(text) {
        Ok(value) => {
            return Ok(RepairedPayload {
                value,
                repaired_text: None,
                applied_fixes: Vec::new(),
            })
        }
        Err(e) => e,
    };

    let (fixed, applied_fixes) = apply_fixes(text);
    let fix_names: Vec<&str> = applied_fixes.iter().map(Fix::as_str).collect();

    match serde_json::from_str::<Value>(&fixed) {
        Ok(value) => {
            warn!(
                original_error = %original,
                fixes = ?fix_names,
                payload = %preview(text, 512),
                "repaired malformed JSON payload"
            );
            Ok(RepairedPayload {
                value,
                repaired_text: Some(fixed),
                applied_fixes,
            })
        }
        Err(after_fix) => {
            error!(
                original_error = %original,
                original_snippet =
                    %snippet_around(text, error_offset(text, &original), SNIPPET_RADIUS),
                after_fix_error = %after_fix,
                after_fix_snippet =
                    %snippet_around(&fixed, error_offset(&fixed, &after_fix), SNIPPET_RADIUS),
                fixes = ?fix_names,
                "unable to repair JSON payload"
            );
            Err(RepairError { original, after_fix })
        }
    }
}

/// Run every fix in order, returning the rewritten text and the fixes that changed it
pub fn apply_fixes(text: &str) -> (String, Vec<Fix>) {
    let steps: [(Fix, fn(&str) -> Cow<'_, str>); 5] = [
        (Fix::ControlCharacters, escape_control_characters),
        (Fix::DoubleBrace, collapse_double_brace),
        (Fix::UrlSpace, fix_url_spaces),
        (Fix::EscapedSingleQuote, unescape_single_quotes),
        (Fix::HtmlAnchorQuotes, fix_anchor_quotes),
    ];

    let mut current = text.to_string();
    let mut applied = Vec::new();
    for (fix, step) in steps {
        let next = match step(&current) {
            Cow::Owned(next) => next,
            Cow::Borrowed(_) => continue,
        };
        if next != current {
            debug!(fix = fix.as_str(), "applied JSON fix");
            applied.push(fix);
            current = next;
        }
    }
    (current, applied)
}

/// Escape raw 0x00-0x1F characters that sit inside quoted strings.
/// Control characters between tokens are valid whitespace and stay as they are.
pub fn escape_control_characters(text: &str) -> Cow<'_, str> {
    let needs_work = text.chars().any(|c| (c as u32) < 0x20);
    if !needs_work {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + 16);
    let mut in_string = false;
    let mut escaped = false;
    let mut changed = false;

    for c in text.chars() {
        if !in_string {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
            continue;
        }

        if escaped {
            escaped = false;
            out.push(c);
            continue;
        }

        match c {
            '\\' => {
                escaped = true;
                out.push(c);
            }
            '"' => {
                in_string = false;
                out.push(c);
            }
            c if (c as u32) < 0x20 => {
                changed = true;
                match c {
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    '\t' => out.push_str("\\t"),
                    '\u{08}' => out.push_str("\\b"),
                    '\u{0C}' => out.push_str("\\f"),
                    other => out.push_str(&format!("\\u{:04x}", other as u32)),
                }
            }
            _ => out.push(c),
        }
    }

    if changed {
        Cow::Owned(out)
    } else {
        Cow::Borrowed(text)
    }
}

/// Collapse `"event_data": {{` to a single brace, then drop the surplus trailing `}`.
pub fn collapse_double_brace(text: &str) -> Cow<'_, str> {
    if !EVENT_DATA_DOUBLE_BRACE.is_match(text) {
        return Cow::Borrowed(text);
    }

    let collapsed = EVENT_DATA_DOUBLE_BRACE
        .replace_all(text, r#""event_data": {"#)
        .into_owned();
    Cow::Owned(strip_excess_closing_braces(collapsed))
}

/// Remove exactly the surplus `}` when they form one contiguous run at the end
fn strip_excess_closing_braces(text: String) -> String {
    let opening = text.matches('{').count();
    let closing = text.matches('}').count();
    if closing <= opening {
        return text;
    }

    let excess = closing - opening;
    let body = text.trim_end();
    let trailing_run = body.chars().rev().take_while(|c| *c == '}').count();

    if trailing_run < excess {
        warn!(
            excess,
            trailing_run,
            "excess closing braces are not contiguous at the end of the payload, leaving unbalanced"
        );
        return text;
    }

    let keep = body.len() - excess;
    let mut fixed = String::with_capacity(text.len() - excess);
    fixed.push_str(&body[..keep]);
    fixed.push_str(&text[body.len()..]);
    fixed
}

pub fn fix_url_spaces(text: &str) -> Cow<'_, str> {
    if !text.contains(": //") {
        return Cow::Borrowed(text);
    }
    Cow::Owned(text.replace("https: //", "https://").replace("http: //", "http://"))
}

/// Unconditional `\'` → `'`. This can corrupt an escaped backslash followed by a quote
/// inside nested encoded strings; accepted as a lossy heuristic.
pub fn unescape_single_quotes(text: &str) -> Cow<'_, str> {
    if !text.contains("\\'") {
        return Cow::Borrowed(text);
    }
    Cow::Owned(text.replace("\\'", "'"))
}

/// Rewrite `attr="value"` to `attr='value'` inside `<a ...>` opening tags
pub fn fix_anchor_quotes(text: &str) -> Cow<'_, str> {
    ANCHOR_OPEN_TAG.replace_all(text, |caps: &Captures| {
        DOUBLE_QUOTED_ATTR
            .replace_all(&caps[0], "${1}='${2}'")
            .into_owned()
    })
}

/// Byte offset of a serde_json error position (1-based line/column)
fn error_offset(text: &str, err: &serde_json::Error) -> usize {
    let line = err.line().max(1);
    let before: usize = text.split('\n').take(line - 1).map(|l| l.len() + 1).sum();
    before + err.column().saturating_sub(1)
}
