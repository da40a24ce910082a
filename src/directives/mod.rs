//! Streaming extraction of orchestrator control directives from PTY output.
//!
//! The parser is a pure function over `(sessionId, chunk, carryStore,
//! recentStore, dedupeWindowMs)`; it mutates the two stores in place and is
//! only ever driven from one fan-out subscriber per session, so it takes no
//! locks of its own.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::warn;

/// Per-session leftover bytes from an incomplete directive.
pub type CarryStore = HashMap<String, String>;

/// Per-session fingerprint → last-emitted-at, for dedupe.
pub type RecentStore = HashMap<String, HashMap<String, Instant>>;

/// Cap on how large a single session's carry is allowed to grow before it is
/// dropped outright.
pub const DEFAULT_CARRY_CAP_BYTES: usize = 65536;

/// Default dedupe window.
pub const DEFAULT_DEDUPE_WINDOW: Duration = Duration::from_millis(300_000);

const DISPATCH_MARKER: &str = "FYP_DISPATCH_JSON:";
const SEND_TASK_MARKER: &str = "FYP_SEND_TASK_JSON:";
const ANSWER_MARKER: &str = "FYP_ANSWER_QUESTION_JSON:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkerKind {
    Dispatch,
    SendTask,
    Answer,
}

impl MarkerKind {
    fn literal(self) -> &'static str {
        match self {
            Self::Dispatch => DISPATCH_MARKER,
            Self::SendTask => SEND_TASK_MARKER,
            Self::Answer => ANSWER_MARKER,
        }
    }

    fn fingerprint_tag(self) -> &'static str {
        match self {
            Self::Dispatch => "dispatch",
            Self::SendTask => "send-task",
            Self::Answer => "answer",
        }
    }

    fn all() -> [MarkerKind; 3] {
        [Self::Dispatch, Self::SendTask, Self::Answer]
    }
}

/// A dispatch-shaped directive: a `Dispatch` proper, or a `Send-task`
/// directive normalized into the same shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub target: String,
    pub text: String,
    pub interrupt: bool,
    pub include_bootstrap_if_present: bool,
}

/// An orchestrator question answer.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionAnswer {
    pub attention_id: Value,
    pub option_id: String,
    pub source: Option<String>,
    pub meta: Option<Value>,
}

/// What a single `parse_chunk` call produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutcome {
    pub dispatches: Vec<Dispatch>,
    pub question_answers: Vec<QuestionAnswer>,
}

/// Parse one byte chunk from a session's PTY output, extracting any
/// complete directives and updating `carry`/`recent` in place.
pub fn parse_chunk(
    session_id: &str,
    chunk: &[u8],
    carry: &mut CarryStore,
    recent: &mut RecentStore,
    dedupe_window: Duration,
) -> ParseOutcome {
    parse_chunk_with_cap(
        session_id,
        chunk,
        carry,
        recent,
        dedupe_window,
        DEFAULT_CARRY_CAP_BYTES,
    )
}

/// As [`parse_chunk`], with an explicit carry cap (config `carry_cap_bytes`).
pub fn parse_chunk_with_cap(
    session_id: &str,
    chunk: &[u8],
    carry: &mut CarryStore,
    recent: &mut RecentStore,
    dedupe_window: Duration,
    carry_cap_bytes: usize,
) -> ParseOutcome {
    let mut combined = carry.remove(session_id).unwrap_or_default();
    combined.push_str(&String::from_utf8_lossy(chunk));

    let mut outcome = ParseOutcome::default();
    let mut cursor = 0usize;
    let mut leftover: Option<String> = None;

    loop {
        let Some((marker_pos, kind)) = find_next_marker(&combined, cursor) else {
            leftover = partial_marker_tail(&combined[cursor..]);
            break;
        };

        let after_marker = marker_pos + kind.literal().len();
        let Some(brace_pos) = combined[after_marker..].find('{').map(|i| after_marker + i) else {
            // Marker seen but no opening brace yet (and nothing but
            // whitespace since): keep marker onward as carry.
            if combined[after_marker..].chars().all(char::is_whitespace) {
                leftover = Some(combined[marker_pos..].to_string());
            } else {
                // Whitespace broken by a non-brace, non-whitespace byte:
                // this marker occurrence can never complete. Drop it and
                // keep scanning past it.
                cursor = after_marker;
                continue;
            }
            break;
        };

        match find_balanced_end(&combined, brace_pos) {
            Some(end) => {
                let body = &combined[brace_pos..=end];
                if let Ok(value) = serde_json::from_str::<Value>(body) {
                    emit_directive(session_id, kind, value, recent, dedupe_window, &mut outcome);
                }
                cursor = end + 1;
            }
            None => {
                leftover = Some(combined[marker_pos..].to_string());
                break;
            }
        }
    }

    if let Some(tail) = leftover {
        if tail.len() > carry_cap_bytes {
            warn!(
                session_id,
                tail_len = tail.len(),
                cap = carry_cap_bytes,
                "directive carry exceeded cap, dropping"
            );
        } else {
            carry.insert(session_id.to_string(), tail);
        }
    }

    outcome
}

/// Find the earliest occurrence of any marker at or after `from`.
fn find_next_marker(haystack: &str, from: usize) -> Option<(usize, MarkerKind)> {
    MarkerKind::all()
        .into_iter()
        .filter_map(|kind| haystack[from..].find(kind.literal()).map(|i| (from + i, kind)))
        .min_by_key(|(pos, _)| *pos)
}

/// If the tail of the buffer could be the start of some marker (but isn't a
/// complete marker occurrence), return it so it's kept as carry. Otherwise
/// the tail can never contribute to a future directive and is discarded.
fn partial_marker_tail(tail: &str) -> Option<String> {
    let starts: Vec<usize> = tail.char_indices().map(|(i, _)| i).collect();
    for kind in MarkerKind::all() {
        let marker = kind.literal();
        for &start in &starts {
            let candidate = &tail[start..];
            if candidate.len() < marker.len() && marker.starts_with(candidate) {
                return Some(candidate.to_string());
            }
        }
    }
    None
}

/// Scan forward from an opening `{` at `open_idx` for its matching `}`,
/// tracking bracket depth and respecting JSON string literals and their
/// backslash escapes. Returns `None` if the chunk ends before the brace
/// closes.
fn find_balanced_end(s: &str, open_idx: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s[open_idx..].char_indices() {
        let idx = open_idx + i;
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

fn emit_directive(
    session_id: &str,
    kind: MarkerKind,
    value: Value,
    recent: &mut RecentStore,
    dedupe_window: Duration,
    outcome: &mut ParseOutcome,
) {
    let Value::Object(ref obj) = value else {
        return;
    };

    match kind {
        MarkerKind::Dispatch => {
            let (Some(target), Some(text)) = (str_field(obj, "target"), str_field(obj, "text"))
            else {
                return;
            };
            let interrupt = bool_field(obj, "interrupt").unwrap_or(false);
            if contains_placeholder(&text) {
                return;
            }
            if !record_if_fresh(session_id, kind, &value, recent, dedupe_window) {
                return;
            }
            outcome.dispatches.push(Dispatch {
                target,
                text,
                interrupt,
                include_bootstrap_if_present: false,
            });
        }
        MarkerKind::SendTask => {
            let (Some(target), Some(task)) = (str_field(obj, "target"), str_field(obj, "task"))
            else {
                return;
            };
            let interrupt = bool_field(obj, "interrupt").unwrap_or(false);
            let initialize = bool_field(obj, "initialize").unwrap_or(false);
            if contains_placeholder(&task) {
                return;
            }
            if !record_if_fresh(session_id, kind, &value, recent, dedupe_window) {
                return;
            }
            outcome.dispatches.push(Dispatch {
                target,
                text: task,
                interrupt,
                include_bootstrap_if_present: initialize,
            });
        }
        MarkerKind::Answer => {
            let Some(attention_id) = obj.get("attentionId").cloned() else {
                return;
            };
            let Some(option_id) = str_field(obj, "optionId") else {
                return;
            };
            if !record_if_fresh(session_id, kind, &value, recent, dedupe_window) {
                return;
            }
            outcome.question_answers.push(QuestionAnswer {
                attention_id,
                option_id,
                source: str_field(obj, "source"),
                meta: obj.get("meta").cloned(),
            });
        }
    }
}

fn str_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)?.as_str().map(str::to_string)
}

fn bool_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<bool> {
    obj.get(key)?.as_bool()
}

/// Angle-bracketed documentation placeholders such as `<prompt>`.
fn contains_placeholder(s: &str) -> bool {
    let mut chars = s.char_indices();
    while let Some((start, c)) = chars.next() {
        if c != '<' {
            continue;
        }
        if let Some(end) = s[start + 1..].find('>') {
            let inner = &s[start + 1..start + 1 + end];
            if !inner.is_empty() && !inner.contains(char::is_whitespace) {
                return true;
            }
        }
    }
    false
}

/// Canonical fingerprint: marker kind plus the payload serialized with
/// sorted keys, so semantically-identical payloads dedupe regardless of
/// field order.
fn fingerprint(kind: MarkerKind, value: &Value) -> String {
    let canonical = match value {
        Value::Object(obj) => {
            let sorted: BTreeMap<&String, &Value> = obj.iter().collect();
            serde_json::to_string(&sorted).unwrap_or_default()
        }
        other => other.to_string(),
    };
    format!("{}:{}", kind.fingerprint_tag(), canonical)
}

fn record_if_fresh(
    session_id: &str,
    kind: MarkerKind,
    value: &Value,
    recent: &mut RecentStore,
    dedupe_window: Duration,
) -> bool {
    let fp = fingerprint(kind, value);
    let now = Instant::now();
    let table = recent.entry(session_id.to_string()).or_default();
    if let Some(seen_at) = table.get(&fp) {
        if now.duration_since(*seen_at) < dedupe_window {
            return false;
        }
    }
    table.insert(fp, now);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stores() -> (CarryStore, RecentStore) {
        (CarryStore::new(), RecentStore::new())
    }

    #[test]
    fn single_line_dispatch() {
        let (mut carry, mut recent) = stores();
        let chunk = br#"FYP_DISPATCH_JSON: {"target":"worker:Worker A","text":"PING","interrupt":true}"#;
        let out = parse_chunk("s1", chunk, &mut carry, &mut recent, DEFAULT_DEDUPE_WINDOW);
        assert_eq!(out.dispatches.len(), 1);
        let d = &out.dispatches[0];
        assert_eq!(d.target, "worker:Worker A");
        assert_eq!(d.text, "PING");
        assert!(d.interrupt);
        assert!(carry.get("s1").is_none());
    }

    #[test]
    fn multiline_send_task_normalizes_to_dispatch() {
        let (mut carry, mut recent) = stores();
        let chunk = b"FYP_SEND_TASK_JSON:\n{\n  \"target\":\"worker:Worker A\",\n  \"task\":\"TASK: fix startup\\nSCOPE: server/src/app.ts\",\n  \"initialize\": true,\n  \"interrupt\": false\n}\n";
        let out = parse_chunk("s2", chunk, &mut carry, &mut recent, DEFAULT_DEDUPE_WINDOW);
        assert_eq!(out.dispatches.len(), 1);
        let d = &out.dispatches[0];
        assert_eq!(d.target, "worker:Worker A");
        assert!(d.include_bootstrap_if_present);
        assert!(d.text.contains("TASK: fix startup"));
        assert!(d.text.contains("SCOPE: server/src/app.ts"));
    }

    #[test]
    fn chunk_split_directive_completes_on_second_call() {
        let (mut carry, mut recent) = stores();
        let first = br#"FYP_DISPATCH_JSON: {"target":"worker:Worker A","text":"HEL"#;
        let second = br#"LO","interrupt":false}"#;
        let out1 = parse_chunk("s3", first, &mut carry, &mut recent, DEFAULT_DEDUPE_WINDOW);
        assert_eq!(out1.dispatches.len(), 0);
        assert!(carry.contains_key("s3"));
        let out2 = parse_chunk("s3", second, &mut carry, &mut recent, DEFAULT_DEDUPE_WINDOW);
        assert_eq!(out2.dispatches.len(), 1);
        assert_eq!(out2.dispatches[0].text, "HELLO");
        assert!(carry.get("s3").is_none());
    }

    #[test]
    fn question_answer_fields() {
        let (mut carry, mut recent) = stores();
        let chunk = b"FYP_ANSWER_QUESTION_JSON:\n{\n  \"attentionId\": 321,\n  \"optionId\": \"2\",\n  \"source\": \"orchestrator-auto\",\n  \"meta\": { \"reason\": \"safe default\" }\n}\n";
        let out = parse_chunk("s4", chunk, &mut carry, &mut recent, DEFAULT_DEDUPE_WINDOW);
        assert_eq!(out.question_answers.len(), 1);
        let qa = &out.question_answers[0];
        assert_eq!(qa.attention_id, Value::from(321));
        assert_eq!(qa.option_id, "2");
        assert_eq!(qa.source.as_deref(), Some("orchestrator-auto"));
        assert_eq!(
            qa.meta.as_ref().and_then(|m| m.get("reason")).and_then(Value::as_str),
            Some("safe default")
        );
    }

    #[test]
    fn placeholder_suppression() {
        let (mut carry, mut recent) = stores();
        let chunk = br#"FYP_DISPATCH_JSON: {"target":"all","text":"<prompt>"}"#;
        let out = parse_chunk("s5", chunk, &mut carry, &mut recent, DEFAULT_DEDUPE_WINDOW);
        assert_eq!(out.dispatches.len(), 0);
    }

    #[test]
    fn dedupe_drops_repeat_within_window() {
        let (mut carry, mut recent) = stores();
        let chunk = br#"FYP_DISPATCH_JSON: {"target":"worker:A","text":"PING"}"#;
        let out1 = parse_chunk("s6", chunk, &mut carry, &mut recent, DEFAULT_DEDUPE_WINDOW);
        assert_eq!(out1.dispatches.len(), 1);
        let out2 = parse_chunk("s6", chunk, &mut carry, &mut recent, DEFAULT_DEDUPE_WINDOW);
        assert_eq!(out2.dispatches.len(), 0);
    }

    #[test]
    fn dedupe_ignores_key_order() {
        let (mut carry, mut recent) = stores();
        let a = br#"FYP_DISPATCH_JSON: {"target":"worker:A","text":"PING"}"#;
        let b = br#"FYP_DISPATCH_JSON: {"text":"PING","target":"worker:A"}"#;
        let out1 = parse_chunk("s7", a, &mut carry, &mut recent, DEFAULT_DEDUPE_WINDOW);
        assert_eq!(out1.dispatches.len(), 1);
        let out2 = parse_chunk("s7", b, &mut carry, &mut recent, DEFAULT_DEDUPE_WINDOW);
        assert_eq!(out2.dispatches.len(), 0);
    }

    #[test]
    fn two_concatenated_directives_yield_two_outputs() {
        let (mut carry, mut recent) = stores();
        let chunk = [
            br#"FYP_DISPATCH_JSON: {"target":"worker:A","text":"ONE"}"#.as_slice(),
            br#"FYP_DISPATCH_JSON: {"target":"worker:B","text":"TWO"}"#.as_slice(),
        ]
        .concat();
        let out = parse_chunk("s8", &chunk, &mut carry, &mut recent, DEFAULT_DEDUPE_WINDOW);
        assert_eq!(out.dispatches.len(), 2);
        assert_eq!(out.dispatches[0].text, "ONE");
        assert_eq!(out.dispatches[1].text, "TWO");
    }

    #[test]
    fn carry_cap_drops_overlong_fragment() {
        let (mut carry, mut recent) = stores();
        let mut chunk = b"FYP_DISPATCH_JSON: {\"target\":\"x\",\"text\":\"".to_vec();
        chunk.extend(std::iter::repeat(b'a').take(100));
        let out = parse_chunk_with_cap("s9", &chunk, &mut carry, &mut recent, DEFAULT_DEDUPE_WINDOW, 32);
        assert_eq!(out.dispatches.len(), 0);
        assert!(carry.get("s9").is_none());
    }

    #[test]
    fn unrelated_text_is_not_retained() {
        let (mut carry, mut recent) = stores();
        let chunk = b"some ordinary program output with no markers at all\n";
        let out = parse_chunk("s10", chunk, &mut carry, &mut recent, DEFAULT_DEDUPE_WINDOW);
        assert_eq!(out.dispatches.len(), 0);
        assert!(carry.get("s10").is_none());
    }
}
