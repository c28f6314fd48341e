//! Pure compaction rules for the context log.
//!
//! Two ways to shrink a conversation without breaking it:
//! - offloading oversized tool results to the [`ReferenceStore`]
//! - collapsing an old prefix of the conversation into a summary
//!
//! Both must keep the log a valid LLM conversation: every tool result is
//! preceded by the assistant message that issued its call.

use roundclaw_core::{Message, StoreError};
use std::collections::HashSet;
use std::ops::Range;

use crate::refs::{ReferenceStore, is_reference};

pub const SUMMARY_HEADER: &str = "[Conversation History Summary]";
pub const SUMMARY_FOOTER: &str = "[End of Summary, Recent Messages Follow]";

/// Wrap a summary so the model can tell it apart from real user input.
pub fn wrap_summary(summary: &str) -> String {
    format!("{SUMMARY_HEADER}\n{summary}\n{SUMMARY_FOOTER}")
}

/// Choose the prefix of `messages` to collapse into a summary.
///
/// The last `keep_recent` messages are retained. The cut is pushed forward
/// so that tool results of an assistant message just before it travel with
/// that message, and the span never starts with an orphaned tool result.
/// Returns `None` when the log is shorter than `min_messages` or nothing is
/// left to summarize.
///
/// The caller replaces the log with the summary followed by
/// `messages[range.end..]`.
pub fn select_summary_span(
    messages: &[Message],
    keep_recent: usize,
    min_messages: usize,
) -> Option<Range<usize>> {
    let len = messages.len();
    if len < min_messages || len <= keep_recent {
        return None;
    }

    let mut start = 0;
    let mut end = len - keep_recent;

    // An assistant right before the cut takes its tool results with it.
    if end > start {
        let prev = &messages[end - 1];
        if prev.has_tool_calls() {
            let ids: HashSet<&str> = prev.tool_calls().iter().map(|tc| tc.id.as_str()).collect();
            let mut matched = 0;
            let mut j = end;
            while j < len && matched < ids.len() {
                match &messages[j] {
                    Message::Tool { tool_call_id, .. } => {
                        if ids.contains(tool_call_id.as_str()) {
                            matched += 1;
                            end = j + 1;
                        }
                    }
                    Message::Assistant { .. } => break,
                    _ => {}
                }
                j += 1;
            }
        }
    }

    // A cut between two results of the same call batch drags the rest along,
    // otherwise the retained suffix would open with orphaned tool results.
    while end < len && matches!(messages[end], Message::Tool { .. }) {
        end += 1;
    }

    // Never open the span with an orphaned tool result: walk back to its
    // assistant if there is one, else skip forward past the orphans.
    if start < end && matches!(messages[start], Message::Tool { .. }) {
        if let Some(i) = (0..start).rev().find(|&i| messages[i].has_tool_calls()) {
            start = i;
        }
        while start < end && matches!(messages[start], Message::Tool { .. }) {
            start += 1;
        }
    }

    (start < end).then_some(start..end)
}

/// Indices of tool results whose call id is not issued by the nearest
/// preceding assistant message still present in the log.
pub fn orphaned_tool_results(messages: &[Message]) -> Vec<usize> {
    let mut orphans = Vec::new();
    let mut open_ids: HashSet<&str> = HashSet::new();
    for (i, msg) in messages.iter().enumerate() {
        match msg {
            Message::Assistant { tool_calls, .. } => {
                open_ids = tool_calls.iter().map(|tc| tc.id.as_str()).collect();
            }
            Message::Tool { tool_call_id, .. } => {
                if !open_ids.contains(tool_call_id.as_str()) {
                    orphans.push(i);
                }
            }
            _ => {}
        }
    }
    orphans
}

/// Offload an oversized tool result. Returns the replacement content, or
/// `None` when the content is small enough or already a reference.
///
/// A JSON envelope `{"success":…, "data":…, "err":…}` keeps its shape;
/// only `data` is replaced by the pointer.
pub fn compress_tool_content(
    content: &str,
    threshold_chars: usize,
    refs: &ReferenceStore,
) -> Result<Option<String>, StoreError> {
    let chars = content.chars().count();
    if chars <= threshold_chars || is_reference(content) {
        return Ok(None);
    }

    if let Some(mut envelope) = parse_envelope(content) {
        let data = match envelope.get("data") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        if data.is_empty() || is_reference(&data) {
            return Ok(None);
        }
        let pointer = refs.save(&data)?;
        envelope.insert(
            "data".to_string(),
            serde_json::Value::String(pointer_with_hint(&pointer, data.chars().count())),
        );
        let encoded = serde_json::to_string(&envelope).map_err(|e| StoreError::Encode(e.to_string()))?;
        return Ok(Some(encoded));
    }

    let pointer = refs.save(content)?;
    Ok(Some(pointer_with_hint(&pointer, chars)))
}

fn parse_envelope(content: &str) -> Option<serde_json::Map<String, serde_json::Value>> {
    match serde_json::from_str::<serde_json::Value>(content).ok()? {
        serde_json::Value::Object(map) if map.contains_key("success") && map.contains_key("data") => Some(map),
        _ => None,
    }
}

fn pointer_with_hint(pointer: &str, chars: usize) -> String {
    format!("{pointer} (tool output of {chars} chars offloaded; call load_ref with this ref to read it)")
}
