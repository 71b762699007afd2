//! Message-Id extraction from threading headers

use once_cell::sync::Lazy;
use regex::Regex;

static MESSAGE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^<>\s]+>").expect("Invalid message-id regex"));

/// All bracketed ids in a header value, in order
pub fn extract_message_ids(header_value: &str) -> Vec<String> {
    MESSAGE_ID_RE
        .find_iter(header_value)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// First bracketed id, or the trimmed value when it has no brackets
pub fn extract_message_id(header_value: &str) -> Option<String> {
    if let Some(m) = MESSAGE_ID_RE.find(header_value) {
        return Some(m.as_str().to_string());
    }
    let trimmed = header_value.trim();
    if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Ancestor ids of a message: `References` in order, then the first
/// `In-Reply-To` id unless already listed. Duplicates and the message's own
/// id are dropped.
pub fn ancestor_ids(
    own_id: Option<&str>,
    references: Option<&str>,
    in_reply_to: Option<&str>,
) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();

    let candidates = references
        .map(extract_message_ids)
        .unwrap_or_default()
        .into_iter()
        .chain(in_reply_to.and_then(|v| extract_message_ids(v).into_iter().next()));

    for id in candidates {
        if Some(id.as_str()) == own_id || ids.contains(&id) {
            continue;
        }
        ids.push(id);
    }

    ids
}
