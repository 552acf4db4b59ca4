use super::types::TerminalStatus;

/// Maximum stored length of a raw gateway response
pub const MAX_RESPONSE_LEN: usize = 2000;

/// Marker appended to truncated responses
const TRUNCATION_MARKER: &str = "... [truncated]";

/// Classify a raw gateway response into a terminal status.
///
/// Pure, total, case-insensitive substring match. A response mentioning a
/// disconnect must not be misread as online even if both substrings appear;
/// disconnect is the more urgent signal, so it wins.
pub fn classify(text: &str) -> TerminalStatus {
    if text.is_empty() {
        return TerminalStatus::Unknown;
    }

    let lower = text.to_lowercase();

    if lower.contains("disconnect") {
        TerminalStatus::Disconnect
    } else if lower.contains("online") {
        TerminalStatus::Online
    } else if lower.contains("offline") {
        TerminalStatus::Offline
    } else {
        TerminalStatus::Unknown
    }
}

/// Truncate a response body for storage.
///
/// Counts characters rather than bytes so a multi-byte response is never
/// split inside a codepoint.
pub fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_len).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}
