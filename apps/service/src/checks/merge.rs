use super::types::Outcome;

/// Two-pass merge rule.
///
/// The re-probe result replaces the first-pass outcome only when it carries a
/// credible answer (Online/Offline). Anything else keeps the first
/// observation, so an informative first error is never swapped for a second
/// error with different text.
pub fn merge(first: Outcome, second: Option<Outcome>) -> Outcome {
    match second {
        Some(second) if second.status.is_credible() => second,
        _ => first,
    }
}
