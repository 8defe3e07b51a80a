//! Remote error classification.

use quotaguard_core::{ErrorKind, RemoteError};

const THROTTLED: &[&str] = &["rate limit", "quota", "too many requests", "throttl", "429"];
const NOT_FOUND: &[&str] = &["not found", "does not exist", "404"];
const INVALID_INPUT: &[&str] = &["invalid", "argument"];
const TIMEOUT: &[&str] = &["timeout", "timed out"];
const NETWORK: &[&str] = &["network", "connection", "http", "502", "503"];

/// Assign an [`ErrorKind`] to a raw remote failure.
///
/// Matching is case-insensitive over the error text and checked in order:
/// rate limit, not found, invalid input, timeout, network. Anything else is
/// `Unknown`.
pub fn classify(error: &RemoteError) -> ErrorKind {
    let text = error.message.to_ascii_lowercase();
    let matches = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if matches(THROTTLED) {
        ErrorKind::Throttled
    } else if matches(NOT_FOUND) {
        ErrorKind::NotFound
    } else if matches(INVALID_INPUT) {
        ErrorKind::InvalidInput
    } else if matches(TIMEOUT) {
        ErrorKind::Timeout
    } else if matches(NETWORK) {
        ErrorKind::NetworkError
    } else {
        ErrorKind::Unknown
    }
}
