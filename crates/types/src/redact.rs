//! Log-safe rendering of secrets.

/// Number of leading characters of a secret that may appear in logs.
pub const VISIBLE_PREFIX: usize = 7;

/// Keep the first [`VISIBLE_PREFIX`] characters of `secret` and mask the rest.
#[must_use]
pub fn redact(secret: &str) -> String {
    let mut chars = secret.chars();
    let prefix: String = chars.by_ref().take(VISIBLE_PREFIX).collect();
    if chars.next().is_some() {
        format!("{prefix}***")
    } else {
        prefix
    }
}
