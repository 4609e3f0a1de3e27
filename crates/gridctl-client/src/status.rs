//! Status text parsing.
//!
//! The controller reports node status as free-form text. These functions
//! are the whole contract the client relies on: a few sentinels, two
//! `key: value` style lines, and role names appearing as substrings.

use std::sync::LazyLock;

use regex::Regex;

/// Returned by the controller when the shared secret does not match.
pub const BAD_SECRET: &str = "false: bad secret";

/// Returned by the controller when it cannot service a request yet.
pub const NOT_READY: &str = "false: not ready yet";

/// Published as the database address until the database is up.
pub const DATABASE_PLACEHOLDER: &str = "not-up-yet";

static DATABASE_AT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Database is at (\S+)").expect("database pattern is valid"));

static CURRENT_STATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Current State: (.+)").expect("state pattern is valid"));

/// Whether the controller rejected our secret.
pub fn is_bad_secret(status: &str) -> bool {
    status == BAD_SECRET
}

/// Whether the controller answered that it is not ready yet.
pub fn is_not_ready(response: &str) -> bool {
    response == NOT_READY
}

/// The database host published in a status report, if it is up.
///
/// Looks for `Database is at <host>` and ignores the placeholder.
pub fn database_host(status: &str) -> Option<String> {
    let host = DATABASE_AT.captures(status)?.get(1)?.as_str();
    if host == DATABASE_PLACEHOLDER {
        return None;
    }
    Some(host.to_string())
}

/// The `Current State:` line of a status report.
pub fn current_state(status: &str) -> Option<String> {
    let state = CURRENT_STATE.captures(status)?.get(1)?.as_str().trim();
    (!state.is_empty()).then(|| state.to_string())
}

/// Roles from `targets` that do not appear anywhere in `status`.
pub fn missing_roles<'a, S: AsRef<str>>(status: &str, targets: &'a [S]) -> Vec<&'a str> {
    targets
        .iter()
        .map(|role| role.as_ref())
        .filter(|role| !status.contains(*role))
        .collect()
}
