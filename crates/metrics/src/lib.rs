//! Metric definitions for skylark.
//!
//! Crates record through the re-exported `metrics` macros using the names
//! defined here, behind their own `metrics` feature. Installing a recorder is
//! left to the host application; without one, recording is a no-op.

pub use metrics::{counter, describe_counter, gauge, histogram};

/// Sign-in and token lifecycle.
pub mod oauth {
    pub const LOGINS_TOTAL: &str = "skylark_oauth_logins_total";
    pub const LOGIN_FAILURES_TOTAL: &str = "skylark_oauth_login_failures_total";
    pub const REFRESHES_TOTAL: &str = "skylark_oauth_refreshes_total";
    pub const REFRESH_FAILURES_TOTAL: &str = "skylark_oauth_refresh_failures_total";
    pub const DISCOVERY_RETRIES_TOTAL: &str = "skylark_oauth_discovery_retries_total";
}

/// Chat requests against the upstream model API.
pub mod chat {
    pub const REQUESTS_TOTAL: &str = "skylark_chat_requests_total";
    pub const REQUEST_FAILURES_TOTAL: &str = "skylark_chat_request_failures_total";
}

const DESCRIPTIONS: &[(&str, &str)] = &[
    (oauth::LOGINS_TOTAL, "Interactive sign-ins that produced a token"),
    (oauth::LOGIN_FAILURES_TOTAL, "Interactive sign-ins that failed"),
    (oauth::REFRESHES_TOTAL, "Successful silent token refreshes"),
    (oauth::REFRESH_FAILURES_TOTAL, "Failed silent token refreshes"),
    (oauth::DISCOVERY_RETRIES_TOTAL, "Retried provider metadata requests"),
    (chat::REQUESTS_TOTAL, "Chat requests sent upstream"),
    (chat::REQUEST_FAILURES_TOTAL, "Chat requests that failed"),
];

/// Register descriptions for every skylark metric with the installed recorder.
pub fn describe() {
    for &(name, help) in DESCRIPTIONS {
        describe_counter!(name, help);
    }
}
