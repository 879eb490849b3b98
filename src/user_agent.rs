//! Shared User-Agent string for archive requests.
//!
//! Single source for project URL and UA format so all traffic from this crate
//! identifies itself consistently (good citizenship; RFC 9308).

/// Project URL for User-Agent identification (good citizenship; RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fierce/fanarchive";

/// Default User-Agent for archive requests (identifies the tool).
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("fanarchive/{version} (archive-client-library; +{PROJECT_UA_URL})")
}
