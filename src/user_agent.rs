//! Shared User-Agent string for catalog, archive and page image requests.

/// Project URL for User-Agent identification (RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fierce/chapterdl";

/// Default User-Agent for every request the crate sends.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("chapterdl/{version} (+{PROJECT_UA_URL})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_carries_version_and_project_url() {
        let ua = default_user_agent();
        assert!(ua.contains(PROJECT_UA_URL), "UA must contain project URL: {ua}");
        assert_eq!(
            ua.strip_prefix("chapterdl/")
                .and_then(|s| s.split(' ').next()),
            Some(env!("CARGO_PKG_VERSION")),
            "UA must contain crate version: {ua}"
        );
    }
}
