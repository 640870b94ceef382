//! Matching engine.
//!
//! Selects the stub mapping that answers a request: the first mapping in
//! (priority, registration order) whose pattern accepts the whole request.

use crate::registry::StubMapping;
use crate::request::RequestDescriptor;
use std::sync::Arc;
use tracing::trace;

/// Find the first mapping in `snapshot` that matches `request`.
///
/// `snapshot` must already be in match order, as returned by
/// [`StubRegistry::snapshot`](crate::registry::StubRegistry::snapshot).
pub fn find_match(
    snapshot: &[Arc<StubMapping>],
    request: &RequestDescriptor,
) -> Option<Arc<StubMapping>> {
    for mapping in snapshot {
        if mapping.matches(request) {
            trace!(stub_id = %mapping.id(), seq = mapping.seq(), "Stub matched");
            return Some(Arc::clone(mapping));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::ValueMatcher;
    use crate::pattern::RequestPattern;
    use crate::registry::{StubDefinition, StubRegistry};
    use crate::response::ResponseTemplate;

    fn request(method: &str, url: &str, headers: &[(&str, &str)], body: &'static str) -> RequestDescriptor {
        let headers = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RequestDescriptor::new(method, url, headers, body)
    }

    #[test]
    fn test_exact_url_with_query() {
        let registry = StubRegistry::new();
        let id = registry
            .register(StubDefinition::new(
                RequestPattern::get().url("/api/message?id=1"),
                ResponseTemplate::ok(),
            ))
            .unwrap();

        let snapshot = registry.snapshot();
        let hit = find_match(&snapshot, &request("GET", "/api/message?id=1", &[], ""));
        assert_eq!(hit.map(|m| m.id()), Some(id));
        assert!(find_match(&snapshot, &request("GET", "/api/message?id=2", &[], "")).is_none());
        assert!(find_match(&snapshot, &request("POST", "/api/message?id=1", &[], "")).is_none());
    }

    #[test]
    fn test_header_contains() {
        let registry = StubRegistry::new();
        registry
            .register(StubDefinition::new(
                RequestPattern::get()
                    .url("/api/message")
                    .header("Accept", ValueMatcher::containing("/json")),
                ResponseTemplate::ok(),
            ))
            .unwrap();
        let snapshot = registry.snapshot();

        let json = request(
            "GET",
            "/api/message",
            &[("Accept", "application/json;charset=UTF-8")],
            "",
        );
        assert!(find_match(&snapshot, &json).is_some());

        let text = request("GET", "/api/message", &[("Accept", "text/plain")], "");
        assert!(find_match(&snapshot, &text).is_none());

        let missing = request("GET", "/api/message", &[], "");
        assert!(find_match(&snapshot, &missing).is_none());
    }

    #[test]
    fn test_json_path_body() {
        let registry = StubRegistry::new();
        registry
            .register(StubDefinition::new(
                RequestPattern::post()
                    .url("/api/message")
                    .body(ValueMatcher::matching_json_path("$.message")),
                ResponseTemplate::ok(),
            ))
            .unwrap();
        let snapshot = registry.snapshot();

        let with = request("POST", "/api/message", &[], r#"{"message":"Hello World!"}"#);
        assert!(find_match(&snapshot, &with).is_some());
        let without = request("POST", "/api/message", &[], "{}");
        assert!(find_match(&snapshot, &without).is_none());
    }

    #[test]
    fn test_priority_beats_registration_order() {
        let registry = StubRegistry::new();
        registry
            .register(
                StubDefinition::new(RequestPattern::get().url("/p"), ResponseTemplate::ok())
                    .priority(5),
            )
            .unwrap();
        let winner = registry
            .register(
                StubDefinition::new(RequestPattern::get().url("/p"), ResponseTemplate::created())
                    .priority(1),
            )
            .unwrap();

        let snapshot = registry.snapshot();
        let req = request("GET", "/p", &[], "");
        for _ in 0..3 {
            assert_eq!(find_match(&snapshot, &req).map(|m| m.id()), Some(winner));
        }
    }

    #[test]
    fn test_equal_priority_first_registered_wins() {
        let registry = StubRegistry::new();
        let first = registry
            .register(StubDefinition::new(
                RequestPattern::get().url_path_pattern("/api/.*"),
                ResponseTemplate::ok(),
            ))
            .unwrap();
        registry
            .register(StubDefinition::new(
                RequestPattern::get().url_path("/api/message"),
                ResponseTemplate::created(),
            ))
            .unwrap();

        let hit = find_match(&registry.snapshot(), &request("GET", "/api/message", &[], ""));
        assert_eq!(hit.map(|m| m.id()), Some(first));
    }

    #[test]
    fn test_reset_leaves_no_match() {
        let registry = StubRegistry::new();
        registry
            .register(StubDefinition::new(RequestPattern::any(), ResponseTemplate::ok()))
            .unwrap();
        assert!(find_match(&registry.snapshot(), &request("DELETE", "/x", &[], "")).is_some());

        registry.reset();
        assert!(find_match(&registry.snapshot(), &request("DELETE", "/x", &[], "")).is_none());
    }
}
