//! Admin endpoints under `/__admin`.
//!
//! - `GET /__admin/mappings`: list registered stubs in match order
//! - `POST /__admin/mappings`: register a JSON stub definition
//! - `DELETE /__admin/mappings`, `POST /__admin/reset`: remove every stub
//! - `DELETE /__admin/mappings/{id}`: remove one stub

use crate::registry::{StubDefinition, StubRegistry};
use crate::request::RequestDescriptor;
use crate::response::RenderedResponse;
use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

pub const ADMIN_PREFIX: &str = "/__admin";

pub fn is_admin_path(path: &str) -> bool {
    path == ADMIN_PREFIX || path.starts_with("/__admin/")
}

#[derive(Debug, Serialize)]
struct MappingList<'a> {
    mappings: Vec<&'a StubDefinition>,
    total: usize,
}

#[derive(Debug, Serialize)]
struct Created {
    id: Uuid,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Route an admin request against the registry.
pub fn handle(registry: &StubRegistry, request: &RequestDescriptor) -> RenderedResponse {
    let method = request.method();
    let path = request.path().trim_end_matches('/');
    debug!(method, path, "Admin request");

    match (method, path) {
        ("GET", "/__admin/mappings") => list_mappings(registry),
        ("POST", "/__admin/mappings") => create_mapping(registry, request.body()),
        ("DELETE", "/__admin/mappings") | ("POST", "/__admin/reset") => {
            registry.reset();
            json_response(200, &serde_json::json!({}))
        }
        ("DELETE", _) if path.starts_with("/__admin/mappings/") => {
            delete_mapping(registry, &path["/__admin/mappings/".len()..])
        }
        _ => json_response(
            404,
            &ErrorBody {
                error: format!("no admin route for {} {}", method, path),
            },
        ),
    }
}

fn list_mappings(registry: &StubRegistry) -> RenderedResponse {
    let snapshot = registry.snapshot();
    let list = MappingList {
        mappings: snapshot.iter().map(|m| m.definition()).collect(),
        total: snapshot.len(),
    };
    json_response(200, &list)
}

fn create_mapping(registry: &StubRegistry, body: &[u8]) -> RenderedResponse {
    let definition: StubDefinition = match serde_json::from_slice(body) {
        Ok(definition) => definition,
        Err(e) => {
            return json_response(
                400,
                &ErrorBody {
                    error: format!("invalid stub definition: {}", e),
                },
            )
        }
    };

    match registry.register(definition) {
        Ok(id) => {
            info!(stub_id = %id, "Stub registered via admin API");
            json_response(201, &Created { id })
        }
        Err(e) => json_response(
            400,
            &ErrorBody {
                error: e.to_string(),
            },
        ),
    }
}

fn delete_mapping(registry: &StubRegistry, raw_id: &str) -> RenderedResponse {
    let removed = Uuid::parse_str(raw_id)
        .map(|id| registry.remove(id))
        .unwrap_or(false);
    if removed {
        json_response(200, &serde_json::json!({}))
    } else {
        json_response(
            404,
            &ErrorBody {
                error: format!("no stub mapping with id {}", raw_id),
            },
        )
    }
}

fn json_response<T: Serialize>(status: u16, body: &T) -> RenderedResponse {
    match serde_json::to_vec(body) {
        Ok(bytes) => RenderedResponse {
            status,
            reason: None,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Bytes::from(bytes),
        },
        Err(e) => RenderedResponse::text(500, format!("failed to serialize response: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::RequestPattern;
    use crate::response::ResponseTemplate;

    fn admin(method: &str, path: &str, body: &str) -> RequestDescriptor {
        RequestDescriptor::new(method, path, Vec::new(), body.to_string())
    }

    fn body_json(response: &RenderedResponse) -> serde_json::Value {
        serde_json::from_slice(&response.body).unwrap()
    }

    #[test]
    fn test_is_admin_path() {
        assert!(is_admin_path("/__admin"));
        assert!(is_admin_path("/__admin/mappings"));
        assert!(!is_admin_path("/__administrator"));
        assert!(!is_admin_path("/api/message"));
    }

    #[test]
    fn test_create_and_list() {
        let registry = StubRegistry::new();
        let body = r#"{
            "request": {"method": "GET", "url": "/api/message"},
            "response": {"status": 200, "body": {"type": "text", "content": "Hello"}}
        }"#;

        let created = handle(&registry, &admin("POST", "/__admin/mappings", body));
        assert_eq!(created.status, 201);
        let id = body_json(&created)["id"].as_str().unwrap().to_string();

        let listed = handle(&registry, &admin("GET", "/__admin/mappings", ""));
        assert_eq!(listed.status, 200);
        let json = body_json(&listed);
        assert_eq!(json["total"], 1);
        assert_eq!(json["mappings"][0]["id"], id.as_str());
        assert_eq!(json["mappings"][0]["request"]["url"], "/api/message");
    }

    #[test]
    fn test_create_rejects_invalid() {
        let registry = StubRegistry::new();

        let malformed = handle(&registry, &admin("POST", "/__admin/mappings", "{"));
        assert_eq!(malformed.status, 400);

        let conflicting = r#"{"request": {"url": "/a", "url_path": "/a"}}"#;
        let rejected = handle(&registry, &admin("POST", "/__admin/mappings", conflicting));
        assert_eq!(rejected.status, 400);
        assert!(body_json(&rejected)["error"]
            .as_str()
            .unwrap()
            .contains("conflicting"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_delete_one_and_reset() {
        let registry = StubRegistry::new();
        let id = registry
            .register(StubDefinition::new(RequestPattern::any(), ResponseTemplate::ok()))
            .unwrap();
        registry
            .register(StubDefinition::new(RequestPattern::any(), ResponseTemplate::ok()))
            .unwrap();

        let path = format!("/__admin/mappings/{}", id);
        assert_eq!(handle(&registry, &admin("DELETE", &path, "")).status, 200);
        assert_eq!(handle(&registry, &admin("DELETE", &path, "")).status, 404);
        assert_eq!(
            handle(&registry, &admin("DELETE", "/__admin/mappings/not-a-uuid", "")).status,
            404
        );
        assert_eq!(registry.len(), 1);

        assert_eq!(handle(&registry, &admin("POST", "/__admin/reset", "")).status, 200);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_route() {
        let registry = StubRegistry::new();
        assert_eq!(handle(&registry, &admin("PUT", "/__admin/mappings", "")).status, 404);
    }
}
