//! Stub registry.
//!
//! Mappings live in a copy-on-write slice sorted by (priority, sequence).
//! Writers rebuild and swap the slice under a short write lock; readers clone
//! the `Arc` and match without holding any lock.

use crate::error::RegistrationError;
use crate::pattern::{CompiledPattern, RequestPattern};
use crate::request::RequestDescriptor;
use crate::response::ResponseTemplate;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Identity of a registered stub mapping.
pub type StubId = Uuid;

/// A stub as supplied by the caller: request pattern plus canned response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StubDefinition {
    /// Registering a definition with the id of a live mapping replaces it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<StubId>,

    /// Optional name/description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Lower numbers win; unset sorts after every explicit priority
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,

    pub request: RequestPattern,

    #[serde(default)]
    pub response: ResponseTemplate,
}

impl StubDefinition {
    pub fn new(request: RequestPattern, response: ResponseTemplate) -> Self {
        Self {
            id: None,
            name: None,
            priority: None,
            request,
            response,
        }
    }

    pub fn id(mut self, id: StubId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// A registered, compiled stub. Immutable once registered.
#[derive(Debug)]
pub struct StubMapping {
    id: StubId,
    seq: u64,
    definition: StubDefinition,
    pattern: CompiledPattern,
}

impl StubMapping {
    pub fn id(&self) -> StubId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.definition.name.as_deref()
    }

    pub fn priority(&self) -> Option<u32> {
        self.definition.priority
    }

    /// Registration order, unique within a registry.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn response(&self) -> &ResponseTemplate {
        &self.definition.response
    }

    /// The definition as registered, with its assigned id filled in.
    pub fn definition(&self) -> &StubDefinition {
        &self.definition
    }

    pub fn matches(&self, request: &RequestDescriptor) -> bool {
        self.pattern.matches(request)
    }

    fn sort_key(&self) -> (u32, u64) {
        (self.definition.priority.unwrap_or(u32::MAX), self.seq)
    }
}

struct Inner {
    mappings: Arc<[Arc<StubMapping>]>,
    next_seq: u64,
}

/// Ordered, concurrently readable set of stub mappings.
pub struct StubRegistry {
    inner: RwLock<Inner>,
}

impl StubRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                mappings: Arc::from(Vec::new()),
                next_seq: 0,
            }),
        }
    }

    /// Validate, compile and insert a stub. Identical patterns are allowed;
    /// order decides between them at match time.
    pub fn register(&self, mut definition: StubDefinition) -> Result<StubId, RegistrationError> {
        let pattern = definition.request.compile()?;
        definition.response.validate()?;

        let id = *definition.id.get_or_insert_with(Uuid::new_v4);

        let mut inner = self.inner.write();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let mapping = Arc::new(StubMapping {
            id,
            seq,
            definition,
            pattern,
        });

        let mut mappings: Vec<_> = inner
            .mappings
            .iter()
            .filter(|m| m.id != id)
            .cloned()
            .collect();
        let replaced = mappings.len() < inner.mappings.len();
        mappings.push(mapping);
        mappings.sort_by_key(|m| m.sort_key());
        inner.mappings = mappings.into();

        debug!(stub_id = %id, seq, replaced, "Registered stub");
        Ok(id)
    }

    /// Remove a mapping by id. Returns whether it existed.
    pub fn remove(&self, id: StubId) -> bool {
        let mut inner = self.inner.write();
        if !inner.mappings.iter().any(|m| m.id == id) {
            return false;
        }
        let remaining: Vec<_> = inner
            .mappings
            .iter()
            .filter(|m| m.id != id)
            .cloned()
            .collect();
        inner.mappings = remaining.into();
        debug!(stub_id = %id, "Removed stub");
        true
    }

    /// Remove every mapping.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        let removed = inner.mappings.len();
        inner.mappings = Arc::from(Vec::new());
        info!(removed, "Reset stub mappings");
    }

    /// Mappings in match order.
    pub fn snapshot(&self) -> Arc<[Arc<StubMapping>]> {
        self.inner.read().mappings.clone()
    }

    pub fn get(&self, id: StubId) -> Option<Arc<StubMapping>> {
        self.snapshot().iter().find(|m| m.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StubRegistry {
    fn default() -> Self {
        Self::new()
    }
}
