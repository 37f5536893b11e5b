//! Conversation threads — persistent containers for ordered messages,
//! optionally mirrored into a hosted-assistant service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A conversation container. Created lazily on first run for a new id;
/// never deleted by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatThread {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Handle into a hosted-assistant service, set on first remote use.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl ChatThread {
    pub fn new(id: Uuid, tenant_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            tenant_id,
            external_id: None,
            name: None,
            tags: Vec::new(),
            created_at: now,
            modified_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_thread_has_no_external_id() {
        let t = ChatThread::new(Uuid::new_v4(), Some("acme".into()));
        assert!(t.external_id.is_none());
        assert_eq!(t.tenant_id.as_deref(), Some("acme"));
    }
}
