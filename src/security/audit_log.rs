use tracing::{info, warn};

/// Structured audit trail for security decisions, emitted under the
/// dedicated `audit` target so operators can filter or ship it separately.
#[derive(Debug, Clone, Default)]
pub struct AuditLogger;

impl AuditLogger {
    pub fn new() -> Self {
        Self
    }

    pub fn auth_success(&self, agent_id: &str, via: &str) {
        info!(target: "audit", event = "auth_success", agent_id, via);
    }

    pub fn auth_failure(&self, reason: &str) {
        warn!(target: "audit", event = "auth_failure", reason);
    }

    pub fn token_rejected(&self, reason: &str) {
        warn!(target: "audit", event = "token_rejected", reason);
    }

    pub fn permission_denied(&self, agent_id: &str, permission: &str) {
        warn!(target: "audit", event = "permission_denied", agent_id, permission);
    }

    pub fn role_denied(&self, agent_id: &str, role: &str) {
        warn!(target: "audit", event = "role_denied", agent_id, role);
    }

    pub fn rate_limited(&self, agent_id: &str) {
        warn!(target: "audit", event = "rate_limited", agent_id);
    }

    pub fn credential_issued(&self, agent_id: &str, role: &str) {
        info!(target: "audit", event = "credential_issued", agent_id, role);
    }

    pub fn credential_revoked(&self, agent_id: &str, removed: bool) {
        info!(target: "audit", event = "credential_revoked", agent_id, removed);
    }

    pub fn token_minted(&self, agent_id: &str) {
        info!(target: "audit", event = "token_minted", agent_id);
    }
}
