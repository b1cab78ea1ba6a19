use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::num::NonZeroU64;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::error::SecurityError;
use super::roles::{AgentRole, Permission};

/// Identity record for one agent process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCredentials {
    pub agent_id: String,
    pub api_key: String,
    pub role: AgentRole,
    pub permissions: HashSet<Permission>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
}

impl AgentCredentials {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if now > exp)
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    by_agent: HashMap<String, AgentCredentials>,
    by_key: HashMap<String, String>,
}

/// In-memory credential store with O(1) lookup by agent id or API key.
///
/// Cheap to clone; all clones share the same state. One store per process,
/// constructed inside `AppState` and threaded through request handling.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    secret: String,
    inner: Arc<RwLock<StoreInner>>,
}

impl CredentialStore {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            inner: Arc::new(RwLock::new(StoreInner::default())),
        }
    }

    /// Issue credentials for a new agent.
    ///
    /// The API key is derived from the agent id, the shared secret and the
    /// current time; it cannot be reversed to recover the secret. An agent id
    /// can only be registered once, callers must `revoke` before reissuing.
    pub async fn issue(
        &self,
        agent_id: &str,
        role: AgentRole,
        permissions: HashSet<Permission>,
        ttl_secs: Option<NonZeroU64>,
    ) -> Result<AgentCredentials, SecurityError> {
        let mut inner = self.inner.write().await;
        if inner.by_agent.contains_key(agent_id) {
            return Err(SecurityError::DuplicateAgent(agent_id.to_string()));
        }

        let created_at = Utc::now();
        // NonZeroU64 keeps expires_at strictly after created_at.
        let expires_at = ttl_secs.map(|ttl| created_at + Duration::seconds(ttl.get() as i64));

        let credentials = AgentCredentials {
            agent_id: agent_id.to_string(),
            api_key: self.generate_api_key(agent_id),
            role,
            permissions,
            created_at,
            expires_at,
            metadata: HashMap::from([("created_by".to_string(), "system".to_string())]),
        };

        inner
            .by_key
            .insert(credentials.api_key.clone(), agent_id.to_string());
        inner
            .by_agent
            .insert(agent_id.to_string(), credentials.clone());

        info!(agent_id, role = %role, "issued agent credentials");
        Ok(credentials)
    }

    fn generate_api_key(&self, agent_id: &str) -> String {
        let nanos = Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_else(|| Utc::now().timestamp_micros());
        let seed = format!("{agent_id}:{}:{nanos}", self.secret);
        let digest = Sha256::digest(seed.as_bytes());
        format!("ak_{:.32}", format!("{digest:x}"))
    }

    /// Resolve an API key to its credentials.
    ///
    /// Expired credentials resolve to `None` but stay in the store until
    /// explicitly revoked.
    pub async fn verify_api_key(&self, api_key: &str) -> Option<AgentCredentials> {
        let inner = self.inner.read().await;
        let agent_id = inner.by_key.get(api_key)?;
        let credentials = inner.by_agent.get(agent_id)?;
        if credentials.is_expired_at(Utc::now()) {
            warn!(agent_id, "expired credentials presented");
            return None;
        }
        Some(credentials.clone())
    }

    pub async fn get(&self, agent_id: &str) -> Option<AgentCredentials> {
        self.inner.read().await.by_agent.get(agent_id).cloned()
    }

    pub async fn list(&self) -> Vec<AgentCredentials> {
        self.inner.read().await.by_agent.values().cloned().collect()
    }

    /// Remove credentials and their key mapping. Returns whether anything
    /// was removed. Tokens already minted for this agent stay valid until
    /// their own expiration (stateless-token tradeoff).
    pub async fn revoke(&self, agent_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.by_agent.remove(agent_id) {
            Some(credentials) => {
                inner.by_key.remove(&credentials.api_key);
                info!(agent_id, "revoked agent credentials");
                true
            }
            None => false,
        }
    }

    /// Seed the standard platform identities: one leader, four follower
    /// specializations and the simulation runner.
    pub async fn install_defaults(&self) -> Result<(), SecurityError> {
        let defaults: [(&str, AgentRole, &[Permission]); 6] = [
            (
                "sentinel-leader",
                AgentRole::Leader,
                &[Permission::GenerateThemes, Permission::AccessAgentCards],
            ),
            (
                "sentinel-follower-resource",
                AgentRole::Follower,
                &[Permission::DevelopStrategies, Permission::AccessAgentCards],
            ),
            (
                "sentinel-follower-security",
                AgentRole::Follower,
                &[Permission::DevelopStrategies, Permission::AccessAgentCards],
            ),
            (
                "sentinel-follower-value",
                AgentRole::Follower,
                &[Permission::DevelopStrategies, Permission::AccessAgentCards],
            ),
            (
                "sentinel-follower-general",
                AgentRole::Follower,
                &[Permission::DevelopStrategies, Permission::AccessAgentCards],
            ),
            (
                "sentinel-simulation",
                AgentRole::Simulation,
                &[
                    Permission::ExecuteSimulations,
                    Permission::AccessAgentCards,
                    Permission::ViewMetrics,
                ],
            ),
        ];

        for (agent_id, role, permissions) in defaults {
            self.issue(agent_id, role, permissions.iter().copied().collect(), None)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_view() -> HashSet<Permission> {
        HashSet::from([Permission::ViewMetrics])
    }

    #[tokio::test]
    async fn test_issue_and_verify_round_trip() {
        let store = CredentialStore::new("secret");
        let issued = store
            .issue("agent-a", AgentRole::Leader, all_view(), None)
            .await
            .unwrap();

        let found = store.verify_api_key(&issued.api_key).await.unwrap();
        assert_eq!(found.agent_id, "agent-a");
        assert_eq!(found.role, AgentRole::Leader);
        assert_eq!(found.permissions, issued.permissions);
    }

    #[tokio::test]
    async fn test_duplicate_agent_rejected() {
        let store = CredentialStore::new("secret");
        store
            .issue("agent-a", AgentRole::Leader, all_view(), None)
            .await
            .unwrap();
        let err = store
            .issue("agent-a", AgentRole::Client, all_view(), None)
            .await
            .unwrap_err();
        assert_eq!(err, SecurityError::DuplicateAgent("agent-a".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_key_resolves_to_none() {
        let store = CredentialStore::new("secret");
        assert!(store.verify_api_key("ak_nope").await.is_none());
    }

    #[tokio::test]
    async fn test_revoke_removes_key_mapping() {
        let store = CredentialStore::new("secret");
        let issued = store
            .issue("agent-a", AgentRole::Leader, all_view(), None)
            .await
            .unwrap();

        assert!(store.revoke("agent-a").await);
        assert!(store.verify_api_key(&issued.api_key).await.is_none());
        assert!(store.get("agent-a").await.is_none());
        // second revoke is a no-op
        assert!(!store.revoke("agent-a").await);
    }

    #[tokio::test]
    async fn test_expired_credentials_stay_until_revoked() {
        let store = CredentialStore::new("secret");
        let mut issued = store
            .issue("agent-a", AgentRole::Leader, all_view(), None)
            .await
            .unwrap();

        // Simulate expiry without waiting out a real ttl.
        issued.expires_at = Some(Utc::now() - Duration::seconds(5));
        assert!(issued.is_expired_at(Utc::now()));

        {
            let mut inner = store.inner.write().await;
            inner.by_agent.insert("agent-a".to_string(), issued.clone());
        }

        assert!(store.verify_api_key(&issued.api_key).await.is_none());
        // record still present until revocation
        assert!(store.get("agent-a").await.is_some());
    }

    #[tokio::test]
    async fn test_ttl_sets_expiry_after_creation() {
        let store = CredentialStore::new("secret");
        let issued = store
            .issue(
                "agent-a",
                AgentRole::Client,
                all_view(),
                NonZeroU64::new(30),
            )
            .await
            .unwrap();
        let expires = issued.expires_at.unwrap();
        assert!(expires > issued.created_at);
        assert_eq!((expires - issued.created_at).num_seconds(), 30);
    }

    #[tokio::test]
    async fn test_api_keys_are_unique_and_prefixed() {
        let store = CredentialStore::new("secret");
        let a = store
            .issue("agent-a", AgentRole::Leader, all_view(), None)
            .await
            .unwrap();
        let b = store
            .issue("agent-b", AgentRole::Leader, all_view(), None)
            .await
            .unwrap();
        assert_ne!(a.api_key, b.api_key);
        assert!(a.api_key.starts_with("ak_"));
        assert_eq!(a.api_key.len(), 3 + 32);
    }

    #[tokio::test]
    async fn test_install_defaults() {
        let store = CredentialStore::new("secret");
        store.install_defaults().await.unwrap();
        let agents = store.list().await;
        assert_eq!(agents.len(), 6);

        let sim = store.get("sentinel-simulation").await.unwrap();
        assert_eq!(sim.role, AgentRole::Simulation);
        assert!(sim.has_permission(Permission::ViewMetrics));
        assert!(!sim.has_permission(Permission::ManageAgents));
    }
}
