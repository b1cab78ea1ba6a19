use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::audit_log::AuditLogger;
use super::credentials::{AgentCredentials, CredentialStore};
use super::error::SecurityError;
use super::roles::{AgentRole, Permission};
use super::token::TokenService;

/// Resolves inbound bearer values into verified agent identities.
#[derive(Debug, Clone)]
pub struct AuthGate {
    store: CredentialStore,
    tokens: TokenService,
    audit: AuditLogger,
}

impl AuthGate {
    pub fn new(store: CredentialStore, tokens: TokenService, audit: AuditLogger) -> Self {
        Self {
            store,
            tokens,
            audit,
        }
    }

    /// Resolve a bearer value to credentials: API-key lookup first, then
    /// signed-token verification for values in compact-token format.
    ///
    /// Token-derived credentials are materialized from the claims alone;
    /// the store is deliberately not consulted, so tokens outlive
    /// revocation until their own expiration.
    pub async fn authenticate(
        &self,
        bearer: &str,
    ) -> Result<AgentCredentials, SecurityError> {
        if bearer.is_empty() {
            self.audit.auth_failure("empty bearer value");
            return Err(SecurityError::Authentication(
                "credential required".to_string(),
            ));
        }

        if let Some(credentials) = self.store.verify_api_key(bearer).await {
            self.audit.auth_success(&credentials.agent_id, "api_key");
            return Ok(credentials);
        }

        // Compact tokens are the only bearer values containing '.'
        if bearer.contains('.') {
            match self.tokens.verify(bearer) {
                Ok(claims) => {
                    let credentials = credentials_from_claims(
                        &claims.agent_id,
                        claims.role,
                        claims.permissions.iter().copied().collect(),
                        claims.iat,
                        claims.exp,
                    );
                    self.audit.auth_success(&credentials.agent_id, "token");
                    return Ok(credentials);
                }
                Err(err) => {
                    // Expired and invalid tokens both surface as 401;
                    // the distinction lives only in the audit trail.
                    self.audit.token_rejected(&err.to_string());
                    return Err(err);
                }
            }
        }

        self.audit.auth_failure("unknown api key");
        Err(SecurityError::Authentication(
            "invalid credential".to_string(),
        ))
    }

    /// Pure permission check; no hidden state.
    pub fn require_permission(
        &self,
        credentials: &AgentCredentials,
        permission: Permission,
    ) -> Result<(), SecurityError> {
        if credentials.has_permission(permission) {
            Ok(())
        } else {
            self.audit
                .permission_denied(&credentials.agent_id, permission.as_str());
            Err(SecurityError::Authorization(format!(
                "permission {permission} required"
            )))
        }
    }

    /// Pure role check keyed on exact equality.
    pub fn require_role(
        &self,
        credentials: &AgentCredentials,
        role: AgentRole,
    ) -> Result<(), SecurityError> {
        if credentials.role == role {
            Ok(())
        } else {
            self.audit.role_denied(&credentials.agent_id, role.as_str());
            Err(SecurityError::Authorization(format!("role {role} required")))
        }
    }
}

fn credentials_from_claims(
    agent_id: &str,
    role: AgentRole,
    permissions: std::collections::HashSet<Permission>,
    iat: i64,
    exp: i64,
) -> AgentCredentials {
    AgentCredentials {
        agent_id: agent_id.to_string(),
        api_key: String::new(),
        role,
        permissions,
        created_at: timestamp_or_now(iat),
        expires_at: DateTime::from_timestamp(exp, 0),
        metadata: HashMap::from([("authenticated_via".to_string(), "token".to_string())]),
    }
}

fn timestamp_or_now(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    async fn gate() -> (AuthGate, AgentCredentials) {
        let store = CredentialStore::new("secret");
        let issued = store
            .issue(
                "agent-a",
                AgentRole::Simulation,
                HashSet::from([Permission::ExecuteSimulations, Permission::ViewMetrics]),
                None,
            )
            .await
            .unwrap();
        let tokens = TokenService::new("secret", "HS256", 24, store.clone());
        (
            AuthGate::new(store, tokens, AuditLogger::new()),
            issued,
        )
    }

    #[tokio::test]
    async fn test_authenticate_by_api_key() {
        let (gate, issued) = gate().await;
        let found = gate.authenticate(&issued.api_key).await.unwrap();
        assert_eq!(found.agent_id, "agent-a");
    }

    #[tokio::test]
    async fn test_authenticate_by_token() {
        let (gate, _) = gate().await;
        let token = gate.tokens.mint("agent-a", None).await.unwrap();
        let found = gate.authenticate(&token).await.unwrap();
        assert_eq!(found.agent_id, "agent-a");
        assert_eq!(found.role, AgentRole::Simulation);
        assert!(found.has_permission(Permission::ViewMetrics));
    }

    #[tokio::test]
    async fn test_token_outlives_revocation() {
        let (gate, _) = gate().await;
        let token = gate.tokens.mint("agent-a", None).await.unwrap();
        assert!(gate.store.revoke("agent-a").await);
        // still authenticates until the token's own expiration
        let found = gate.authenticate(&token).await.unwrap();
        assert_eq!(found.agent_id, "agent-a");
    }

    #[tokio::test]
    async fn test_unknown_bearer_rejected() {
        let (gate, _) = gate().await;
        assert!(matches!(
            gate.authenticate("ak_bogus").await,
            Err(SecurityError::Authentication(_))
        ));
        assert!(gate.authenticate("").await.is_err());
    }

    #[tokio::test]
    async fn test_permission_check_ignores_role() {
        let (gate, issued) = gate().await;
        assert!(gate
            .require_permission(&issued, Permission::ViewMetrics)
            .is_ok());
        assert!(matches!(
            gate.require_permission(&issued, Permission::ManageAgents),
            Err(SecurityError::Authorization(_))
        ));
    }

    #[tokio::test]
    async fn test_role_check_is_exact() {
        let (gate, issued) = gate().await;
        assert!(gate.require_role(&issued, AgentRole::Simulation).is_ok());
        assert!(matches!(
            gate.require_role(&issued, AgentRole::Admin),
            Err(SecurityError::Authorization(_))
        ));
    }
}
