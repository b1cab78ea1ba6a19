use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use tracing::debug;

use super::credentials::CredentialStore;
use super::error::SecurityError;
use super::roles::{AgentRole, Permission};

type HmacSha256 = Hmac<Sha256>;

const SUPPORTED_ALGORITHM: &str = "HS256";

/// Decoded payload of a signed bearer token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub agent_id: String,
    pub role: AgentRole,
    pub permissions: Vec<Permission>,
    pub iat: i64,
    pub exp: i64,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Mints and verifies compact HS256 bearer tokens.
///
/// Tokens are stateless: verification never consults the credential store,
/// so a revoked agent's outstanding tokens stay valid until their own
/// expiration. Revocation plus secret rotation is the kill switch.
#[derive(Debug, Clone)]
pub struct TokenService {
    secret: String,
    algorithm: String,
    expiration_hours: i64,
    store: CredentialStore,
}

impl TokenService {
    pub fn new(
        secret: impl Into<String>,
        algorithm: impl Into<String>,
        expiration_hours: i64,
        store: CredentialStore,
    ) -> Self {
        Self {
            secret: secret.into(),
            algorithm: algorithm.into(),
            expiration_hours,
            store,
        }
    }

    /// Mint a signed token for a registered agent, embedding its role and
    /// permission set plus any caller-supplied claims.
    pub async fn mint(
        &self,
        agent_id: &str,
        extra_claims: Option<HashMap<String, Value>>,
    ) -> Result<String, SecurityError> {
        let credentials = self
            .store
            .get(agent_id)
            .await
            .ok_or_else(|| SecurityError::UnknownAgent(agent_id.to_string()))?;

        let now = Utc::now().timestamp();
        let claims = Claims {
            agent_id: credentials.agent_id,
            role: credentials.role,
            permissions: credentials.permissions.into_iter().collect(),
            iat: now,
            exp: now + self.expiration_hours * 3600,
            extra: extra_claims.unwrap_or_default(),
        };

        let header = Header {
            alg: self.algorithm.clone(),
            typ: "JWT".to_string(),
        };

        let header_b64 = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&header)
                .map_err(|e| SecurityError::TokenInvalid(e.to_string()))?,
        );
        let claims_b64 = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&claims)
                .map_err(|e| SecurityError::TokenInvalid(e.to_string()))?,
        );

        let signing_input = format!("{header_b64}.{claims_b64}");
        let signature = URL_SAFE_NO_PAD.encode(self.sign(signing_input.as_bytes()));

        debug!(agent_id = %claims.agent_id, exp = claims.exp, "minted bearer token");
        Ok(format!("{signing_input}.{signature}"))
    }

    /// Verify signature and expiration, returning the decoded claims.
    pub fn verify(&self, token: &str) -> Result<Claims, SecurityError> {
        let mut parts = token.split('.');
        let (header_b64, claims_b64, signature_b64) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(h), Some(c), Some(s), None) => (h, c, s),
                _ => {
                    return Err(SecurityError::TokenInvalid(
                        "malformed token structure".to_string(),
                    ))
                }
            };

        let provided = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| SecurityError::TokenInvalid("bad signature encoding".to_string()))?;
        let signing_input = format!("{header_b64}.{claims_b64}");
        let expected = self.sign(signing_input.as_bytes());

        if provided.ct_eq(expected.as_slice()).unwrap_u8() != 1 {
            return Err(SecurityError::TokenInvalid("signature mismatch".to_string()));
        }

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|_| SecurityError::TokenInvalid("bad header encoding".to_string()))?;
        let header: Header = serde_json::from_slice(&header_bytes)
            .map_err(|_| SecurityError::TokenInvalid("malformed header".to_string()))?;
        if header.alg != self.algorithm {
            return Err(SecurityError::TokenInvalid(format!(
                "unexpected algorithm {}",
                header.alg
            )));
        }

        let claims_bytes = URL_SAFE_NO_PAD
            .decode(claims_b64)
            .map_err(|_| SecurityError::TokenInvalid("bad claims encoding".to_string()))?;
        let claims: Claims = serde_json::from_slice(&claims_bytes)
            .map_err(|_| SecurityError::TokenInvalid("malformed claims".to_string()))?;

        if Utc::now().timestamp() >= claims.exp {
            return Err(SecurityError::TokenExpired);
        }

        Ok(claims)
    }

    fn sign(&self, input: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(input);
        mac.finalize().into_bytes().to_vec()
    }

    pub fn supports(algorithm: &str) -> bool {
        algorithm == SUPPORTED_ALGORITHM
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    async fn service_with_agent() -> TokenService {
        let store = CredentialStore::new("secret");
        store
            .issue(
                "agent-a",
                AgentRole::Follower,
                HashSet::from([Permission::DevelopStrategies]),
                None,
            )
            .await
            .unwrap();
        TokenService::new("secret", "HS256", 24, store)
    }

    #[tokio::test]
    async fn test_mint_and_verify_round_trip() {
        let service = service_with_agent().await;
        let token = service.mint("agent-a", None).await.unwrap();
        let claims = service.verify(&token).unwrap();

        assert_eq!(claims.agent_id, "agent-a");
        assert_eq!(claims.role, AgentRole::Follower);
        assert_eq!(claims.permissions, vec![Permission::DevelopStrategies]);
        assert!(claims.exp > claims.iat);
    }

    #[tokio::test]
    async fn test_mint_unknown_agent_fails() {
        let service = service_with_agent().await;
        let err = service.mint("agent-zz", None).await.unwrap_err();
        assert_eq!(err, SecurityError::UnknownAgent("agent-zz".to_string()));
    }

    #[tokio::test]
    async fn test_extra_claims_survive_round_trip() {
        let service = service_with_agent().await;
        let extra = HashMap::from([(
            "session".to_string(),
            Value::String("tournament-7".to_string()),
        )]);
        let token = service.mint("agent-a", Some(extra)).await.unwrap();
        let claims = service.verify(&token).unwrap();
        assert_eq!(
            claims.extra.get("session"),
            Some(&Value::String("tournament-7".to_string()))
        );
    }

    #[tokio::test]
    async fn test_tampered_token_rejected() {
        let service = service_with_agent().await;
        let token = service.mint("agent-a", None).await.unwrap();

        // Flip one byte in the claims segment.
        let mut parts: Vec<String> = token.split('.').map(String::from).collect();
        let mut claims = parts[1].clone().into_bytes();
        claims[0] = if claims[0] == b'A' { b'B' } else { b'A' };
        parts[1] = String::from_utf8(claims).unwrap();
        let tampered = parts.join(".");

        match service.verify(&tampered) {
            Err(SecurityError::TokenInvalid(_)) => {}
            other => panic!("expected TokenInvalid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let service = service_with_agent().await;
        let token = service.mint("agent-a", None).await.unwrap();

        let other = TokenService::new("other-secret", "HS256", 24, CredentialStore::new("x"));
        assert!(matches!(
            other.verify(&token),
            Err(SecurityError::TokenInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let store = CredentialStore::new("secret");
        store
            .issue("agent-a", AgentRole::Client, HashSet::new(), None)
            .await
            .unwrap();
        // Negative lifetime puts exp in the past.
        let service = TokenService::new("secret", "HS256", -1, store);
        let token = service.mint("agent-a", None).await.unwrap();
        assert_eq!(service.verify(&token), Err(SecurityError::TokenExpired));
    }

    #[test]
    fn test_malformed_token_rejected() {
        let service = TokenService::new("secret", "HS256", 24, CredentialStore::new("x"));
        assert!(matches!(
            service.verify("not-a-token"),
            Err(SecurityError::TokenInvalid(_))
        ));
        assert!(matches!(
            service.verify("a.b.c.d"),
            Err(SecurityError::TokenInvalid(_))
        ));
    }
}
