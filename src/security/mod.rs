pub mod audit_log;
pub mod auth;
pub mod credentials;
pub mod error;
pub mod rate_limit;
pub mod roles;
pub mod token;

pub use audit_log::AuditLogger;
pub use auth::AuthGate;
pub use credentials::{AgentCredentials, CredentialStore};
pub use error::SecurityError;
pub use rate_limit::RateLimiter;
pub use roles::{AgentRole, Permission};
pub use token::{Claims, TokenService};
