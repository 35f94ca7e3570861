//! Credential handling and request throttling.

pub mod rate_limit;
pub mod secrets;

pub use rate_limit::{
    FixedWindowRateLimiter, RateLimitDecision, RateLimitKey, RateLimitPolicy,
    rate_limit_middleware,
};
pub use secrets::{
    CredentialRule, ProcessEnv, SecretAudit, SecretSource, SecretStore, StaticSecrets,
    UntrustedContext,
};
