//! Provider credential lookup.
//!
//! Credentials come from a [`SecretSource`] (the process environment in
//! production) and are checked against a per-family [`CredentialRule`]:
//! minimum length plus a format pattern. Anything that fails is reported as
//! absent. Values never reach logs; warnings name only the provider and the
//! variable.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;

use crate::error::{GatewayError, Result};
use crate::llm::ProviderFamily;
use crate::registry::ProviderRegistry;

/// Where credential values are read from.
pub trait SecretSource: Send + Sync + fmt::Debug {
    /// Whether this source runs with access to server configuration.
    /// Untrusted sources are never consulted.
    fn is_trusted(&self) -> bool {
        true
    }

    fn read(&self, key: &str) -> Option<String>;
}

/// Reads credentials from the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl SecretSource for ProcessEnv {
    fn read(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Fixed credential map, used by tests and embedded setups.
#[derive(Default, Clone)]
pub struct StaticSecrets(HashMap<String, String>);

impl StaticSecrets {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }
}

impl fmt::Debug for StaticSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.0.keys().collect();
        keys.sort_unstable();
        f.debug_struct("StaticSecrets").field("keys", &keys).finish()
    }
}

impl SecretSource for StaticSecrets {
    fn read(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }
}

/// A context without access to server configuration. Always fails closed.
#[derive(Debug, Default, Clone, Copy)]
pub struct UntrustedContext;

impl SecretSource for UntrustedContext {
    fn is_trusted(&self) -> bool {
        false
    }

    fn read(&self, _key: &str) -> Option<String> {
        None
    }
}

/// Validation rule for one provider family's credential.
#[derive(Debug, Clone)]
pub struct CredentialRule {
    pub env_var: &'static str,
    pub min_length: usize,
    pub pattern: Regex,
    /// Missing required credentials are reported at startup.
    pub required: bool,
}

impl CredentialRule {
    pub fn new(
        env_var: &'static str,
        min_length: usize,
        pattern: &str,
        required: bool,
    ) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            env_var,
            min_length,
            pattern: Regex::new(pattern)?,
            required,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Check {
    Missing,
    TooShort,
    BadFormat,
    Valid,
}

/// Audit row for one credential. Never carries the value.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretAudit {
    pub family: ProviderFamily,
    pub env_var: &'static str,
    pub present: bool,
    pub valid: bool,
    pub required: bool,
    pub last_used_at: Option<DateTime<Utc>>,
}

pub struct SecretStore {
    source: Arc<dyn SecretSource>,
    providers: Arc<ProviderRegistry>,
    rules: HashMap<ProviderFamily, CredentialRule>,
    last_used: Mutex<HashMap<ProviderFamily, DateTime<Utc>>>,
}

impl fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretStore")
            .field("source", &self.source)
            .field("families", &self.rules.len())
            .finish_non_exhaustive()
    }
}

impl SecretStore {
    pub fn new(
        source: Arc<dyn SecretSource>,
        providers: Arc<ProviderRegistry>,
        rules: HashMap<ProviderFamily, CredentialRule>,
    ) -> Self {
        Self {
            source,
            providers,
            rules,
            last_used: Mutex::new(HashMap::new()),
        }
    }

    /// Store with the built-in rule for every provider family.
    pub fn with_default_rules(
        source: Arc<dyn SecretSource>,
        providers: Arc<ProviderRegistry>,
    ) -> anyhow::Result<Self> {
        let rules = HashMap::from([
            (
                ProviderFamily::OpenAi,
                CredentialRule::new("OPENAI_API_KEY", 20, r"^sk-[A-Za-z0-9_\-]{16,}$", true)?,
            ),
            (
                ProviderFamily::Anthropic,
                CredentialRule::new("ANTHROPIC_API_KEY", 40, r"^sk-ant-[A-Za-z0-9_\-]{32,}$", false)?,
            ),
            (
                ProviderFamily::Google,
                CredentialRule::new(
                    "GOOGLE_GENERATIVE_AI_API_KEY",
                    30,
                    r"^AIza[0-9A-Za-z_\-]{35}$",
                    false,
                )?,
            ),
            (
                ProviderFamily::Replicate,
                CredentialRule::new("REPLICATE_API_TOKEN", 30, r"^r8_[A-Za-z0-9]{20,}$", false)?,
            ),
            (
                ProviderFamily::ElevenLabs,
                CredentialRule::new("ELEVENLABS_API_KEY", 32, r"^(sk_)?[a-f0-9]{32,}$", false)?,
            ),
        ]);
        Ok(Self::new(source, providers, rules))
    }

    fn check(rule: &CredentialRule, value: Option<&str>) -> Check {
        match value {
            None => Check::Missing,
            Some(v) if v.trim().len() < rule.min_length => Check::TooShort,
            Some(v) if !rule.pattern.is_match(v.trim()) => Check::BadFormat,
            Some(_) => Check::Valid,
        }
    }

    /// Credential for a provider, or `None` if it is absent, malformed, or
    /// the source is untrusted.
    pub fn get_secret(&self, provider_id: &str) -> Option<String> {
        self.credential(provider_id).ok()
    }

    /// Credential for a provider.
    ///
    /// An unset credential (or an untrusted source) is `MissingCredential`; one
    /// that is too short or fails its pattern is `InvalidCredentialFormat`.
    pub fn credential(&self, provider_id: &str) -> Result<String> {
        if !self.source.is_trusted() {
            return Err(GatewayError::MissingCredential(provider_id.to_string()));
        }
        let family = self.providers.get(provider_id)?.family;
        let Some(rule) = self.rules.get(&family) else {
            tracing::warn!(
                name: "secrets.rule.missing",
                provider = %provider_id,
                family = %family,
                "no credential rule for provider family"
            );
            return Err(GatewayError::MissingCredential(provider_id.to_string()));
        };

        let value = self.source.read(rule.env_var);
        let (reason, error) = match Self::check(rule, value.as_deref()) {
            Check::Valid => {
                self.last_used.lock().insert(family, Utc::now());
                return value
                    .map(|v| v.trim().to_string())
                    .ok_or_else(|| GatewayError::MissingCredential(provider_id.to_string()));
            }
            Check::Missing => ("not set", GatewayError::MissingCredential(provider_id.to_string())),
            Check::TooShort => (
                "shorter than required",
                GatewayError::InvalidCredentialFormat(provider_id.to_string()),
            ),
            Check::BadFormat => (
                "does not match the expected format",
                GatewayError::InvalidCredentialFormat(provider_id.to_string()),
            ),
        };
        tracing::warn!(
            name: "secrets.credential.rejected",
            provider = %provider_id,
            env_var = rule.env_var,
            reason,
            "credential unavailable"
        );
        Err(error)
    }

    /// Presence and validity of every known credential.
    #[must_use]
    pub fn audit(&self) -> Vec<SecretAudit> {
        let trusted = self.source.is_trusted();
        let last_used = self.last_used.lock();
        let mut rows: Vec<_> = self
            .rules
            .iter()
            .map(|(family, rule)| {
                let value = if trusted {
                    self.source.read(rule.env_var)
                } else {
                    None
                };
                SecretAudit {
                    family: *family,
                    env_var: rule.env_var,
                    present: value.is_some(),
                    valid: Self::check(rule, value.as_deref()) == Check::Valid,
                    required: rule.required,
                    last_used_at: last_used.get(family).copied(),
                }
            })
            .collect();
        rows.sort_by_key(|r| r.family);
        rows
    }

    /// Report required credentials that are missing or invalid.
    ///
    /// In production the first such credential is an error; otherwise the
    /// problems are only logged.
    pub fn validate_required(&self, production: bool) -> Result<()> {
        let missing: Vec<_> = self
            .audit()
            .into_iter()
            .filter(|row| row.required && !row.valid)
            .collect();
        for row in &missing {
            tracing::error!(
                name: "secrets.required.missing",
                family = %row.family,
                env_var = row.env_var,
                present = row.present,
                "required credential is missing or invalid"
            );
        }
        match missing.first() {
            Some(row) if production => Err(GatewayError::MissingCredential(row.family.to_string())),
            _ => Ok(()),
        }
    }
}
