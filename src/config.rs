use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::security::RateLimitPolicy;

const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Enable rate limiting
    #[arg(long, env = "RATE_LIMIT_ENABLED")]
    pub rate_limit_enabled: Option<bool>,

    /// Disable timeout middleware
    #[arg(long, env = "TIMEOUT_DISABLED")]
    pub timeout_disabled: Option<bool>,

    /// Seconds between background health probes (0 disables the monitor)
    #[arg(long, env = "HEALTH_INTERVAL_SECS")]
    pub health_interval_secs: Option<u64>,

    /// Emit JSON logs
    #[arg(long, env = "LOG_JSON")]
    pub log_json: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub resilience: ResilienceConfig,
    pub health: HealthConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    /// `cost_per_unit` overrides keyed by provider id.
    #[serde(default)]
    pub pricing: HashMap<String, f64>,
    /// Endpoint overrides keyed by provider id (e.g. an `OpenRouter` or Azure base URL).
    #[serde(default)]
    pub endpoints: HashMap<String, String>,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// `production` makes missing required credentials fatal.
    pub environment: String,
    pub body_limit_bytes: usize,
}

impl ServerConfig {
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResilienceConfig {
    pub rate_limit_enabled: bool,
    pub timeout_disabled: bool,
    /// Whole-request timeout applied by the HTTP layer.
    pub request_timeout_secs: u64,
    /// Timeout for each upstream provider call.
    pub upstream_timeout_secs: u64,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    pub quota: u32,
    pub window_ms: u64,
    pub sweep_threshold: usize,
    /// Per-path policies; paths without an entry use `quota`/`window_ms`.
    #[serde(default = "default_route_limits")]
    pub routes: HashMap<String, RouteLimit>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct RouteLimit {
    pub quota: u32,
    pub window_ms: u64,
}

fn default_route_limits() -> HashMap<String, RouteLimit> {
    let minute = |quota| RouteLimit {
        quota,
        window_ms: 60_000,
    };
    HashMap::from([
        ("/api/chat".to_string(), minute(20)),
        ("/api/generate/text".to_string(), minute(20)),
        ("/api/generate/image".to_string(), minute(10)),
        ("/api/generate/video".to_string(), minute(5)),
        ("/api/generate/audio".to_string(), minute(10)),
    ])
}

impl RateLimitConfig {
    #[must_use]
    pub fn policy_for(&self, path: &str) -> RateLimitPolicy {
        let (quota, window_ms) = self
            .routes
            .get(path)
            .map_or((self.quota, self.window_ms), |r| (r.quota, r.window_ms));
        RateLimitPolicy::new(quota, Duration::from_millis(window_ms))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HealthConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

/// Provider ids the router picks from. Every id must exist in the provider
/// registry.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RoutingConfig {
    pub code: String,
    pub creative: String,
    pub multimodal: String,
    pub image: String,
    pub video: String,
    pub audio: String,
    pub simple: String,
    pub medium: String,
    pub complex: String,
    /// Provider used for persona rewrites and insights.
    pub rewriter: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            code: "claude-3-5-sonnet".into(),
            creative: "gpt-4o".into(),
            multimodal: "gemini-1-5-pro".into(),
            image: "dall-e-3".into(),
            video: "stable-video".into(),
            audio: "eleven-multilingual-v2".into(),
            simple: "gpt-4o-mini".into(),
            medium: "gpt-4o".into(),
            complex: "claude-3-5-sonnet".into(),
            rewriter: "gpt-4o-mini".into(),
        }
    }
}

impl RoutingConfig {
    /// Every configured id, labelled by the setting that names it.
    #[must_use]
    pub fn entries(&self) -> [(&'static str, &str); 10] {
        [
            ("code", &self.code),
            ("creative", &self.creative),
            ("multimodal", &self.multimodal),
            ("image", &self.image),
            ("video", &self.video),
            ("audio", &self.audio),
            ("simple", &self.simple),
            ("medium", &self.medium),
            ("complex", &self.complex),
            ("rewriter", &self.rewriter),
        ]
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    pub json: bool,
    /// Filter used when `RUST_LOG` is unset.
    pub filter: String,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.environment", "development")?
            .set_default("server.body_limit_bytes", 1024 * 1024)?
            .set_default("resilience.rate_limit_enabled", true)?
            .set_default("resilience.timeout_disabled", false)?
            .set_default("resilience.request_timeout_secs", 120)?
            .set_default("resilience.upstream_timeout_secs", 30)?
            .set_default("resilience.rate_limit.quota", 60)?
            .set_default("resilience.rate_limit.window_ms", 60_000)?
            .set_default("resilience.rate_limit.sweep_threshold", 10_000)?
            .set_default("health.enabled", true)?
            .set_default("health.interval_secs", 30)?
            .set_default("telemetry.json", false)?
            .set_default("telemetry.filter", "info,guardian_gateway=debug")?;

        // Explicit file (flag or CONFIG_FILE) must exist; ./config.yaml is optional.
        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path)),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                builder.add_source(File::with_name(DEFAULT_CONFIG_FILE))
            }
            None => builder,
        };

        // GATEWAY_SERVER__PORT=8000, GATEWAY_RESILIENCE__RATE_LIMIT__QUOTA=100, ...
        builder = builder.add_source(
            Environment::with_prefix("GATEWAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // CLI flags (and their env aliases) win over everything else.
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(rl) = cli.rate_limit_enabled {
            builder = builder.set_override("resilience.rate_limit_enabled", rl)?;
        }
        if let Some(td) = cli.timeout_disabled {
            builder = builder.set_override("resilience.timeout_disabled", td)?;
        }
        if let Some(secs) = cli.health_interval_secs {
            builder = builder
                .set_override("health.interval_secs", secs)?
                .set_override("health.enabled", secs > 0)?;
        }
        if let Some(json) = cli.log_json {
            builder = builder.set_override("telemetry.json", json)?;
        }

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_policy_override() {
        let cfg = RateLimitConfig {
            quota: 60,
            window_ms: 60_000,
            sweep_threshold: 100,
            routes: default_route_limits(),
        };
        assert_eq!(
            cfg.policy_for("/api/generate/video"),
            RateLimitPolicy::new(5, Duration::from_secs(60))
        );
        assert_eq!(
            cfg.policy_for("/api/guardians"),
            RateLimitPolicy::new(60, Duration::from_secs(60))
        );
    }

    #[test]
    fn test_production_flag() {
        let server = ServerConfig {
            port: 1,
            host: "127.0.0.1".into(),
            environment: "Production".into(),
            body_limit_bytes: 1,
        };
        assert!(server.is_production());
    }
}
