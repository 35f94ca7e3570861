use guardian_gateway::config::AppConfig;
use serial_test::serial;
use std::env;
use std::fs;
use std::io::Write;

const ARGS: [&str; 1] = ["guardian-gateway"];

// Clear variables that would leak into the layered config
fn clear_env_vars() {
    unsafe {
        for var in [
            "GATEWAY_SERVER__PORT",
            "GATEWAY_SERVER__ENVIRONMENT",
            "GATEWAY_RESILIENCE__RATE_LIMIT__QUOTA",
            "GATEWAY_ROUTING__CREATIVE",
            "CONFIG_FILE",
            "PORT",
            "RATE_LIMIT_ENABLED",
            "TIMEOUT_DISABLED",
            "HEALTH_INTERVAL_SECS",
            "LOG_JSON",
        ] {
            env::remove_var(var);
        }
    }
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();

    let config = AppConfig::load_from_args(ARGS).expect("defaults should load");
    assert_eq!(config.server.port, 3000);
    assert!(!config.server.is_production());
    assert!(config.resilience.rate_limit_enabled);
    assert_eq!(config.resilience.rate_limit.quota, 60);
    assert_eq!(config.health.interval_secs, 30);
    assert_eq!(config.routing.rewriter, "gpt-4o-mini");
    assert!(config.pricing.is_empty());
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    unsafe {
        env::set_var("GATEWAY_SERVER__PORT", "9090");
        env::set_var("GATEWAY_SERVER__ENVIRONMENT", "production");
        env::set_var("GATEWAY_RESILIENCE__RATE_LIMIT__QUOTA", "5");
    }

    let config = AppConfig::load_from_args(ARGS).expect("Failed to load config");
    assert_eq!(config.server.port, 9090);
    assert!(config.server.is_production());
    assert_eq!(config.resilience.rate_limit.quota, 5);

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();

    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("Failed to create temp config");
    write!(
        file,
        r#"
server:
  port: 7070
routing:
  creative: claude-3-5-sonnet
pricing:
  gpt-4o: 0.01
endpoints:
  gpt-4o: https://openrouter.ai/api
"#
    )
    .unwrap();

    unsafe {
        env::set_var("CONFIG_FILE", file.path());
    }

    let config = AppConfig::load_from_args(ARGS).expect("Failed to load config from file");
    assert_eq!(config.server.port, 7070);
    assert_eq!(config.routing.creative, "claude-3-5-sonnet");
    // Unset routing keys keep their defaults.
    assert_eq!(config.routing.code, "claude-3-5-sonnet");
    assert_eq!(config.pricing.get("gpt-4o"), Some(&0.01));
    assert_eq!(
        config.endpoints.get("gpt-4o").map(String::as_str),
        Some("https://openrouter.ai/api")
    );

    clear_env_vars();
}

#[test]
#[serial]
fn test_cli_beats_env_and_file() {
    clear_env_vars();
    unsafe {
        env::set_var("GATEWAY_SERVER__PORT", "9090");
    }

    let config = AppConfig::load_from_args([
        "guardian-gateway",
        "--port",
        "8181",
        "--health-interval-secs",
        "0",
    ])
    .expect("Failed to load config");
    assert_eq!(config.server.port, 8181);
    assert!(!config.health.enabled);

    clear_env_vars();
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    clear_env_vars();
    let result = AppConfig::load_from_args(["guardian-gateway", "--config", "does-not-exist.yaml"]);
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_cwd_config_fallback() {
    clear_env_vars();

    let cwd_path = "config.yaml";
    fs::write(cwd_path, "server:\n  port: 6060\n").expect("Failed to write ./config.yaml");

    let config = AppConfig::load_from_args(ARGS);
    fs::remove_file(cwd_path).unwrap();

    assert_eq!(config.expect("Failed to load config").server.port, 6060);
}
