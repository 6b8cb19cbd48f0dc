use auth_server::config::{AuthConfig, StoreBackend, UsersBackend};
use serial_test::serial;

const CONFIG_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/config/auth.toml");

const OVERRIDES: [&str; 7] = [
    "JWT_SECRET",
    "API_KEY_PUBLIC",
    "SERVER_HOST",
    "SERVER_PORT",
    "REDIS_URL",
    "MONGODB_URI",
    "DATABASE_NAME",
];

fn clear_overrides() {
    for name in OVERRIDES {
        std::env::remove_var(name);
    }
}

#[test]
#[serial]
fn test_load_sample_config() {
    clear_overrides();
    let config = AuthConfig::load_from_file(CONFIG_PATH).expect("Failed to load config");

    assert_eq!(config.server.port, 8080);
    assert_eq!(config.tokens.auth_code_ttl_secs, 300);
    assert_eq!(config.tokens.access_ttl_secs, 900);
    assert_eq!(config.store.backend, StoreBackend::Memory);
    assert_eq!(config.users.backend, UsersBackend::Memory);
}

#[test]
#[serial]
fn test_env_overrides_win() {
    clear_overrides();
    std::env::set_var("JWT_SECRET", "env-secret-env-secret-env-secret-xx");
    std::env::set_var("API_KEY_PUBLIC", "env-key");
    std::env::set_var("SERVER_PORT", "9191");
    std::env::set_var("REDIS_URL", "redis://cache:6380");
    std::env::set_var("DATABASE_NAME", "override_db");

    let config = AuthConfig::load_from_file(CONFIG_PATH).expect("Failed to load config");
    clear_overrides();

    assert_eq!(config.tokens.secret, "env-secret-env-secret-env-secret-xx");
    assert_eq!(config.api.public_key, "env-key");
    assert_eq!(config.server.port, 9191);
    assert_eq!(config.store.redis_url, "redis://cache:6380");
    assert_eq!(config.users.database, "override_db");
}

#[test]
#[serial]
fn test_short_env_secret_fails_validation() {
    clear_overrides();
    std::env::set_var("JWT_SECRET", "too-short");

    let result = AuthConfig::load_from_file(CONFIG_PATH);
    clear_overrides();

    assert!(result.is_err());
}

#[test]
#[serial]
fn test_unparseable_port_is_ignored() {
    clear_overrides();
    std::env::set_var("SERVER_PORT", "not-a-port");

    let config = AuthConfig::load_from_file(CONFIG_PATH).expect("Failed to load config");
    clear_overrides();

    assert_eq!(config.server.port, 8080);
}

#[test]
fn test_invalid_config_path() {
    let result = AuthConfig::load_from_file("nonexistent/auth.toml");
    assert!(result.is_err());
}
