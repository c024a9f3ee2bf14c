use publisher::config::{ConfigError, ConfigLoader};
use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

const CRYPTO_KEY: &str = "YWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWE=";

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    unsafe {
        for key in [
            "POBLYSH_PROFILE",
            "POBLYSH_API_BIND_ADDR",
            "POBLYSH_LOG_LEVEL",
            "POBLYSH_CRYPTO_KEY",
            "POBLYSH_CRON_SECRET",
            "POBLYSH_CRON_SECRETS",
            "POBLYSH_OWNER_TOKEN_SECRET",
            "POBLYSH_VERIFICATION_MAX_ATTEMPTS",
        ] {
            env::remove_var(key);
        }
    }
}

fn set_required_secrets() {
    unsafe {
        env::set_var("POBLYSH_CRYPTO_KEY", CRYPTO_KEY);
        env::set_var("POBLYSH_CRON_SECRET", "cron-secret-for-tests");
        env::set_var("POBLYSH_OWNER_TOKEN_SECRET", "owner-secret-for-tests");
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

#[test]
fn loads_defaults_when_only_secrets_are_present() {
    let _guard = env_guard();
    clear_env();
    set_required_secrets();

    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.cron_secrets, vec!["cron-secret-for-tests".to_string()]);
    assert_eq!(cfg.verification.max_attempts, 5);
    assert_eq!(cfg.crypto_key.as_ref().map(Vec::len), Some(32));
    cfg.bind_addr().expect("default bind addr parses");
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "POBLYSH_API_BIND_ADDR=127.0.0.1:3000\n");
    write_env_file(
        &temp_dir,
        ".env.test",
        "POBLYSH_API_BIND_ADDR=192.168.0.10:5000\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "POBLYSH_API_BIND_ADDR=10.0.0.5:6000\n",
    );

    // Select profile via .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        &format!(
            "POBLYSH_PROFILE=test\nPOBLYSH_API_BIND_ADDR=127.0.0.1:4000\n\
             POBLYSH_CRON_SECRETS=first,second\n\
             POBLYSH_OWNER_TOKEN_SECRET=owner-secret-from-file\n\
             POBLYSH_CRYPTO_KEY={CRYPTO_KEY}\n"
        ),
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    assert_eq!(cfg.cron_secrets, vec!["first".to_string(), "second".to_string()]);
    clear_env();
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "POBLYSH_API_BIND_ADDR=127.0.0.1:3000\nPOBLYSH_VERIFICATION_MAX_ATTEMPTS=3\n",
    );

    set_required_secrets();
    unsafe {
        env::set_var("POBLYSH_API_BIND_ADDR", "0.0.0.0:9090");
        env::set_var("POBLYSH_VERIFICATION_MAX_ATTEMPTS", "7");
    }

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with env override");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:9090");
    assert_eq!(cfg.verification.max_attempts, 7);

    clear_env();
}

#[test]
fn invalid_bind_addr_returns_error() {
    let _guard = env_guard();
    clear_env();
    set_required_secrets();

    unsafe {
        env::set_var("POBLYSH_API_BIND_ADDR", "not-an-addr");
    }
    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("invalid bind addr should fail");
    assert!(format!("{}", err).contains("invalid api bind address"));

    clear_env();
}

#[test]
fn missing_owner_token_secret_is_rejected() {
    let _guard = env_guard();
    clear_env();
    set_required_secrets();

    unsafe {
        env::remove_var("POBLYSH_OWNER_TOKEN_SECRET");
    }
    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("owner token secret is required");
    assert!(matches!(err, ConfigError::MissingOwnerTokenSecret));

    clear_env();
}

#[test]
fn malformed_crypto_key_is_rejected() {
    let _guard = env_guard();
    clear_env();
    set_required_secrets();

    unsafe {
        env::set_var("POBLYSH_CRYPTO_KEY", "not base64!");
    }
    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("crypto key must be base64");
    assert!(matches!(err, ConfigError::InvalidCryptoKeyBase64 { .. }));

    clear_env();
}
