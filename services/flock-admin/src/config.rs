//! Configuration types and loading
//!
//! Config precedence: env vars > config file > defaults. The file itself is
//! chosen on the command line (`--config`, or FLOCK_CONFIG). The login
//! password is read from FLOCK_PASSWORD or a password file, never from the
//! TOML.

use common::Secret;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub storage: StorageConfig,
}

/// Backend connection settings
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Upper bound on a credential refresh. Absent means wait indefinitely.
    #[serde(default)]
    pub refresh_timeout_secs: Option<u64>,
}

/// Where the remembered session lives
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    pub dir: PathBuf,
}

fn default_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var("FLOCK_BASE_URL") {
            config.api.base_url = url;
        }

        if !config.api.base_url.starts_with("http://")
            && !config.api.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "api.base_url must start with http:// or https://, got: {}",
                config.api.base_url
            )));
        }

        if config.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "api.timeout_secs must be greater than 0".into(),
            ));
        }

        if config.api.refresh_timeout_secs == Some(0) {
            return Err(common::Error::Config(
                "api.refresh_timeout_secs must be greater than 0 when set".into(),
            ));
        }

        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Option<Duration> {
        self.api.refresh_timeout_secs.map(Duration::from_secs)
    }
}

/// Resolve the login password: FLOCK_PASSWORD first, then `password_file`.
pub fn resolve_password(password_file: Option<&Path>) -> common::Result<Secret> {
    if let Ok(password) = std::env::var("FLOCK_PASSWORD")
        && !password.is_empty()
    {
        return Ok(Secret::new(password));
    }
    if let Some(file) = password_file {
        let password = std::fs::read_to_string(file).map_err(|e| {
            common::Error::Config(format!(
                "failed to read password file {}: {e}",
                file.display()
            ))
        })?;
        let password = password.trim();
        if !password.is_empty() {
            return Ok(Secret::new(password));
        }
    }
    Err(common::Error::MissingSecret(
        "set FLOCK_PASSWORD or pass --password-file".into(),
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that mutate environment variables.
    pub(crate) static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    pub(crate) unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    pub(crate) unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn write_config(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("flock-admin.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn valid_toml() -> &'static str {
        r#"
[api]
base_url = "https://church.example.org/api"

[storage]
dir = "/var/lib/flock"
"#
    }

    #[test]
    fn test_load_valid_config_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("FLOCK_BASE_URL") };
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&write_config(dir.path(), valid_toml())).unwrap();

        assert_eq!(config.api.base_url, "https://church.example.org/api");
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.refresh_timeout(), None);
        assert_eq!(config.storage.dir, PathBuf::from("/var/lib/flock"));
    }

    #[test]
    fn test_refresh_timeout_configured() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("FLOCK_BASE_URL") };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
[api]
base_url = "http://localhost:8080"
timeout_secs = 5
refresh_timeout_secs = 10

[storage]
dir = "state"
"#,
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.refresh_timeout(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/flock-admin.toml"));
        assert!(matches!(result, Err(common::Error::Io(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "[api\nbase_url = ");
        assert!(matches!(Config::load(&path), Err(common::Error::Toml(_))));
    }

    #[test]
    fn test_missing_storage_section_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "[api]\nbase_url = \"https://a.example\"\n");
        assert!(matches!(Config::load(&path), Err(common::Error::Toml(_))));
    }

    #[test]
    fn test_base_url_env_override() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("FLOCK_BASE_URL", "http://127.0.0.1:3000") };
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(&write_config(dir.path(), valid_toml()));
        unsafe { remove_env("FLOCK_BASE_URL") };

        assert_eq!(result.unwrap().api.base_url, "http://127.0.0.1:3000");
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("FLOCK_BASE_URL") };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            "[api]\nbase_url = \"church.example.org\"\n\n[storage]\ndir = \"s\"\n",
        );
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("api.base_url"), "got: {err}");
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("FLOCK_BASE_URL") };
        let dir = tempfile::tempdir().unwrap();

        let path = write_config(
            dir.path(),
            "[api]\nbase_url = \"https://a.example\"\ntimeout_secs = 0\n\n[storage]\ndir = \"s\"\n",
        );
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("timeout_secs"), "got: {err}");

        let path = write_config(
            dir.path(),
            "[api]\nbase_url = \"https://a.example\"\nrefresh_timeout_secs = 0\n\n[storage]\ndir = \"s\"\n",
        );
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("refresh_timeout_secs"), "got: {err}");
    }

    #[test]
    fn test_password_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("FLOCK_PASSWORD", "hunter2") };
        let password = resolve_password(None);
        unsafe { remove_env("FLOCK_PASSWORD") };
        assert_eq!(password.unwrap().expose(), "hunter2");
    }

    #[test]
    fn test_password_from_file_is_trimmed() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("FLOCK_PASSWORD") };
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("password");
        std::fs::write(&file, "  hunter2\n").unwrap();

        assert_eq!(resolve_password(Some(&file)).unwrap().expose(), "hunter2");
    }

    #[test]
    fn test_password_env_overrides_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("FLOCK_PASSWORD", "from-env") };
        let password = resolve_password(Some(Path::new("/nonexistent/password")));
        unsafe { remove_env("FLOCK_PASSWORD") };
        assert_eq!(password.unwrap().expose(), "from-env");
    }

    #[test]
    fn test_password_file_unreadable() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("FLOCK_PASSWORD") };
        let err = resolve_password(Some(Path::new("/nonexistent/password"))).unwrap_err();
        assert!(matches!(err, common::Error::Config(_)), "got: {err:?}");
    }

    #[test]
    fn test_password_missing() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("FLOCK_PASSWORD") };
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("empty");
        std::fs::write(&file, "\n").unwrap();

        assert!(matches!(
            resolve_password(Some(&file)),
            Err(common::Error::MissingSecret(_))
        ));
        assert!(matches!(
            resolve_password(None),
            Err(common::Error::MissingSecret(_))
        ));
    }
}
