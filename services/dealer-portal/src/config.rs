//! Configuration types and loading
//!
//! Config precedence: env vars > config file > defaults. The file path
//! itself comes from `--config` or `CONFIG_PATH`.
//! A missing config file is not an error; every setting has a default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use dealer_auth::{DEFAULT_MAX_PIN_ATTEMPTS, DEFAULT_PIN_VALIDITY_HOURS, Endpoints, Environment};
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub portal: PortalConfig,
    pub storage: StorageConfig,
    pub session: SessionConfig,
}

/// Portal deployment and API settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub environment: Environment,
    /// Overrides the API base derived from `environment`.
    pub api_base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            api_base_url: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub credentials_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            credentials_path: PathBuf::from("credentials.json"),
        }
    }
}

/// PIN policy
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub pin_max_attempts: u32,
    pub pin_validity_hours: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pin_max_attempts: DEFAULT_MAX_PIN_ATTEMPTS,
            pin_validity_hours: DEFAULT_PIN_VALIDITY_HOURS as u32,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Env overrides:
    /// 1. DEALER_PORTAL_ENV replaces `portal.environment`
    /// 2. DEALER_PORTAL_API_BASE replaces `portal.api_base_url`
    pub fn load(path: &Path) -> common::Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents)?
        } else {
            Config::default()
        };

        if let Ok(env) = std::env::var("DEALER_PORTAL_ENV") {
            config.portal.environment = env.parse()?;
        }
        if let Ok(base) = std::env::var("DEALER_PORTAL_API_BASE") {
            config.portal.api_base_url = Some(base);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> common::Result<()> {
        if let Some(base) = &self.portal.api_base_url
            && !base.starts_with("http://")
            && !base.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "api_base_url must start with http:// or https://, got: {base}"
            )));
        }

        if self.portal.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.session.pin_max_attempts == 0 {
            return Err(common::Error::Config(
                "pin_max_attempts must be greater than 0".into(),
            ));
        }

        if self.session.pin_validity_hours == 0 {
            return Err(common::Error::Config(
                "pin_validity_hours must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    pub fn endpoints(&self) -> Endpoints {
        let endpoints = Endpoints::for_environment(self.portal.environment);
        match &self.portal.api_base_url {
            Some(base) => endpoints.with_api_base(base),
            None => endpoints,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.portal.timeout_secs)
    }

    pub fn pin_validity(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.session.pin_validity_hours))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ENV_MUTEX;

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn clear_overrides() {
        unsafe {
            remove_env("DEALER_PORTAL_ENV");
            remove_env("DEALER_PORTAL_API_BASE");
        }
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("dealer-portal.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn valid_toml() -> &'static str {
        r#"
[portal]
environment = "prod"
timeout_secs = 15

[storage]
credentials_path = "/var/lib/dealer-portal/credentials.json"

[session]
pin_max_attempts = 5
"#
    }

    #[test]
    fn test_load_valid_config() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        let config = Config::load(&path).unwrap();
        assert_eq!(config.portal.environment, Environment::Prod);
        assert_eq!(config.timeout(), Duration::from_secs(15));
        assert_eq!(
            config.storage.credentials_path,
            PathBuf::from("/var/lib/dealer-portal/credentials.json")
        );
        assert_eq!(config.session.pin_max_attempts, 5);
        assert_eq!(config.session.pin_validity_hours, 24);
        assert_eq!(
            config.endpoints().api_base_url,
            "https://www.semdcp.com/ecapi/api"
        );
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let config = Config::load(Path::new("/nonexistent/path/dealer-portal.toml")).unwrap();
        assert_eq!(config.portal.environment, Environment::Qa);
        assert_eq!(config.portal.timeout_secs, 10);
        assert_eq!(config.session.pin_max_attempts, 3);
        assert_eq!(config.pin_validity(), chrono::Duration::hours(24));
        assert_eq!(config.storage.credentials_path, PathBuf::from("credentials.json"));
    }

    #[test]
    fn test_load_invalid_toml() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "not valid {{{{ toml");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_unknown_environment_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[portal]\nenvironment = \"staging\"\n");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        unsafe {
            set_env("DEALER_PORTAL_ENV", "dev");
            set_env("DEALER_PORTAL_API_BASE", "http://127.0.0.1:9000/api/");
        }
        let config = Config::load(&path).unwrap();
        clear_overrides();

        assert_eq!(config.portal.environment, Environment::Dev);
        let endpoints = config.endpoints();
        assert_eq!(endpoints.api_base_url, "http://127.0.0.1:9000/api");
        assert!(endpoints.login_url.contains("dcpdev.semdcp.com"));
    }

    #[test]
    fn test_bad_env_override_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("DEALER_PORTAL_ENV", "staging") };
        let result = Config::load(Path::new("/nonexistent/dealer-portal.toml"));
        clear_overrides();

        let err = result.unwrap_err().to_string();
        assert!(err.contains("staging"), "got: {err}");
    }

    #[test]
    fn test_invalid_api_base_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[portal]\napi_base_url = \"dcpqa.semdcp.com/ecapi/api\"\n");

        let err = Config::load(&path).unwrap_err().to_string();
        assert!(
            err.contains("api_base_url must start with http"),
            "error message should explain the issue, got: {err}"
        );
    }

    #[test]
    fn test_zero_values_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let dir = tempfile::tempdir().unwrap();
        for body in [
            "[portal]\ntimeout_secs = 0\n",
            "[session]\npin_max_attempts = 0\n",
            "[session]\npin_validity_hours = 0\n",
        ] {
            let path = write_config(&dir, body);
            assert!(Config::load(&path).is_err(), "accepted: {body}");
        }
    }
}
