//! Portal environments and endpoint constants
//!
//! The portal runs three deployments. Every URL the client needs (identity
//! provider login/logout, the callback page the web view watches for, and
//! the REST API base) is derived from the environment's host.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

pub const HOST_PROD: &str = "www.semdcp.com";
pub const HOST_QA: &str = "dcpqa.semdcp.com";
pub const HOST_DEV: &str = "dcpdev.semdcp.com";

pub const SSO_HOST_PROD: &str = "fedlogin.cat.com";
pub const SSO_HOST_QA: &str = "loginmcqa.rd.cat.com";
pub const SSO_HOST_DEV: &str = "loginmcqa.rd.cat.com";

/// Local PIN length in digits.
pub const PIN_LENGTH: usize = 4;

/// Mismatches allowed in one challenge before a forced logout.
pub const DEFAULT_MAX_PIN_ATTEMPTS: u32 = 3;

/// A successful PIN challenge stays valid this long.
pub const DEFAULT_PIN_VALIDITY_HOURS: i64 = 24;

/// Portal deployment the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Prod,
    #[default]
    Qa,
    Dev,
}

impl Environment {
    pub fn host(self) -> &'static str {
        match self {
            Environment::Prod => HOST_PROD,
            Environment::Qa => HOST_QA,
            Environment::Dev => HOST_DEV,
        }
    }

    pub fn sso_host(self) -> &'static str {
        match self {
            Environment::Prod => SSO_HOST_PROD,
            Environment::Qa => SSO_HOST_QA,
            Environment::Dev => SSO_HOST_DEV,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Environment::Prod => "prod",
            Environment::Qa => "qa",
            Environment::Dev => "dev",
        };
        f.write_str(label)
    }
}

impl FromStr for Environment {
    type Err = common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prod" => Ok(Environment::Prod),
            "qa" => Ok(Environment::Qa),
            "dev" => Ok(Environment::Dev),
            other => Err(common::Error::UnknownEnvironment(other.to_string())),
        }
    }
}

/// URLs derived from an [`Environment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Entry point of the browser-delegated login flow.
    pub login_url: String,
    pub logout_url: String,
    /// Page the identity provider redirects to; the web view extracts the
    /// callback payload once it lands here.
    pub callback_url: String,
    /// REST API base, no trailing slash.
    pub api_base_url: String,
}

impl Endpoints {
    pub fn for_environment(env: Environment) -> Self {
        let host = env.host();
        Self {
            login_url: format!("https://{host}/Login/GetB2CLogin?isFromMobile=true"),
            logout_url: format!("https://{host}/Oauth_Redirect_ECApp/Logout"),
            callback_url: format!("https://{host}/response-oidc"),
            api_base_url: format!("https://{host}/ecapi/api"),
        }
    }

    /// Replace the API base (e.g. a local mock server).
    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base_url = base.trim_end_matches('/').to_string();
        self
    }

    /// Whether a web view navigation has reached the callback page.
    pub fn is_callback(&self, url: &str) -> bool {
        url.starts_with(&self.callback_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qa_is_the_default_environment() {
        assert_eq!(Environment::default(), Environment::Qa);
    }

    #[test]
    fn endpoints_follow_host() {
        let prod = Endpoints::for_environment(Environment::Prod);
        assert_eq!(prod.api_base_url, "https://www.semdcp.com/ecapi/api");
        assert_eq!(
            prod.login_url,
            "https://www.semdcp.com/Login/GetB2CLogin?isFromMobile=true"
        );
        assert_eq!(prod.callback_url, "https://www.semdcp.com/response-oidc");

        let dev = Endpoints::for_environment(Environment::Dev);
        assert!(dev.logout_url.starts_with("https://dcpdev.semdcp.com/"));
    }

    #[test]
    fn environment_parses_case_insensitively() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert_eq!(" qa ".parse::<Environment>().unwrap(), Environment::Qa);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn api_base_override_strips_trailing_slash() {
        let endpoints =
            Endpoints::for_environment(Environment::Qa).with_api_base("http://127.0.0.1:9000/api/");
        assert_eq!(endpoints.api_base_url, "http://127.0.0.1:9000/api");
    }

    #[test]
    fn callback_detection() {
        let endpoints = Endpoints::for_environment(Environment::Qa);
        assert!(endpoints.is_callback("https://dcpqa.semdcp.com/response-oidc?code=abc"));
        assert!(!endpoints.is_callback("https://loginmcqa.rd.cat.com/authorize"));
    }

    #[test]
    fn sso_hosts() {
        assert_eq!(Environment::Prod.sso_host(), "fedlogin.cat.com");
        assert_eq!(Environment::Dev.sso_host(), Environment::Qa.sso_host());
    }
}
