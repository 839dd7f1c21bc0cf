use crate::loader::Credentials;
use std::env;
use std::time::Duration;

/// Bridge configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// Public base URL players use to reach the bridge; rewritten playlists link here
    pub base_url: String,
    pub is_dev: bool,
    /// Header name for the auth token (`ACCESS_TOKEN_HEADER_KEY`)
    pub access_token_header_key: Option<String>,
    /// Token value (`ACCESS_TOKEN`)
    pub access_token: Option<String>,
    /// Per-request upstream timeout in seconds, 0 disables it (default: 30)
    pub fetch_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    /// In DEV mode, provides sensible defaults. In PROD mode, PORT and BASE_URL are required.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let is_dev = env::var("DEV_MODE")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        // Port: required in prod, defaults to 3000 in dev
        let port: u16 = if is_dev {
            env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?
        } else {
            env::var("PORT")
                .map_err(|_| "PORT is required in production")?
                .parse()?
        };

        // Base URL: required in prod, defaults to loopback in dev
        let base_url = if is_dev {
            env::var("BASE_URL").unwrap_or_else(|_| format!("http://127.0.0.1:{}", port))
        } else {
            env::var("BASE_URL").map_err(|_| "BASE_URL is required in production")?
        };
        url::Url::parse(&base_url).map_err(|e| format!("BASE_URL is not a valid URL: {e}"))?;

        let access_token_header_key = env::var("ACCESS_TOKEN_HEADER_KEY")
            .ok()
            .filter(|v| !v.is_empty());
        let access_token = env::var("ACCESS_TOKEN").ok().filter(|v| !v.is_empty());

        let fetch_timeout_secs = env::var("FETCH_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        let config = Config {
            port,
            base_url,
            is_dev,
            access_token_header_key,
            access_token,
            fetch_timeout_secs,
        };

        // Fail early on a half-configured or invalid auth header
        config.credentials()?;

        Ok(config)
    }

    /// Validated credentials, if both header key and token are set
    pub fn credentials(&self) -> crate::error::Result<Option<Credentials>> {
        Credentials::from_parts(
            self.access_token_header_key.as_deref(),
            self.access_token.as_deref(),
        )
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        (self.fetch_timeout_secs > 0).then(|| Duration::from_secs(self.fetch_timeout_secs))
    }
}
