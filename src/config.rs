use anyhow::{bail, Context, Result};
use reqwest::Url;

pub const BOT_TOKEN_VAR: &str = "BOT_API_TOKEN";
pub const FRONTEND_URL_VAR: &str = "FRONTEND_URL";
pub const PORT_VAR: &str = "PORT";
pub const MODE_VAR: &str = "APP_ENV";
/// Read when `APP_ENV` is unset, so existing Node-style `.env` files keep their mode.
pub const LEGACY_MODE_VAR: &str = "NODE_ENV";
pub const ALLOWED_ORIGINS_VAR: &str = "ALLOWED_ORIGINS";

/// Origin of the Mini App dev server, always allowed alongside the frontend.
pub const LOCAL_DEV_ORIGIN: &str = "http://localhost:3000";

/// `Unspecified` (no mode set) mounts routes unprefixed but never exposes
/// error detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeploymentMode {
    Development,
    Production,
    #[default]
    Unspecified,
}

impl DeploymentMode {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" => Ok(DeploymentMode::Development),
            "production" => Ok(DeploymentMode::Production),
            other => bail!(
                "{} must be 'development' or 'production', got '{}'",
                MODE_VAR,
                other
            ),
        }
    }

    /// Route prefix for the intake and health endpoints.
    pub fn api_prefix(self) -> &'static str {
        match self {
            DeploymentMode::Development | DeploymentMode::Unspecified => "",
            DeploymentMode::Production => "/api",
        }
    }

    /// Name reported by the health check; `None` when no mode was set.
    pub fn name(self) -> Option<&'static str> {
        match self {
            DeploymentMode::Development => Some("development"),
            DeploymentMode::Production => Some("production"),
            DeploymentMode::Unspecified => None,
        }
    }

    /// Whether 500 responses may carry the underlying error message.
    pub fn exposes_error_detail(self) -> bool {
        self == DeploymentMode::Development
    }
}

impl std::fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name().unwrap_or("unspecified"))
    }
}

/// Process configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub frontend_url: Url,
    pub port: u16,
    pub mode: DeploymentMode,
    /// CORS allow-list, already deduplicated.
    pub allowed_origins: Vec<String>,
}

fn default_port() -> u16 {
    5000
}

/// Fail on the first required setting that is missing or blank.
pub fn validate_required(required: &[(&str, Option<&str>)]) -> Result<()> {
    for (name, value) in required {
        let present = value.map(|v| !v.trim().is_empty()).unwrap_or(false);
        if !present {
            bail!("{} is not set in environment variables", name);
        }
    }
    Ok(())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bot_token = lookup(BOT_TOKEN_VAR);
        let frontend_url = lookup(FRONTEND_URL_VAR);

        validate_required(&[
            (BOT_TOKEN_VAR, bot_token.as_deref()),
            (FRONTEND_URL_VAR, frontend_url.as_deref()),
        ])?;

        // Both are Some and non-blank past validation
        let bot_token = bot_token.unwrap_or_default().trim().to_string();
        let frontend_raw = frontend_url.unwrap_or_default();

        let frontend_url = Url::parse(frontend_raw.trim())
            .with_context(|| format!("{} is not a valid URL: {}", FRONTEND_URL_VAR, frontend_raw))?;
        if !matches!(frontend_url.scheme(), "http" | "https") {
            bail!(
                "{} must be an http(s) URL, got scheme '{}'",
                FRONTEND_URL_VAR,
                frontend_url.scheme()
            );
        }

        let port = match lookup(PORT_VAR).filter(|p| !p.trim().is_empty()) {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .with_context(|| format!("{} is not a valid port: {}", PORT_VAR, raw))?,
            None => default_port(),
        };

        let mode = match lookup(MODE_VAR)
            .filter(|m| !m.trim().is_empty())
            .or_else(|| lookup(LEGACY_MODE_VAR).filter(|m| !m.trim().is_empty()))
        {
            Some(raw) => DeploymentMode::parse(&raw)?,
            None => DeploymentMode::default(),
        };

        let extra = lookup(ALLOWED_ORIGINS_VAR).unwrap_or_default();
        let allowed_origins = build_allowed_origins(&frontend_url, &extra);

        Ok(Config {
            bot_token,
            frontend_url,
            port,
            mode,
            allowed_origins,
        })
    }

    pub fn intake_path(&self) -> String {
        format!("{}/send-data", self.mode.api_prefix())
    }

    pub fn health_path(&self) -> String {
        format!("{}/health", self.mode.api_prefix())
    }
}

fn build_allowed_origins(frontend_url: &Url, extra: &str) -> Vec<String> {
    let mut origins: Vec<String> = Vec::new();
    let candidates = std::iter::once(frontend_url.origin().ascii_serialization())
        .chain(std::iter::once(LOCAL_DEV_ORIGIN.to_string()))
        .chain(
            extra
                .split(',')
                .map(|o| o.trim().trim_end_matches('/').to_string())
                .filter(|o| !o.is_empty()),
        );

    for origin in candidates {
        if !origins.contains(&origin) {
            origins.push(origin);
        }
    }
    origins
}
