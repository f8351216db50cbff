use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::gateway::GatewayDirectory;
use crate::model::TemperatureUnit;
use crate::provider::ProviderId;
use crate::transport::Endpoint;

/// Configuration for a single provider (e.g., API key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,

    /// Replaces the provider's public API root, e.g. for a proxy or a local mock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Outbound relay settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Two-line file: account, then secret. Defaults to `credentials.txt` next to the config.
    pub credentials_file: Option<PathBuf>,
    pub send_timeout_secs: u64,
    /// Recipients handled at once; sends on the shared session are still serialized.
    pub concurrency: usize,
    /// Truncate SMS bodies to this many characters when set.
    pub sms_max_chars: Option<usize>,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "smtp.gmail.com".to_string(),
            port: 587,
            credentials_file: None,
            send_timeout_secs: 30,
            concurrency: 4,
            sms_max_chars: None,
        }
    }
}

impl SmtpConfig {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub unit: TemperatureUnit,
    pub subject: String,
    pub recipients_file: Option<PathBuf>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            unit: TemperatureUnit::default(),
            subject: "Your weather report".to_string(),
            recipients_file: None,
        }
    }
}

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Optional default provider id, e.g. "openweather" or "weatherapi".
    pub default_provider: Option<String>,

    /// Example TOML:
    /// [providers.openweather]
    /// api_key = "..."
    /// base_url = "https://proxy.example.com"  # optional
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default)]
    pub smtp: SmtpConfig,

    #[serde(default)]
    pub report: ReportConfig,

    /// Extra or replacement SMS gateways:
    /// [gateways]
    /// "US-CELLULAR" = "email.uscc.net"
    #[serde(default)]
    pub gateways: BTreeMap<String, String>,
}

impl Config {
    /// Return the default provider as a strongly-typed ProviderId.
    pub fn default_provider_id(&self) -> Result<ProviderId> {
        let s = self.default_provider.as_ref().ok_or_else(|| {
            anyhow::anyhow!(
                "No default provider configured.\n\
                 Hint: run `wxmail configure <provider>` \
                 (e.g. `wxmail configure weatherapi`) first."
            )
        })?;

        ProviderId::try_from(s.as_str())
    }

    /// Store default provider as string.
    pub fn set_default_provider(&mut self, id: ProviderId) {
        self.default_provider = Some(id.as_str().to_string());
    }

    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("dev", "wxmail", "wxmail")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Configured credentials file, or `credentials.txt` in the config directory.
    pub fn credentials_file_path(&self) -> Result<PathBuf> {
        match &self.smtp.credentials_file {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::project_dirs()?.config_dir().join("credentials.txt")),
        }
    }

    /// Convenience helper: set/replace a provider API key and optionally set default provider.
    /// A configured `base_url` is kept.
    pub fn upsert_provider_api_key(&mut self, provider_id: ProviderId, api_key: String) {
        self.providers
            .entry(provider_id.as_str().to_string())
            .and_modify(|cfg| cfg.api_key.clone_from(&api_key))
            .or_insert_with(|| ProviderConfig {
                api_key,
                base_url: None,
            });

        if self.default_provider.is_none() {
            self.default_provider = Some(provider_id.to_string());
        }
    }

    /// Returns API key for a provider, if present.
    pub fn provider_api_key(&self, provider_id: ProviderId) -> Option<&str> {
        self.providers.get(provider_id.as_str()).map(|cfg| cfg.api_key.as_str())
    }

    /// Returns the API root override for a provider, if present.
    pub fn provider_base_url(&self, provider_id: ProviderId) -> Option<&str> {
        self.providers
            .get(provider_id.as_str())
            .and_then(|cfg| cfg.base_url.as_deref())
    }

    pub fn is_provider_configured(&self, provider_id: ProviderId) -> bool {
        self.provider_api_key(provider_id).is_some()
    }

    /// Built-in carriers plus the `[gateways]` overrides.
    pub fn gateway_directory(&self) -> GatewayDirectory {
        GatewayDirectory::with_overrides(&self.gateways)
    }
}

/// Relay account and secret. The secret never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    account: String,
    secret: String,
}

impl Credentials {
    pub fn new(account: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            secret: secret.into(),
        }
    }

    /// Line 1 is the account, line 2 the secret.
    pub fn parse(contents: &str) -> Result<Self> {
        let mut lines = contents.lines().map(str::trim);
        let account = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| anyhow!("Credentials are missing the account line"))?;
        let secret = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| anyhow!("Credentials are missing the secret line"))?;
        Ok(Self::new(account, secret))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials file: {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Invalid credentials file: {}", path.display()))
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Carrier;
    use crate::provider::ProviderId;

    #[test]
    fn default_provider_id_errors_when_not_set() {
        let cfg = Config::default();
        let err = cfg.default_provider_id().unwrap_err();

        assert!(err.to_string().contains("No default provider configured"));
    }

    #[test]
    fn set_api_key_and_default_for_provider() {
        let mut cfg = Config::default();

        cfg.upsert_provider_api_key(ProviderId::WeatherApi, "WEATHER_KEY".into());

        let default = cfg.default_provider_id().expect("default provider must exist");
        assert_eq!(default, ProviderId::WeatherApi);

        let key = cfg.provider_api_key(ProviderId::WeatherApi);
        assert_eq!(key, Some("WEATHER_KEY"));
        assert!(cfg.is_provider_configured(ProviderId::WeatherApi));
        assert!(!cfg.is_provider_configured(ProviderId::OpenWeather));
    }

    #[test]
    fn set_default_provider_overrides_default() {
        let mut cfg = Config::default();

        cfg.upsert_provider_api_key(ProviderId::WeatherApi, "WEATHER_KEY".into());
        cfg.upsert_provider_api_key(ProviderId::OpenWeather, "OPEN_KEY".into());
        assert_eq!(cfg.default_provider_id().expect("default"), ProviderId::WeatherApi);

        cfg.set_default_provider(ProviderId::OpenWeather);
        assert_eq!(cfg.default_provider_id().expect("default"), ProviderId::OpenWeather);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            default_provider = "weatherapi"

            [providers.weatherapi]
            api_key = "KEY"

            [smtp]
            port = 2525

            [report]
            unit = "celsius"

            [gateways]
            "us-cellular" = "email.uscc.net"
            "#,
        )
        .expect("valid config");

        assert_eq!(cfg.smtp.host, "smtp.gmail.com");
        assert_eq!(cfg.smtp.port, 2525);
        assert_eq!(cfg.smtp.send_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.report.unit, TemperatureUnit::Celsius);
        assert_eq!(cfg.report.subject, "Your weather report");

        let gateways = cfg.gateway_directory();
        assert_eq!(gateways.domain(&Carrier::new("US-CELLULAR")), Some("email.uscc.net"));
        assert_eq!(gateways.domain(&Carrier::new("AT&T")), Some("txt.att.net"));
    }

    #[test]
    fn base_url_survives_a_new_api_key() {
        let mut cfg: Config = toml::from_str(
            r#"
            [providers.openweather]
            api_key = "OLD"
            base_url = "http://localhost:8080"
            "#,
        )
        .expect("valid config");
        assert_eq!(cfg.provider_base_url(ProviderId::OpenWeather), Some("http://localhost:8080"));

        cfg.upsert_provider_api_key(ProviderId::OpenWeather, "NEW".into());
        assert_eq!(cfg.provider_api_key(ProviderId::OpenWeather), Some("NEW"));
        assert_eq!(cfg.provider_base_url(ProviderId::OpenWeather), Some("http://localhost:8080"));
        assert_eq!(cfg.provider_base_url(ProviderId::WeatherApi), None);
    }

    #[test]
    fn save_and_load_roundtrip_through_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::WeatherApi, "KEY".into());
        cfg.smtp.sms_max_chars = Some(160);
        cfg.save_to(&path).expect("save");

        let loaded = Config::load_from(&path).expect("load");
        assert_eq!(loaded.provider_api_key(ProviderId::WeatherApi), Some("KEY"));
        assert_eq!(loaded.smtp, cfg.smtp);
    }

    #[test]
    fn missing_config_file_is_empty_config() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cfg = Config::load_from(&dir.path().join("absent.toml")).expect("load");
        assert!(cfg.default_provider.is_none());
    }

    #[test]
    fn credentials_parse_two_lines() {
        let creds = Credentials::parse("me@example.com\nhunter2\n").expect("parse");
        assert_eq!(creds.account(), "me@example.com");
        assert_eq!(creds.secret(), "hunter2");
        assert!(!format!("{creds:?}").contains("hunter2"));
    }

    #[test]
    fn credentials_require_both_lines() {
        let err = Credentials::parse("me@example.com\n").unwrap_err();
        assert!(err.to_string().contains("secret"));
    }

    #[test]
    fn credentials_load_reports_path() {
        let err = Credentials::load(Path::new("/nonexistent/credentials.txt")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/credentials.txt"));
    }
}
