use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use crate::core::api::HttpConfig;
use crate::core::keyring;
use crate::core::models::Role;
use crate::engine::EngineConfig;

const DEFAULT_DEBOUNCE_MS: u64 = 200;
const DEFAULT_READ_RETRIES: usize = 2;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Runtime config. The credential is always a plain String in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_url: String,
    pub account: String,
    pub role: Role,
    pub credential: String,
    pub debounce_ms: u64,
    pub read_retries: usize,
    pub timeout_secs: u64,
}

/// On-disk representation. The credential is either a keyring reference or plaintext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileConfig {
    pub api_url: String,
    pub account: String,
    pub role: Role,
    pub credential: CredentialBackend,
    #[serde(default)]
    pub debounce_ms: Option<u64>,
    #[serde(default)]
    pub read_retries: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend")]
pub enum CredentialBackend {
    #[serde(rename = "keyring")]
    Keyring,
    #[serde(rename = "plaintext")]
    Plaintext { value: String },
}

/// What the front end has to ask for when config can't be resolved automatically.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigNeedsInput {
    /// No config file exists.
    FullSetup,
    /// Config exists but the credential is missing from the keyring.
    CredentialOnly {
        api_url: String,
        account: String,
        role: Role,
        error: Option<String>,
    },
}

fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("marketsync")
        .join("config.json")
}

/// Host part of the API URL, used to scope keyring entries.
pub fn api_host(api_url: &str) -> String {
    Url::parse(api_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| api_url.to_string())
}

impl FileConfig {
    pub fn load() -> Result<Option<Self>, String> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, String> {
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(path).map_err(|e| format!("read config: {e}"))?;
        let cfg: FileConfig =
            serde_json::from_str(&data).map_err(|e| format!("parse config: {e}"))?;
        Ok(Some(cfg))
    }

    pub fn save(&self) -> Result<(), String> {
        self.save_to(&config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| format!("create config dir: {e}"))?;
        }
        let data =
            serde_json::to_string_pretty(self).map_err(|e| format!("serialize config: {e}"))?;
        fs::write(path, data).map_err(|e| format!("write config: {e}"))
    }
}

impl Config {
    /// Try env vars. Returns None if any required var is missing.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let api_url = var("MARKETSYNC_API_URL")?;
        let credential = var("MARKETSYNC_TOKEN")?;
        let role = var("MARKETSYNC_ROLE")
            .and_then(|r| r.parse().ok())
            .unwrap_or(Role::Client);
        let account = var("MARKETSYNC_ACCOUNT").unwrap_or_default();
        let debounce_ms = var("MARKETSYNC_DEBOUNCE_MS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_DEBOUNCE_MS);
        let read_retries = var("MARKETSYNC_READ_RETRIES")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_READ_RETRIES);
        let timeout_secs = var("MARKETSYNC_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Some(Config {
            api_url,
            account,
            role,
            credential,
            debounce_ms,
            read_retries,
            timeout_secs,
        })
    }

    /// Build runtime Config from a FileConfig + resolved credential.
    pub fn from_file_config(fc: &FileConfig, credential: String) -> Self {
        Config {
            api_url: fc.api_url.clone(),
            account: fc.account.clone(),
            role: fc.role,
            credential,
            debounce_ms: fc.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS),
            read_retries: fc.read_retries.unwrap_or(DEFAULT_READ_RETRIES),
            timeout_secs: fc.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Resolution order: env vars → config file + keyring → Err(ConfigNeedsInput).
    pub fn resolve() -> Result<Self, ConfigNeedsInput> {
        // 1. Env vars override everything
        if let Some(config) = Self::from_env() {
            log::info!("Config loaded from environment variables");
            return Ok(config);
        }

        // 2. Config file + keyring
        Self::resolve_file(FileConfig::load(), |fc| {
            keyring::get_credential(&fc.account, &api_host(&fc.api_url)).map_err(|e| e.to_string())
        })
    }

    fn resolve_file(
        loaded: Result<Option<FileConfig>, String>,
        lookup_keyring: impl FnOnce(&FileConfig) -> Result<String, String>,
    ) -> Result<Self, ConfigNeedsInput> {
        match loaded {
            Ok(Some(fc)) => match &fc.credential {
                CredentialBackend::Plaintext { value } => {
                    log::info!("Config loaded from file (plaintext credential)");
                    Ok(Self::from_file_config(&fc, value.clone()))
                }
                CredentialBackend::Keyring => match lookup_keyring(&fc) {
                    Ok(credential) => {
                        log::info!("Config loaded from file + keyring");
                        Ok(Self::from_file_config(&fc, credential))
                    }
                    Err(e) => {
                        log::warn!("Keyring lookup failed: {}", e);
                        Err(ConfigNeedsInput::CredentialOnly {
                            api_url: fc.api_url,
                            account: fc.account,
                            role: fc.role,
                            error: Some(format!("Keyring unavailable: {e}")),
                        })
                    }
                },
            },
            Ok(None) => {
                log::info!("No config file found, need full setup");
                Err(ConfigNeedsInput::FullSetup)
            }
            Err(e) => {
                log::warn!("Config file error: {}", e);
                Err(ConfigNeedsInput::FullSetup)
            }
        }
    }

    pub fn http_config(&self) -> Result<HttpConfig, String> {
        let base_url =
            Url::parse(&self.api_url).map_err(|e| format!("invalid api url {:?}: {e}", self.api_url))?;
        Ok(HttpConfig {
            base_url,
            role: self.role,
            credential: self.credential.clone(),
            read_retries: self.read_retries,
            timeout: Duration::from_secs(self.timeout_secs),
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            viewer_role: self.role,
            ..EngineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn file_config(credential: CredentialBackend) -> FileConfig {
        FileConfig {
            api_url: "https://api.example.com/v1".into(),
            account: "ana".into(),
            role: Role::Provider,
            credential,
            debounce_ms: None,
            read_retries: Some(0),
            timeout_secs: None,
        }
    }

    #[test]
    fn env_requires_url_and_token() {
        let vars: HashMap<&str, &str> = [("MARKETSYNC_API_URL", "https://x")].into();
        assert_eq!(Config::from_lookup(|k| vars.get(k).map(|v| v.to_string())), None);

        let vars: HashMap<&str, &str> = [
            ("MARKETSYNC_API_URL", "https://x"),
            ("MARKETSYNC_TOKEN", "t"),
            ("MARKETSYNC_ROLE", "provider"),
            ("MARKETSYNC_DEBOUNCE_MS", "50"),
        ]
        .into();
        let config = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.role, Role::Provider);
        assert_eq!(config.debounce_ms, 50);
        assert_eq!(config.read_retries, DEFAULT_READ_RETRIES);
        assert_eq!(config.engine_config().debounce, Duration::from_millis(50));
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        assert_eq!(FileConfig::load_from(&path), Ok(None));

        let fc = file_config(CredentialBackend::Plaintext { value: "tok".into() });
        fc.save_to(&path).unwrap();
        assert_eq!(FileConfig::load_from(&path), Ok(Some(fc)));
    }

    #[test]
    fn plaintext_file_resolves_without_keyring() {
        let fc = file_config(CredentialBackend::Plaintext { value: "tok".into() });
        let config = Config::resolve_file(Ok(Some(fc)), |_| panic!("keyring not expected")).unwrap();
        assert_eq!(config.credential, "tok");
        assert_eq!(config.debounce_ms, DEFAULT_DEBOUNCE_MS);
        assert_eq!(config.read_retries, 0);
    }

    #[test]
    fn keyring_failure_asks_for_credential_only() {
        let fc = file_config(CredentialBackend::Keyring);
        let err = Config::resolve_file(Ok(Some(fc)), |_| Err("locked".into())).unwrap_err();
        assert_eq!(
            err,
            ConfigNeedsInput::CredentialOnly {
                api_url: "https://api.example.com/v1".into(),
                account: "ana".into(),
                role: Role::Provider,
                error: Some("Keyring unavailable: locked".into()),
            }
        );
    }

    #[test]
    fn missing_or_broken_file_needs_full_setup() {
        assert_eq!(
            Config::resolve_file(Ok(None), |_| unreachable!()),
            Err(ConfigNeedsInput::FullSetup)
        );
        assert_eq!(
            Config::resolve_file(Err("parse config: eof".into()), |_| unreachable!()),
            Err(ConfigNeedsInput::FullSetup)
        );
    }

    #[test]
    fn http_config_from_runtime_config() {
        let fc = file_config(CredentialBackend::Plaintext { value: "tok".into() });
        let http = Config::from_file_config(&fc, "tok".into()).http_config().unwrap();
        assert_eq!(http.base_url.as_str(), "https://api.example.com/v1");
        assert_eq!(http.role, Role::Provider);
        assert_eq!(api_host("https://api.example.com/v1"), "api.example.com");
    }
}
