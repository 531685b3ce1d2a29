// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use invoicedesk_app::ReviewFilter;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_NAME: &str = "invoicedesk";
pub const CONFIG_PATH_ENV: &str = "INVOICEDESK_CONFIG_PATH";
pub const API_URL_ENV: &str = "INVOICEDESK_API_URL";

const CONFIG_VERSION: i64 = 1;
const DEFAULT_PROXY_ORIGIN: &str = "http://127.0.0.1:5173";
const DEFAULT_API_TIMEOUT: &str = "10s";
const DEFAULT_TOAST_TIMEOUT: &str = "2500ms";
const DEFAULT_UPLOAD_RELOAD_DELAY: &str = "300ms";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub version: i64,
    #[serde(default)]
    pub api: Api,
    #[serde(default)]
    pub ui: Ui,
    #[serde(default)]
    pub log: Log,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            api: Api::default(),
            ui: Ui::default(),
            log: Log::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Api {
    pub base_url: Option<String>,
    pub proxy_origin: Option<String>,
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Ui {
    pub toast_timeout: Option<String>,
    pub upload_reload_delay: Option<String>,
    pub default_filter: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Log {
    pub level: Option<String>,
    pub file: Option<String>,
}

impl Config {
    pub fn default_path() -> Result<PathBuf> {
        if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }

        let config_root = dirs::config_dir().ok_or_else(|| {
            anyhow!("cannot resolve config directory; set {CONFIG_PATH_ENV} to the config file")
        })?;
        Ok(config_root.join(APP_NAME).join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let value: toml::Value = toml::from_str(&raw)
            .with_context(|| format!("parse TOML config {}", path.display()))?;

        let version = value
            .get("version")
            .and_then(toml::Value::as_integer)
            .ok_or_else(|| {
                anyhow!(
                    "config file {} has no version. Add `version = 1` and keep values under [api], [ui], and [log]",
                    path.display()
                )
            })?;

        if version != CONFIG_VERSION {
            bail!(
                "unsupported config version {} in {}; expected version = 1. Regenerate a template with --print-example-config",
                version,
                path.display()
            );
        }

        let config: Config = value
            .try_into()
            .with_context(|| format!("decode config {}", path.display()))?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        for (key, value) in [
            ("api.base_url", self.api.base_url.as_deref()),
            ("api.proxy_origin", self.api.proxy_origin.as_deref()),
        ] {
            if let Some(value) = value
                && !value.trim().is_empty()
            {
                validate_origin(value).with_context(|| format!("{key} in {}", path.display()))?;
            }
        }

        for (key, value) in [
            ("api.timeout", self.api.timeout.as_deref()),
            ("ui.toast_timeout", self.ui.toast_timeout.as_deref()),
        ] {
            if let Some(value) = value {
                let parsed = parse_duration(value)?;
                if parsed.is_zero() {
                    bail!("{key} in {} must be positive, got {value}", path.display());
                }
            }
        }
        if let Some(value) = &self.ui.upload_reload_delay {
            parse_duration(value)?;
        }

        if let Some(filter) = &self.ui.default_filter
            && ReviewFilter::parse(filter).is_none()
        {
            bail!(
                "ui.default_filter in {} must be one of all, reviewed, needs_review; got {filter:?}",
                path.display()
            );
        }

        if let Some(level) = &self.log.level {
            crate::logging::build_filter(None, level)
                .with_context(|| format!("log.level in {}", path.display()))?;
        }

        Ok(())
    }

    /// API base to talk to. Precedence: command line, then
    /// `INVOICEDESK_API_URL`, then `api.base_url`, then the proxy prefix
    /// under `api.proxy_origin`.
    pub fn api_base_url(&self, cli_override: Option<&str>) -> String {
        let env_override = env::var(API_URL_ENV).ok();
        let configured = cli_override
            .map(str::to_owned)
            .or(env_override)
            .or_else(|| self.api.base_url.clone())
            .filter(|value| !value.trim().is_empty());
        invoicedesk_api::resolve_base_url(configured.as_deref(), self.proxy_origin())
    }

    pub fn proxy_origin(&self) -> &str {
        self.api
            .proxy_origin
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(DEFAULT_PROXY_ORIGIN)
    }

    pub fn api_timeout(&self) -> Result<Duration> {
        parse_duration(self.api.timeout.as_deref().unwrap_or(DEFAULT_API_TIMEOUT))
    }

    pub fn toast_timeout(&self) -> Result<Duration> {
        parse_duration(
            self.ui
                .toast_timeout
                .as_deref()
                .unwrap_or(DEFAULT_TOAST_TIMEOUT),
        )
    }

    pub fn upload_reload_delay(&self) -> Result<Duration> {
        parse_duration(
            self.ui
                .upload_reload_delay
                .as_deref()
                .unwrap_or(DEFAULT_UPLOAD_RELOAD_DELAY),
        )
    }

    pub fn default_filter(&self) -> ReviewFilter {
        self.ui
            .default_filter
            .as_deref()
            .and_then(ReviewFilter::parse)
            .unwrap_or_default()
    }

    pub fn log_level(&self) -> &str {
        self.log.level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }

    pub fn log_file(&self) -> Result<PathBuf> {
        if let Some(file) = self.log.file.as_deref().filter(|file| !file.trim().is_empty()) {
            return Ok(PathBuf::from(file));
        }
        let data_root = dirs::data_local_dir().ok_or_else(|| {
            anyhow!("cannot resolve data directory; set [log].file to an absolute path")
        })?;
        Ok(data_root.join(APP_NAME).join(format!("{APP_NAME}.log")))
    }

    pub fn example_config(path: &Path) -> String {
        format!(
            "# invoicedesk config\n# Place this file at: {}\n\nversion = 1\n\n[api]\n# Optional. External API origin; unset talks to <proxy_origin>/api\n# base_url = \"http://127.0.0.1:8000\"\nproxy_origin = \"{}\"\ntimeout = \"{}\"\n\n[ui]\ntoast_timeout = \"{}\"\nupload_reload_delay = \"{}\"\n# all | reviewed | needs_review\ndefault_filter = \"all\"\n\n[log]\nlevel = \"{}\"\n# Optional. Default is the platform data dir (for example ~/.local/share/invoicedesk/invoicedesk.log)\n# file = \"/absolute/path/to/invoicedesk.log\"\n",
            path.display(),
            DEFAULT_PROXY_ORIGIN,
            DEFAULT_API_TIMEOUT,
            DEFAULT_TOAST_TIMEOUT,
            DEFAULT_UPLOAD_RELOAD_DELAY,
            DEFAULT_LOG_LEVEL,
        )
    }
}

fn validate_origin(value: &str) -> Result<()> {
    let trimmed = value.trim();
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        bail!("{trimmed:?} must start with http:// or https://");
    }
    Ok(())
}

pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if let Some(value) = raw.strip_suffix("ms") {
        let millis: u64 = value
            .parse()
            .with_context(|| format!("invalid duration {raw:?}"))?;
        return Ok(Duration::from_millis(millis));
    }
    if let Some(value) = raw.strip_suffix('s') {
        let secs: u64 = value
            .parse()
            .with_context(|| format!("invalid duration {raw:?}"))?;
        return Ok(Duration::from_secs(secs));
    }
    if let Some(value) = raw.strip_suffix('m') {
        let mins: u64 = value
            .parse()
            .with_context(|| format!("invalid duration {raw:?}"))?;
        let secs = mins
            .checked_mul(60)
            .ok_or_else(|| anyhow!("duration {raw:?} is too large"))?;
        return Ok(Duration::from_secs(secs));
    }

    bail!("invalid duration {raw:?}; use one of: <N>ms, <N>s, <N>m (for example 300ms or 10s)")
}
