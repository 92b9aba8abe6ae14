use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context};
use serde::Deserialize;
use shared::domain::{AspectRatio, DEFAULT_BASE_WIDTH};
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "gallery.toml";
const DEFAULT_ENDPOINT_URL: &str = "http://127.0.0.1:9360/generate";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_url: String,
    pub endpoint_url: String,
    pub base_width: u32,
    pub default_aspect: AspectRatio,
    pub request_timeout_secs: Option<u64>,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            endpoint_url: DEFAULT_ENDPOINT_URL.into(),
            base_width: DEFAULT_BASE_WIDTH,
            default_aspect: AspectRatio::default(),
            request_timeout_secs: None,
            log_filter: "info".into(),
        }
    }
}

impl Settings {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    database_url: Option<String>,
    endpoint_url: Option<String>,
    base_width: Option<u32>,
    default_aspect: Option<AspectRatio>,
    request_timeout_secs: Option<u64>,
    log: Option<String>,
}

/// Builds settings from defaults, then the config file, then the environment.
///
/// An explicitly named config file must exist; the default `gallery.toml` is optional.
pub fn load_settings(config_path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let (path, required) = match config_path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };
    match fs::read_to_string(&path) {
        Ok(raw) => {
            let file_cfg: FileSettings = toml::from_str(&raw)
                .with_context(|| format!("invalid config file '{}'", path.display()))?;
            apply_file(&mut settings, file_cfg);
        }
        Err(err) if required => {
            return Err(err)
                .with_context(|| format!("failed to read config file '{}'", path.display()));
        }
        Err(_) => {}
    }

    apply_env(&mut settings, |key| std::env::var(key).ok())?;
    Ok(settings)
}

fn apply_file(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file_cfg.endpoint_url {
        settings.endpoint_url = v;
    }
    if let Some(v) = file_cfg.base_width {
        settings.base_width = v;
    }
    if let Some(v) = file_cfg.default_aspect {
        settings.default_aspect = v;
    }
    if let Some(v) = file_cfg.request_timeout_secs {
        settings.request_timeout_secs = Some(v);
    }
    if let Some(v) = file_cfg.log {
        settings.log_filter = v;
    }
}

/// Environment overrides. `GALLERY_*` wins over the `APP__*` aliases.
fn apply_env(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    let var = |primary: &str, alias: &str| lookup(primary).or_else(|| lookup(alias));

    if let Some(v) = var("GALLERY_DATABASE_URL", "APP__DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = var("GALLERY_ENDPOINT_URL", "APP__ENDPOINT_URL") {
        settings.endpoint_url = v;
    }
    if let Some(v) = var("GALLERY_BASE_WIDTH", "APP__BASE_WIDTH") {
        settings.base_width = v
            .parse()
            .with_context(|| format!("GALLERY_BASE_WIDTH must be a positive integer, got '{v}'"))?;
    }
    if let Some(v) = var("GALLERY_DEFAULT_ASPECT", "APP__DEFAULT_ASPECT") {
        settings.default_aspect = v.parse()?;
    }
    if let Some(v) = var("GALLERY_REQUEST_TIMEOUT_SECS", "APP__REQUEST_TIMEOUT_SECS") {
        settings.request_timeout_secs = Some(v.parse().with_context(|| {
            format!("GALLERY_REQUEST_TIMEOUT_SECS must be a whole number of seconds, got '{v}'")
        })?);
    }
    if let Some(v) = lookup("GALLERY_LOG").or_else(|| lookup("RUST_LOG")) {
        settings.log_filter = v;
    }
    Ok(())
}

pub fn validate(settings: &Settings) -> anyhow::Result<()> {
    if settings.base_width == 0 {
        bail!("base_width must be greater than zero");
    }
    let endpoint = Url::parse(&settings.endpoint_url)
        .with_context(|| format!("invalid endpoint url '{}'", settings.endpoint_url))?;
    if !matches!(endpoint.scheme(), "http" | "https") {
        bail!(
            "endpoint url must use http or https, got '{}'",
            endpoint.scheme()
        );
    }
    Ok(())
}

fn default_database_url() -> String {
    let path = dirs::data_dir()
        .map(|dir| dir.join("prompt-gallery").join("gallery.db"))
        .unwrap_or_else(|| PathBuf::from("./data/gallery.db"));
    format!("sqlite://{}", path.to_string_lossy().replace('\\', "/"))
}

pub fn prepare_database_url(raw_database_url: &str) -> String {
    normalize_database_url(raw_database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}
