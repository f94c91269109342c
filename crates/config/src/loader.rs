use std::path::{Path, PathBuf};

use {anyhow::Context, tracing::debug};

use crate::schema::SkylarkConfig;

const FILE_NAME: &str = "skylark.toml";

/// `<config dir>/skylark.toml` for the current platform.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("org", "skylark", "skylark")
        .map(|dirs| dirs.config_dir().join(FILE_NAME))
}

/// Load from `path`, or the default location when `None`, then apply
/// environment overrides.
///
/// An explicit path must exist. A missing default file means defaults.
pub fn load(path: Option<&Path>) -> anyhow::Result<SkylarkConfig> {
    let mut config = match path {
        Some(path) => load_from(path)?,
        None => match default_config_path() {
            Some(path) if path.exists() => load_from(&path)?,
            _ => {
                debug!("no config file found, using defaults");
                SkylarkConfig::default()
            },
        },
    };
    apply_env(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

pub fn load_from(path: &Path) -> anyhow::Result<SkylarkConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = toml::from_str(&content)
        .with_context(|| format!("invalid config file {}", path.display()))?;
    debug!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Override file values with `SKYLARK_*` variables read through `lookup`.
pub fn apply_env(config: &mut SkylarkConfig, lookup: impl Fn(&str) -> Option<String>) {
    let overrides: [(&str, &mut String); 4] = [
        ("SKYLARK_ISSUER", &mut config.auth.issuer),
        ("SKYLARK_CLIENT_ID", &mut config.auth.client_id),
        ("SKYLARK_CHAT_BASE_URL", &mut config.chat.base_url),
        ("SKYLARK_MODEL", &mut config.chat.model),
    ];
    for (key, field) in overrides {
        if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
            debug!(key, "config value overridden from environment");
            *field = value;
        }
    }
}
