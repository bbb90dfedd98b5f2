//! Load config from file and environment.

use std::path::PathBuf;

use serde::Deserialize;
use tracing::warn;

/// Host configuration. File: ~/.config/peerdrop/config.toml or /etc/peerdrop/config.toml.
/// Env overrides: PEERDROP_LISTEN_PORT, PEERDROP_DOWNLOAD_DIR, PEERDROP_CHUNK_SIZE.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// TCP port for `listen` (default 47800).
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Where received files are written.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Protocol tunables, `[session]` table.
    #[serde(default)]
    pub session: peerdrop_core::Config,
}

fn default_listen_port() -> u16 {
    47800
}

fn default_download_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join("Downloads/peerdrop"),
        None => PathBuf::from("."),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            download_dir: default_download_dir(),
            session: peerdrop_core::Config::default(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |key| std::env::var(key).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("PEERDROP_LISTEN_PORT") {
        match s.parse::<u16>() {
            Ok(p) => c.listen_port = p,
            Err(e) => warn!(value = %s, error = %e, "ignoring PEERDROP_LISTEN_PORT"),
        }
    }
    if let Some(s) = var("PEERDROP_DOWNLOAD_DIR") {
        c.download_dir = PathBuf::from(s);
    }
    if let Some(s) = var("PEERDROP_CHUNK_SIZE") {
        match s.parse::<usize>() {
            Ok(n) => c.session.chunk_size = n,
            Err(e) => warn!(value = %s, error = %e, "ignoring PEERDROP_CHUNK_SIZE"),
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/peerdrop/config.toml"));
    }
    out.push(PathBuf::from("/etc/peerdrop/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    let text = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read config file");
            return None;
        }
    };
    match toml::from_str::<Config>(&text) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "invalid config file; using defaults");
            None
        }
    }
}
