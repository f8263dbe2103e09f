use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Base URL every request path resolves against.
  pub origin: String,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Ordered list of paths precached at install time. Owned by deployment
  /// tooling; typically the site shell and its static assets.
  #[serde(default)]
  pub precache: Vec<String>,
  /// Document served for offline navigations with no cached entry.
  #[serde(default = "default_fallback")]
  pub fallback: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Tag of the current cache generation. Bumping it on deploy makes the
  /// next install/activate cycle replace everything.
  #[serde(default = "default_generation")]
  pub name: String,
  /// Database location, overriding the platform data directory.
  pub db_path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      name: default_generation(),
      db_path: None,
    }
  }
}

fn default_generation() -> String {
  "static-v1".to_string()
}

fn default_fallback() -> String {
  "/index.html".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./swrproxy.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/swrproxy/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/swrproxy/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("swrproxy.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("swrproxy").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_str(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }
}
