use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Generation tag used when the config file does not name one.
pub const DEFAULT_GENERATION: &str = "riverdale-payroll-v1";

const DEFAULT_ORIGIN: &str = "http://localhost:8080";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Base URL of the payroll site. API paths and manifest entries resolve against it.
  #[serde(default = "default_origin")]
  pub origin: String,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Version tag of the current cache generation
  #[serde(default = "default_generation")]
  pub generation: String,
  /// Resource paths stored at install time, in order
  #[serde(default = "default_manifest")]
  pub manifest: Vec<String>,
  /// Location of the cache database (defaults to the XDG data directory)
  pub db_path: Option<PathBuf>,
}

fn default_origin() -> String {
  DEFAULT_ORIGIN.to_string()
}

fn default_generation() -> String {
  DEFAULT_GENERATION.to_string()
}

fn default_manifest() -> Vec<String> {
  [
    "/",
    "/index.html",
    "/work.html",
    "/styles.css",
    "/work.css",
    "/script.js",
    "/work.js",
    "/eastlogo.jpg",
    "/zra.png",
  ]
  .iter()
  .map(|p| p.to_string())
  .collect()
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      generation: default_generation(),
      manifest: default_manifest(),
      db_path: None,
    }
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: default_origin(),
      cache: CacheConfig::default(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./riverdale.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/riverdale/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found.
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
      None => {
        tracing::debug!("no config file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("riverdale.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("riverdale").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
  }

  /// Parsed origin URL.
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin URL '{}': {}", self.origin, e))
  }

  /// Path of the cache database.
  pub fn cache_db_path(&self) -> Result<PathBuf> {
    if let Some(p) = &self.cache.db_path {
      return Ok(p.clone());
    }
    Ok(data_dir()?.join("cache.db"))
  }

  /// Get the session cookie from the environment.
  ///
  /// Checks RIVERDALE_SESSION. Requests go out without a cookie when unset.
  pub fn get_session_cookie() -> Option<String> {
    std::env::var("RIVERDALE_SESSION")
      .ok()
      .filter(|s| !s.is_empty())
  }
}

/// Per-user data directory for the cache database and log file.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("riverdale"))
}
