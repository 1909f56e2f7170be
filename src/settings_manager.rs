use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};
use std::fs::{self, create_dir_all};
use std::path::PathBuf;

use crate::app_dirs;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppSettings {
  #[serde(default = "default_api_port")]
  pub api_port: u16,
  #[serde(default)]
  pub api_token: Option<String>,
  #[serde(default = "default_true")]
  pub auto_update_versions: bool,
  #[serde(default = "default_update_interval_hours")]
  pub version_update_interval_hours: u64,
  /// JSON manifest describing the latest Wayfern build.
  #[serde(default)]
  pub wayfern_manifest_url: Option<String>,
  /// Overrides the GeoLite2-City mirror.
  #[serde(default)]
  pub geoip_database_url: Option<String>,
}

fn default_api_port() -> u16 {
  10108
}

fn default_true() -> bool {
  true
}

fn default_update_interval_hours() -> u64 {
  3
}

impl Default for AppSettings {
  fn default() -> Self {
    Self {
      api_port: default_api_port(),
      api_token: None,
      auto_update_versions: true,
      version_update_interval_hours: default_update_interval_hours(),
      wayfern_manifest_url: None,
      geoip_database_url: None,
    }
  }
}

pub struct SettingsManager;

impl SettingsManager {
  fn new() -> Self {
    Self
  }

  pub fn instance() -> &'static SettingsManager {
    &SETTINGS_MANAGER
  }

  pub fn get_settings_file(&self) -> PathBuf {
    app_dirs::settings_dir().join("app_settings.json")
  }

  /// Missing file means defaults. A corrupt file is replaced by defaults
  /// rather than failing startup.
  pub fn load_settings(&self) -> Result<AppSettings, Box<dyn std::error::Error + Send + Sync>> {
    let settings_file = self.get_settings_file();
    if !settings_file.exists() {
      return Ok(AppSettings::default());
    }

    let content = fs::read_to_string(&settings_file)?;
    match serde_json::from_str::<AppSettings>(&content) {
      Ok(settings) => Ok(settings),
      Err(e) => {
        log::warn!("Failed to parse settings file, using defaults: {e}");
        let defaults = AppSettings::default();
        if let Err(save_error) = self.save_settings(&defaults) {
          log::warn!("Failed to overwrite corrupt settings file: {save_error}");
        }
        Ok(defaults)
      }
    }
  }

  pub fn save_settings(
    &self,
    settings: &AppSettings,
  ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    create_dir_all(app_dirs::settings_dir())?;
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(self.get_settings_file(), json)?;
    Ok(())
  }

  /// Creates and persists a fresh bearer token for the HTTP API.
  pub fn generate_api_token(&self) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let token = Alphanumeric.sample_string(&mut rand::rng(), 43);
    let mut settings = self.load_settings()?;
    settings.api_token = Some(token.clone());
    self.save_settings(&settings)?;
    Ok(token)
  }
}

pub async fn get_app_settings() -> Result<AppSettings, String> {
  SettingsManager::instance()
    .load_settings()
    .map_err(|e| format!("Failed to load settings: {e}"))
}

pub async fn save_app_settings(settings: AppSettings) -> Result<AppSettings, String> {
  if settings.api_port == 0 {
    return Err("Failed to save settings: api_port must be non-zero".to_string());
  }
  SettingsManager::instance()
    .save_settings(&settings)
    .map_err(|e| format!("Failed to save settings: {e}"))?;
  Ok(settings)
}

pub async fn generate_api_token() -> Result<String, String> {
  SettingsManager::instance()
    .generate_api_token()
    .map_err(|e| format!("Failed to generate API token: {e}"))
}

lazy_static::lazy_static! {
  static ref SETTINGS_MANAGER: SettingsManager = SettingsManager::new();
}
