use crate::fingerprint_config::{CamoufoxConfig, WayfernConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BrowserProfile {
  pub id: uuid::Uuid,
  pub name: String,
  pub browser: String,
  pub version: String,
  #[serde(default = "default_release_type")]
  pub release_type: String, // "stable" or "nightly"
  #[serde(default)]
  pub proxy_id: Option<String>,
  #[serde(default)]
  pub process_id: Option<u32>,
  #[serde(default)]
  pub last_launch: Option<u64>,
  #[serde(default)]
  pub camoufox_config: Option<CamoufoxConfig>,
  #[serde(default)]
  pub wayfern_config: Option<WayfernConfig>,
  #[serde(default)]
  pub group_id: Option<String>, // None means the default group
  #[serde(default)]
  pub tags: Vec<String>,
  #[serde(default)]
  pub note: Option<String>,
  #[serde(default)]
  pub extension_group_id: Option<String>,
}

pub fn default_release_type() -> String {
  "stable".to_string()
}

impl BrowserProfile {
  /// `profiles/{uuid}`, holding `metadata.json` and the browser data dir.
  pub fn get_profile_root(&self, profiles_dir: &Path) -> PathBuf {
    profiles_dir.join(self.id.to_string())
  }

  /// `profiles/{uuid}/profile`, handed to the browser as its user-data dir.
  pub fn get_profile_data_path(&self, profiles_dir: &Path) -> PathBuf {
    self.get_profile_root(profiles_dir).join("profile")
  }

  pub fn is_running(&self) -> bool {
    self.process_id.is_some()
  }
}

/// Everything needed to create a profile. Optional fields fall back to
/// sensible defaults in the manager.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CreateProfileRequest {
  pub name: String,
  pub browser: String,
  pub version: String,
  #[serde(default)]
  pub release_type: Option<String>,
  #[serde(default)]
  pub proxy_id: Option<String>,
  #[serde(default)]
  pub camoufox_config: Option<CamoufoxConfig>,
  #[serde(default)]
  pub wayfern_config: Option<WayfernConfig>,
  #[serde(default)]
  pub group_id: Option<String>,
  #[serde(default)]
  pub tags: Vec<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_legacy_metadata_fills_defaults() {
    let json = r#"{
      "id": "5f0c7c9e-3c59-4e43-9d2b-5b7c3c1f9a10",
      "name": "Work",
      "browser": "firefox",
      "version": "139.0"
    }"#;
    let profile: BrowserProfile = serde_json::from_str(json).unwrap();
    assert_eq!(profile.release_type, "stable");
    assert!(profile.tags.is_empty());
    assert!(profile.proxy_id.is_none());
    assert!(!profile.is_running());
  }

  #[test]
  fn test_profile_paths() {
    let profile = BrowserProfile {
      id: uuid::Uuid::nil(),
      name: "p".to_string(),
      browser: "zen".to_string(),
      version: "1.0".to_string(),
      release_type: default_release_type(),
      proxy_id: None,
      process_id: None,
      last_launch: None,
      camoufox_config: None,
      wayfern_config: None,
      group_id: None,
      tags: vec![],
      note: None,
      extension_group_id: None,
    };
    let root = Path::new("/data/profiles");
    assert_eq!(
      profile.get_profile_data_path(root),
      root.join(uuid::Uuid::nil().to_string()).join("profile")
    );
  }
}
