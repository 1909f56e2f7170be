use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::api_client::sort_versions;
use crate::app_dirs;
use crate::browser::{create_browser, BrowserType};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DownloadedBrowserInfo {
  pub browser: String,
  pub version: String,
  /// Install directory, `binaries/{browser}/{version}`.
  pub file_path: PathBuf,
  #[serde(default)]
  pub downloaded_at: u64,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct RegistryData {
  browsers: HashMap<String, HashMap<String, DownloadedBrowserInfo>>, // browser -> version -> info
}

/// Persistent record of completed downloads in `data/downloaded_browsers.json`.
///
/// The file is the source of truth; every call reads it, so the registry
/// always agrees with whatever data dir is active.
pub struct DownloadedBrowsersRegistry {
  write_lock: Mutex<()>,
}

impl DownloadedBrowsersRegistry {
  fn new() -> Self {
    Self {
      write_lock: Mutex::new(()),
    }
  }

  pub fn instance() -> &'static DownloadedBrowsersRegistry {
    &DOWNLOADED_BROWSERS_REGISTRY
  }

  fn registry_path() -> PathBuf {
    app_dirs::data_subdir().join("downloaded_browsers.json")
  }

  fn load_data(&self) -> RegistryData {
    let path = Self::registry_path();
    let Ok(content) = fs::read_to_string(&path) else {
      return RegistryData::default();
    };
    serde_json::from_str(&content).unwrap_or_else(|e| {
      log::warn!("Ignoring unreadable registry {}: {e}", path.display());
      RegistryData::default()
    })
  }

  fn save_data(&self, data: &RegistryData) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let path = Self::registry_path();
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
    }
    fs::write(&path, serde_json::to_string_pretty(data)?)?;
    Ok(())
  }

  fn update<F, T>(&self, f: F) -> Result<T, Box<dyn std::error::Error + Send + Sync>>
  where
    F: FnOnce(&mut RegistryData) -> T,
  {
    let _guard = self
      .write_lock
      .lock()
      .map_err(|_| "Downloaded browsers registry lock poisoned")?;
    let mut data = self.load_data();
    let result = f(&mut data);
    self.save_data(&data)?;
    Ok(result)
  }

  pub fn install_dir(browser: &str, version: &str) -> PathBuf {
    app_dirs::binaries_dir().join(browser).join(version)
  }

  pub fn add_browser(
    &self,
    info: DownloadedBrowserInfo,
  ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    self.update(|data| {
      data
        .browsers
        .entry(info.browser.clone())
        .or_default()
        .insert(info.version.clone(), info);
    })
  }

  pub fn remove_browser(
    &self,
    browser: &str,
    version: &str,
  ) -> Result<Option<DownloadedBrowserInfo>, Box<dyn std::error::Error + Send + Sync>> {
    self.update(|data| {
      let removed = data.browsers.get_mut(browser)?.remove(version);
      if data.browsers.get(browser).is_some_and(|v| v.is_empty()) {
        data.browsers.remove(browser);
      }
      removed
    })
  }

  /// Registry entry only, without touching the filesystem.
  pub fn is_browser_registered(&self, browser: &str, version: &str) -> bool {
    self
      .load_data()
      .browsers
      .get(browser)
      .is_some_and(|versions| versions.contains_key(version))
  }

  /// Registered and the executable is still present on disk.
  pub fn is_browser_downloaded(&self, browser: &str, version: &str) -> bool {
    if !self.is_browser_registered(browser, version) {
      return false;
    }
    match BrowserType::from_str(browser) {
      Ok(browser_type) => {
        create_browser(browser_type).is_version_downloaded(version, &app_dirs::binaries_dir())
      }
      Err(_) => false,
    }
  }

  /// Versions whose files still exist, newest first.
  pub fn get_downloaded_versions(&self, browser: &str) -> Vec<String> {
    let data = self.load_data();
    let mut versions: Vec<String> = data
      .browsers
      .get(browser)
      .map(|versions| {
        versions
          .values()
          .filter(|info| info.file_path.exists())
          .map(|info| info.version.clone())
          .collect()
      })
      .unwrap_or_default();
    sort_versions(&mut versions);
    versions
  }

  pub fn mark_download_completed(
    &self,
    browser: &str,
    version: &str,
    install_dir: PathBuf,
  ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let downloaded_at = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_secs();
    self.add_browser(DownloadedBrowserInfo {
      browser: browser.to_string(),
      version: version.to_string(),
      file_path: install_dir,
      downloaded_at,
    })
  }

  /// Removes the install directory and any registry entry for it.
  pub fn cleanup_failed_download(
    &self,
    browser: &str,
    version: &str,
  ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let install_dir = Self::install_dir(browser, version);
    if install_dir.exists() {
      fs::remove_dir_all(&install_dir)?;
      log::info!("Removed incomplete install at {}", install_dir.display());
    }
    self.remove_browser(browser, version)?;
    Ok(())
  }

  /// Drops entries whose install directories have disappeared. Returns the
  /// `(browser, version)` pairs that were removed.
  pub fn sync_with_binaries_directory(
    &self,
  ) -> Result<Vec<(String, String)>, Box<dyn std::error::Error + Send + Sync>> {
    self.update(|data| {
      let mut removed = Vec::new();
      for (browser, versions) in data.browsers.iter_mut() {
        versions.retain(|version, info| {
          let keep = info.file_path.exists();
          if !keep {
            removed.push((browser.clone(), version.clone()));
          }
          keep
        });
      }
      data.browsers.retain(|_, versions| !versions.is_empty());
      removed
    })
  }
}

pub async fn get_downloaded_browser_versions(browser: String) -> Result<Vec<String>, String> {
  Ok(DownloadedBrowsersRegistry::instance().get_downloaded_versions(&browser))
}

pub async fn is_browser_downloaded(browser: String, version: String) -> Result<bool, String> {
  Ok(DownloadedBrowsersRegistry::instance().is_browser_downloaded(&browser, &version))
}

lazy_static::lazy_static! {
  static ref DOWNLOADED_BROWSERS_REGISTRY: DownloadedBrowsersRegistry = DownloadedBrowsersRegistry::new();
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn register(registry: &DownloadedBrowsersRegistry, browser: &str, version: &str) -> PathBuf {
    let dir = DownloadedBrowsersRegistry::install_dir(browser, version);
    fs::create_dir_all(&dir).unwrap();
    registry
      .mark_download_completed(browser, version, dir.clone())
      .unwrap();
    dir
  }

  #[test]
  fn test_versions_are_sorted_and_filtered_by_disk() {
    let tmp = TempDir::new().unwrap();
    let _guard = app_dirs::set_test_data_dir(tmp.path().to_path_buf());
    let registry = DownloadedBrowsersRegistry::instance();

    register(registry, "firefox", "138.0");
    register(registry, "firefox", "140.0b2");
    let gone = register(registry, "firefox", "139.0");
    fs::remove_dir_all(gone).unwrap();

    assert_eq!(
      registry.get_downloaded_versions("firefox"),
      vec!["140.0b2".to_string(), "138.0".to_string()]
    );
    assert!(registry.get_downloaded_versions("zen").is_empty());
  }

  #[test]
  fn test_registered_is_not_downloaded_without_executable() {
    let tmp = TempDir::new().unwrap();
    let _guard = app_dirs::set_test_data_dir(tmp.path().to_path_buf());
    let registry = DownloadedBrowsersRegistry::instance();

    register(registry, "camoufox", "135.0.1");
    assert!(registry.is_browser_registered("camoufox", "135.0.1"));
    assert!(!registry.is_browser_downloaded("camoufox", "135.0.1"));
    assert!(!registry.is_browser_registered("camoufox", "134.0"));
  }

  #[test]
  fn test_remove_and_cleanup() {
    let tmp = TempDir::new().unwrap();
    let _guard = app_dirs::set_test_data_dir(tmp.path().to_path_buf());
    let registry = DownloadedBrowsersRegistry::instance();

    let dir = register(registry, "zen", "1.12b");
    let removed = registry.remove_browser("zen", "1.12b").unwrap();
    assert_eq!(removed.map(|i| i.version), Some("1.12b".to_string()));
    assert!(registry.remove_browser("zen", "1.12b").unwrap().is_none());

    register(registry, "zen", "1.12b");
    registry.cleanup_failed_download("zen", "1.12b").unwrap();
    assert!(!dir.exists());
    assert!(!registry.is_browser_registered("zen", "1.12b"));
  }

  #[test]
  fn test_sync_drops_vanished_installs() {
    let tmp = TempDir::new().unwrap();
    let _guard = app_dirs::set_test_data_dir(tmp.path().to_path_buf());
    let registry = DownloadedBrowsersRegistry::instance();

    register(registry, "brave", "1.81.9");
    let gone = register(registry, "brave", "1.80.0");
    fs::remove_dir_all(gone).unwrap();

    let removed = registry.sync_with_binaries_directory().unwrap();
    assert_eq!(removed, vec![("brave".to_string(), "1.80.0".to_string())]);
    assert!(registry.is_browser_registered("brave", "1.81.9"));
  }
}
