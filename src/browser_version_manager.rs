use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::api_client::{
  chromium_platform, is_browser_version_nightly, sort_versions, ApiClient, BrowserRelease,
  ReleaseSource,
};
use crate::browser::{platform_info, BrowserType};
use crate::downloaded_browsers_registry::DownloadedBrowsersRegistry;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BrowserVersionInfo {
  pub version: String,
  pub is_prerelease: bool,
  pub date: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BrowserVersionsResult {
  pub versions: Vec<String>,
  pub new_versions_count: Option<usize>,
  pub total_versions_count: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct BrowserReleaseTypes {
  pub stable: Option<String>,
  pub nightly: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseTypesSource {
  Remote,
  Downloaded,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LoadedReleaseTypes {
  pub release_types: BrowserReleaseTypes,
  pub source: ReleaseTypesSource,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
  pub version: String,
  pub release_type: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DownloadInfo {
  pub url: String,
  pub filename: String,
  pub is_archive: bool,
}

/// Newest stable and newest nightly among `releases` (which must be sorted
/// newest first).
pub fn release_types_from_releases(releases: &[BrowserRelease]) -> BrowserReleaseTypes {
  BrowserReleaseTypes {
    stable: releases
      .iter()
      .find(|r| !r.is_prerelease)
      .map(|r| r.version.clone()),
    nightly: releases
      .iter()
      .find(|r| r.is_prerelease)
      .map(|r| r.version.clone()),
  }
}

/// Channel preference: `*-developer` builds prefer nightly, everything else
/// prefers stable. The other channel is used only when the preferred one is absent.
pub fn best_available_version(
  browser: &str,
  release_types: &BrowserReleaseTypes,
) -> Option<ResolvedVersion> {
  let stable = release_types.stable.as_ref().map(|v| (v, "stable"));
  let nightly = release_types.nightly.as_ref().map(|v| (v, "nightly"));

  let (preferred, fallback) = if browser.ends_with("-developer") {
    (nightly, stable)
  } else {
    (stable, nightly)
  };

  preferred.or(fallback).map(|(version, release_type)| ResolvedVersion {
    version: version.clone(),
    release_type: release_type.to_string(),
  })
}

pub struct BrowserVersionManager {
  source: Arc<dyn ReleaseSource>,
}

impl BrowserVersionManager {
  fn new() -> Self {
    Self::with_source(Arc::new(ApiClient::new()))
  }

  pub fn with_source(source: Arc<dyn ReleaseSource>) -> Self {
    Self { source }
  }

  pub fn instance() -> &'static BrowserVersionManager {
    &BROWSER_VERSION_MANAGER
  }

  pub fn is_browser_supported(
    &self,
    browser: &str,
  ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    let browser_type: BrowserType = browser.parse()?;
    let (os, arch) = platform_info();
    let arm_on_win_or_linux = arch == "arm64" && (os == "windows" || os == "linux");

    Ok(match browser_type {
      BrowserType::MullvadBrowser | BrowserType::TorBrowser => !arm_on_win_or_linux,
      BrowserType::Chromium => !(arch == "arm64" && os == "linux"),
      _ => true,
    })
  }

  pub fn get_supported_browsers(&self) -> Vec<String> {
    BrowserType::ALL
      .iter()
      .map(BrowserType::as_str)
      .filter(|browser| self.is_browser_supported(browser).unwrap_or(false))
      .map(str::to_string)
      .collect()
  }

  pub async fn fetch_browser_versions_detailed(
    &self,
    browser: &str,
    no_caching: bool,
  ) -> Result<Vec<BrowserVersionInfo>, Box<dyn std::error::Error + Send + Sync>> {
    let releases = self.source.fetch_releases(browser, no_caching).await?;
    Ok(
      releases
        .into_iter()
        .map(|r| BrowserVersionInfo {
          version: r.version,
          is_prerelease: r.is_prerelease,
          date: r.date,
        })
        .collect(),
    )
  }

  /// Refreshes the release list and reports how many versions were not in
  /// the previously cached list.
  pub async fn fetch_browser_versions_with_count(
    &self,
    browser: &str,
  ) -> Result<BrowserVersionsResult, Box<dyn std::error::Error + Send + Sync>> {
    let previous: HashSet<String> = self
      .source
      .cached_releases(browser)
      .map(|releases| releases.into_iter().map(|r| r.version).collect())
      .unwrap_or_default();

    let releases = self.source.fetch_releases(browser, true).await?;
    let mut versions: Vec<String> = releases.into_iter().map(|r| r.version).collect();
    sort_versions(&mut versions);

    let new_versions_count = if previous.is_empty() {
      None
    } else {
      Some(versions.iter().filter(|v| !previous.contains(*v)).count())
    };

    Ok(BrowserVersionsResult {
      total_versions_count: versions.len(),
      versions,
      new_versions_count,
    })
  }

  pub async fn get_browser_release_types(
    &self,
    browser: &str,
  ) -> Result<BrowserReleaseTypes, Box<dyn std::error::Error + Send + Sync>> {
    let releases = self.source.fetch_releases(browser, false).await?;
    Ok(release_types_from_releases(&releases))
  }

  /// Like [`Self::get_browser_release_types`], but when the release source is
  /// unreachable the locally downloaded versions stand in for it.
  pub async fn load_release_types(
    &self,
    browser: &str,
  ) -> Result<LoadedReleaseTypes, Box<dyn std::error::Error + Send + Sync>> {
    match self.get_browser_release_types(browser).await {
      Ok(release_types) => Ok(LoadedReleaseTypes {
        release_types,
        source: ReleaseTypesSource::Remote,
      }),
      Err(fetch_error) => {
        let downloaded = DownloadedBrowsersRegistry::instance().get_downloaded_versions(browser);
        if downloaded.is_empty() {
          return Err(
            format!("Failed to load versions for {browser} and none are downloaded: {fetch_error}")
              .into(),
          );
        }

        log::warn!(
          "Using {} downloaded {browser} version(s) after fetch failure: {fetch_error}",
          downloaded.len()
        );
        let releases: Vec<BrowserRelease> = downloaded
          .into_iter()
          .map(|version| BrowserRelease {
            is_prerelease: is_browser_version_nightly(browser, &version, None),
            version,
            date: String::new(),
          })
          .collect();

        Ok(LoadedReleaseTypes {
          release_types: release_types_from_releases(&releases),
          source: ReleaseTypesSource::Downloaded,
        })
      }
    }
  }

  pub fn get_download_info(
    &self,
    browser: &str,
    version: &str,
  ) -> Result<DownloadInfo, Box<dyn std::error::Error + Send + Sync>> {
    let browser_type: BrowserType = browser.parse()?;
    if !self.is_browser_supported(browser)? {
      let (os, arch) = platform_info();
      return Err(format!("{browser} is not available for {os}/{arch}").into());
    }
    let (os, arch) = platform_info();

    match browser_type {
      BrowserType::Firefox | BrowserType::FirefoxDeveloper => {
        let product = if browser_type == BrowserType::Firefox {
          "firefox"
        } else {
          "devedition"
        };
        let (platform_path, filename, is_archive) = match (os.as_str(), arch.as_str()) {
          ("windows", "x64") => ("win64", format!("Firefox Setup {version}.exe"), false),
          ("windows", "arm64") => (
            "win64-aarch64",
            format!("Firefox Setup {version}.exe"),
            false,
          ),
          ("linux", "x64") => ("linux-x86_64", format!("firefox-{version}.tar.xz"), true),
          ("linux", "arm64") => ("linux-aarch64", format!("firefox-{version}.tar.xz"), true),
          ("macos", _) => ("mac", format!("Firefox {version}.dmg"), true),
          _ => return Err(format!("Unsupported platform for {browser}: {os}/{arch}").into()),
        };

        Ok(DownloadInfo {
          url: format!(
            "https://download-installer.cdn.mozilla.net/pub/{product}/releases/{version}/{platform_path}/en-US/{filename}"
          ),
          filename,
          is_archive,
        })
      }
      BrowserType::MullvadBrowser | BrowserType::TorBrowser => {
        let (prefix, base) = if browser_type == BrowserType::MullvadBrowser {
          (
            "mullvad-browser",
            format!("https://github.com/mullvad/mullvad-browser/releases/download/{version}"),
          )
        } else {
          (
            "tor-browser",
            format!("https://archive.torproject.org/tor-package-archive/torbrowser/{version}"),
          )
        };
        let (platform_str, ext, is_archive) = match os.as_str() {
          "windows" if browser_type == BrowserType::TorBrowser => {
            ("windows-x86_64-portable", "exe", false)
          }
          "windows" => ("windows-x86_64", "exe", false),
          "linux" => ("linux-x86_64", "tar.xz", true),
          "macos" => ("macos", "dmg", true),
          _ => return Err(format!("Unsupported platform for {browser}: {os}").into()),
        };
        let filename = format!("{prefix}-{platform_str}-{version}.{ext}");

        Ok(DownloadInfo {
          url: format!("{base}/{filename}"),
          filename,
          is_archive,
        })
      }
      BrowserType::Zen => {
        let (asset_name, is_archive) = match (os.as_str(), arch.as_str()) {
          ("windows", "x64") => ("zen.installer.exe", false),
          ("windows", "arm64") => ("zen.installer-arm64.exe", false),
          ("linux", "x64") => ("zen.linux-x86_64.tar.xz", true),
          ("linux", "arm64") => ("zen.linux-aarch64.tar.xz", true),
          ("macos", _) => ("zen.macos-universal.dmg", true),
          _ => return Err(format!("Unsupported platform for Zen: {os}/{arch}").into()),
        };

        Ok(DownloadInfo {
          url: format!(
            "https://github.com/zen-browser/desktop/releases/download/{version}/{asset_name}"
          ),
          filename: format!("zen-{version}-{asset_name}"),
          is_archive,
        })
      }
      BrowserType::Brave => {
        let (filename, is_archive) = match (os.as_str(), arch.as_str()) {
          ("windows", _) => (format!("brave-{version}.exe"), false),
          ("linux", "x64") => (format!("brave-browser-{version}-linux-amd64.zip"), true),
          ("linux", "arm64") => (format!("brave-browser-{version}-linux-arm64.zip"), true),
          ("macos", _) => ("Brave-Browser-universal.dmg".to_string(), true),
          _ => return Err(format!("Unsupported platform for Brave: {os}/{arch}").into()),
        };
        let tag = if version.starts_with('v') {
          version.to_string()
        } else {
          format!("v{version}")
        };

        let url = ApiClient::instance()
          .find_cached_asset_url("brave", &tag, |name| name == filename.to_lowercase())
          .unwrap_or_else(|| {
            format!("https://github.com/brave/brave-browser/releases/download/{tag}/{filename}")
          });

        Ok(DownloadInfo {
          url,
          filename,
          is_archive,
        })
      }
      BrowserType::Chromium => {
        let platform_str = chromium_platform()?;
        let archive_name = match os.as_str() {
          "windows" => "chrome-win.zip",
          "linux" => "chrome-linux.zip",
          _ => "chrome-mac.zip",
        };

        Ok(DownloadInfo {
          url: format!(
            "https://commondatastorage.googleapis.com/chromium-browser-snapshots/{platform_str}/{version}/{archive_name}"
          ),
          filename: format!("chromium-{version}-{archive_name}"),
          is_archive: true,
        })
      }
      BrowserType::Camoufox => {
        let (os_name, arch_name) = match (os.as_str(), arch.as_str()) {
          ("windows", "x64") => ("win", "x86_64"),
          ("windows", "arm64") => ("win", "arm64"),
          ("linux", "x64") => ("lin", "x86_64"),
          ("linux", "arm64") => ("lin", "arm64"),
          ("macos", "x64") => ("mac", "x86_64"),
          ("macos", "arm64") => ("mac", "arm64"),
          _ => return Err(format!("Unsupported platform for Camoufox: {os}/{arch}").into()),
        };
        // Asset names embed a build suffix that only the release listing knows
        let suffix = format!(".{os_name}.{arch_name}.zip");
        let tag = format!("v{}", version.trim_start_matches('v'));
        let url = ApiClient::instance()
          .find_cached_asset_url("camoufox", &tag, |name| {
            name.starts_with("camoufox-") && name.ends_with(&suffix)
          })
          .ok_or_else(|| {
            format!("No Camoufox {version} asset for {os_name}.{arch_name}; refresh versions first")
          })?;

        Ok(DownloadInfo {
          url,
          filename: format!("camoufox-{version}-{os_name}.{arch_name}.zip"),
          is_archive: true,
        })
      }
      BrowserType::Wayfern => {
        let manifest = ApiClient::instance()
          .cached_wayfern_manifest()
          .ok_or("Wayfern manifest not loaded; refresh versions first")?;
        if manifest.version != version {
          return Err(
            format!(
              "Wayfern {version} is not the published build ({})",
              manifest.version
            )
            .into(),
          );
        }
        let url = manifest
          .downloads
          .get(&format!("{os}-{arch}"))
          .cloned()
          .ok_or_else(|| format!("No Wayfern build for {os}-{arch}"))?;
        let filename = url
          .rsplit('/')
          .next()
          .filter(|name| !name.is_empty())
          .unwrap_or("wayfern-download")
          .to_string();
        let is_archive = [".zip", ".tar.gz", ".tar.xz", ".tar.bz2", ".dmg"]
          .iter()
          .any(|ext| filename.ends_with(ext));

        Ok(DownloadInfo {
          url,
          filename,
          is_archive,
        })
      }
    }
  }
}

pub async fn get_supported_browsers() -> Result<Vec<String>, String> {
  Ok(BrowserVersionManager::instance().get_supported_browsers())
}

pub async fn is_browser_supported_on_platform(browser_str: String) -> Result<bool, String> {
  BrowserVersionManager::instance()
    .is_browser_supported(&browser_str)
    .map_err(|e| format!("Failed to check browser support: {e}"))
}

pub async fn get_browser_release_types(browser_str: String) -> Result<BrowserReleaseTypes, String> {
  BrowserVersionManager::instance()
    .get_browser_release_types(&browser_str)
    .await
    .map_err(|e| format!("Failed to get release types: {e}"))
}

pub async fn load_release_types(browser_str: String) -> Result<LoadedReleaseTypes, String> {
  BrowserVersionManager::instance()
    .load_release_types(&browser_str)
    .await
    .map_err(|e| e.to_string())
}

pub async fn get_best_available_version(
  browser_str: String,
) -> Result<Option<ResolvedVersion>, String> {
  let loaded = load_release_types(browser_str.clone()).await?;
  Ok(best_available_version(&browser_str, &loaded.release_types))
}

pub async fn fetch_browser_versions_with_count(
  browser_str: String,
) -> Result<BrowserVersionsResult, String> {
  BrowserVersionManager::instance()
    .fetch_browser_versions_with_count(&browser_str)
    .await
    .map_err(|e| format!("Failed to fetch browser versions: {e}"))
}

pub async fn fetch_browser_versions_detailed(
  browser_str: String,
) -> Result<Vec<BrowserVersionInfo>, String> {
  BrowserVersionManager::instance()
    .fetch_browser_versions_detailed(&browser_str, false)
    .await
    .map_err(|e| format!("Failed to fetch browser versions: {e}"))
}

lazy_static::lazy_static! {
  static ref BROWSER_VERSION_MANAGER: BrowserVersionManager = BrowserVersionManager::new();
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::app_dirs;
  use async_trait::async_trait;
  use tempfile::TempDir;

  struct StaticSource {
    releases: Option<Vec<BrowserRelease>>,
  }

  #[async_trait]
  impl ReleaseSource for StaticSource {
    async fn fetch_releases(
      &self,
      _browser: &str,
      _no_caching: bool,
    ) -> Result<Vec<BrowserRelease>, Box<dyn std::error::Error + Send + Sync>> {
      self.releases.clone().ok_or_else(|| "network unreachable".into())
    }

    fn cached_releases(&self, _browser: &str) -> Option<Vec<BrowserRelease>> {
      None
    }
  }

  fn release(version: &str, is_prerelease: bool) -> BrowserRelease {
    BrowserRelease {
      version: version.to_string(),
      date: String::new(),
      is_prerelease,
    }
  }

  #[test]
  fn test_developer_browsers_prefer_nightly() {
    let both = BrowserReleaseTypes {
      stable: Some("139.0".to_string()),
      nightly: Some("140.0b3".to_string()),
    };
    assert_eq!(
      best_available_version("firefox-developer", &both),
      Some(ResolvedVersion {
        version: "140.0b3".to_string(),
        release_type: "nightly".to_string()
      })
    );
    assert_eq!(
      best_available_version("firefox", &both).unwrap().version,
      "139.0"
    );
    assert_eq!(
      best_available_version("zen", &both).unwrap().release_type,
      "stable"
    );
  }

  #[test]
  fn test_missing_preferred_channel_uses_the_other() {
    let only_nightly = BrowserReleaseTypes {
      stable: None,
      nightly: Some("twilight".to_string()),
    };
    assert_eq!(
      best_available_version("zen", &only_nightly).unwrap().release_type,
      "nightly"
    );

    let only_stable = BrowserReleaseTypes {
      stable: Some("139.0".to_string()),
      nightly: None,
    };
    assert_eq!(
      best_available_version("firefox-developer", &only_stable)
        .unwrap()
        .release_type,
      "stable"
    );
    assert!(best_available_version("firefox", &BrowserReleaseTypes::default()).is_none());
  }

  #[test]
  fn test_supported_browsers_are_known_types() {
    let manager = BrowserVersionManager::instance();
    let supported = manager.get_supported_browsers();
    assert!(supported.contains(&"firefox".to_string()));
    assert!(supported.contains(&"camoufox".to_string()));
    assert!(manager.is_browser_supported("netscape").is_err());
  }

  #[tokio::test]
  async fn test_release_types_take_newest_of_each_channel() {
    let manager = BrowserVersionManager::with_source(Arc::new(StaticSource {
      releases: Some(vec![
        release("140.0b3", true),
        release("140.0b2", true),
        release("139.0.4", false),
        release("139.0", false),
      ]),
    }));

    let loaded = manager.load_release_types("firefox").await.unwrap();
    assert_eq!(loaded.source, ReleaseTypesSource::Remote);
    assert_eq!(
      loaded.release_types,
      BrowserReleaseTypes {
        stable: Some("139.0.4".to_string()),
        nightly: Some("140.0b3".to_string()),
      }
    );
  }

  #[tokio::test]
  async fn test_fetch_failure_falls_back_to_downloaded_versions() {
    let tmp = TempDir::new().unwrap();
    let _guard = app_dirs::set_test_data_dir(tmp.path().to_path_buf());
    let registry = DownloadedBrowsersRegistry::instance();
    for version in ["138.0", "139.0", "140.0b1"] {
      let dir = DownloadedBrowsersRegistry::install_dir("firefox", version);
      std::fs::create_dir_all(&dir).unwrap();
      registry
        .mark_download_completed("firefox", version, dir)
        .unwrap();
    }

    let manager = BrowserVersionManager::with_source(Arc::new(StaticSource { releases: None }));
    let loaded = manager.load_release_types("firefox").await.unwrap();
    assert_eq!(loaded.source, ReleaseTypesSource::Downloaded);
    assert_eq!(loaded.release_types.stable.as_deref(), Some("139.0"));
    assert_eq!(loaded.release_types.nightly.as_deref(), Some("140.0b1"));
  }

  #[tokio::test]
  async fn test_fetch_failure_without_downloads_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let _guard = app_dirs::set_test_data_dir(tmp.path().to_path_buf());

    let manager = BrowserVersionManager::with_source(Arc::new(StaticSource { releases: None }));
    let err = manager.load_release_types("zen").await.unwrap_err();
    assert!(
      err.to_string().contains("network unreachable"),
      "error should carry the fetch failure: {err}"
    );
  }

  #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
  #[test]
  fn test_download_info_for_linux_builds() {
    let manager = BrowserVersionManager::instance();

    let firefox = manager.get_download_info("firefox", "139.0").unwrap();
    assert_eq!(
      firefox.url,
      "https://download-installer.cdn.mozilla.net/pub/firefox/releases/139.0/linux-x86_64/en-US/firefox-139.0.tar.xz"
    );
    assert!(firefox.is_archive);

    let dev = manager
      .get_download_info("firefox-developer", "140.0b3")
      .unwrap();
    assert!(dev.url.contains("/pub/devedition/releases/140.0b3/"));

    let tor = manager.get_download_info("tor-browser", "14.0.4").unwrap();
    assert_eq!(
      tor.url,
      "https://archive.torproject.org/tor-package-archive/torbrowser/14.0.4/tor-browser-linux-x86_64-14.0.4.tar.xz"
    );

    let chromium = manager.get_download_info("chromium", "1465660").unwrap();
    assert!(chromium.url.ends_with("/Linux_x64/1465660/chrome-linux.zip"));
  }
}
