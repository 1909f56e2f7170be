use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::app_dirs;
use crate::browser::{platform_info, GithubAsset, GithubRelease};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36";
const CACHE_TTL_SECS: u64 = 10 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionComponent {
  pub major: u32,
  pub minor: u32,
  pub patch: u32,
  pub pre_release: Option<PreRelease>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreRelease {
  pub kind: PreReleaseKind,
  pub number: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum PreReleaseKind {
  Alpha,
  Beta,
  RC,
  Dev,
  Pre,
}

impl VersionComponent {
  pub fn parse(version: &str) -> Self {
    let version = version.trim();
    let version = version
      .strip_prefix('v')
      .or_else(|| version.strip_prefix('V'))
      .unwrap_or(version);

    // Zen's rolling "twilight" build has no numeric version of its own
    if version.eq_ignore_ascii_case("twilight") {
      return VersionComponent {
        major: 999,
        minor: 0,
        patch: 0,
        pre_release: Some(PreRelease {
          kind: PreReleaseKind::Alpha,
          number: Some(999),
        }),
      };
    }

    let (numeric_part, pre_release_part) = Self::split_version(version);

    let parts: Vec<u32> = numeric_part
      .split('.')
      .filter_map(|part| part.parse().ok())
      .collect();

    VersionComponent {
      major: parts.first().copied().unwrap_or(0),
      minor: parts.get(1).copied().unwrap_or(0),
      patch: parts.get(2).copied().unwrap_or(0),
      pre_release: pre_release_part
        .as_deref()
        .and_then(Self::parse_pre_release),
    }
  }

  pub fn is_twilight(&self) -> bool {
    self
      .pre_release
      .as_ref()
      .is_some_and(|pr| pr.kind == PreReleaseKind::Alpha && pr.number == Some(999))
  }

  fn split_version(version: &str) -> (String, Option<String>) {
    let version = version.to_lowercase();

    for (i, ch) in version.char_indices() {
      if ch.is_alphabetic() && i > 0 {
        let remaining = &version[i..];
        if ["a", "b", "rc", "dev", "pre"]
          .iter()
          .any(|marker| remaining.starts_with(marker))
        {
          return (version[..i].to_string(), Some(remaining.to_string()));
        }
      }
    }

    (version, None)
  }

  fn parse_pre_release(pre_release: &str) -> Option<PreRelease> {
    let pre_release = pre_release.trim().to_lowercase();
    if pre_release.is_empty() {
      return None;
    }

    // Longer markers first so "alpha" is not read as "a" + "lpha"
    const MARKERS: [(&str, PreReleaseKind); 7] = [
      ("alpha", PreReleaseKind::Alpha),
      ("beta", PreReleaseKind::Beta),
      ("rc", PreReleaseKind::RC),
      ("dev", PreReleaseKind::Dev),
      ("pre", PreReleaseKind::Pre),
      ("a", PreReleaseKind::Alpha),
      ("b", PreReleaseKind::Beta),
    ];

    MARKERS.iter().find_map(|(marker, kind)| {
      pre_release.strip_prefix(marker).map(|rest| PreRelease {
        kind: kind.clone(),
        number: Self::extract_number(rest),
      })
    })
  }

  fn extract_number(s: &str) -> Option<u32> {
    let numeric_part: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
    numeric_part.parse().ok()
  }
}

impl PartialOrd for VersionComponent {
  fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for VersionComponent {
  fn cmp(&self, other: &Self) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    let numbers = (self.major, self.minor, self.patch);
    let other_numbers = (other.major, other.minor, other.patch);

    match (self.is_twilight(), other.is_twilight()) {
      (true, false) => return Ordering::Greater,
      (false, true) => return Ordering::Less,
      (true, true) => return numbers.cmp(&other_numbers),
      (false, false) => {}
    }

    match numbers.cmp(&other_numbers) {
      Ordering::Equal => match (&self.pre_release, &other.pre_release) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => a.kind.cmp(&b.kind).then_with(|| match (&a.number, &b.number) {
          (None, None) => Ordering::Equal,
          (None, Some(_)) => Ordering::Less,
          (Some(_), None) => Ordering::Greater,
          (Some(x), Some(y)) => x.cmp(y),
        }),
      },
      other => other,
    }
  }
}

/// Newest first.
pub fn sort_versions(versions: &mut [String]) {
  versions.sort_by(|a, b| VersionComponent::parse(b).cmp(&VersionComponent::parse(a)));
}

pub fn compare_versions(version1: &str, version2: &str) -> std::cmp::Ordering {
  VersionComponent::parse(version1).cmp(&VersionComponent::parse(version2))
}

pub fn is_nightly_version(version: &str) -> bool {
  VersionComponent::parse(version).pre_release.is_some()
}

/// Single source of truth for whether a given browser build belongs to the
/// nightly channel.
pub fn is_browser_version_nightly(
  browser: &str,
  version: &str,
  release_name: Option<&str>,
) -> bool {
  match browser {
    "zen" => version.eq_ignore_ascii_case("twilight"),
    // Brave names its stable builds "Release v1.2.3"; everything else is beta/nightly
    "brave" => match release_name {
      Some(name) => !name.trim_start().to_ascii_lowercase().starts_with("release"),
      None => is_nightly_version(version),
    },
    "firefox-developer" => true,
    "chromium" | "camoufox" | "wayfern" => false,
    _ => is_nightly_version(version),
  }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BrowserRelease {
  pub version: String,
  pub date: String,
  pub is_prerelease: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MozillaRelease {
  pub category: String,
  #[serde(default)]
  pub date: String,
  pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MozillaApiResponse {
  pub releases: HashMap<String, MozillaRelease>,
}

/// Release manifest published for Wayfern builds.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WayfernManifest {
  pub version: String,
  #[serde(default)]
  pub date: String,
  /// Keyed by `"{os}-{arch}"`, e.g. `"linux-x64"`.
  #[serde(default)]
  pub downloads: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedVersionData {
  releases: Vec<BrowserRelease>,
  timestamp: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedGithubData {
  releases: Vec<GithubRelease>,
  timestamp: u64,
}

/// Where release lists come from. The version manager depends on this rather
/// than on [`ApiClient`] directly so tests can substitute an offline source.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
  async fn fetch_releases(
    &self,
    browser: &str,
    no_caching: bool,
  ) -> Result<Vec<BrowserRelease>, Box<dyn std::error::Error + Send + Sync>>;

  /// Last known release list regardless of age.
  fn cached_releases(&self, browser: &str) -> Option<Vec<BrowserRelease>>;
}

pub struct ApiClient {
  client: Client,
  mozilla_api_base: String,
  github_api_base: String,
  chromium_api_base: String,
  tor_archive_base: String,
  wayfern_manifest_url: Option<String>,
}

impl ApiClient {
  pub fn new() -> Self {
    Self::new_with_base_urls(
      "https://product-details.mozilla.org/1.0".to_string(),
      "https://api.github.com".to_string(),
      "https://commondatastorage.googleapis.com/chromium-browser-snapshots".to_string(),
      "https://archive.torproject.org/tor-package-archive/torbrowser".to_string(),
      None,
    )
  }

  pub fn new_with_base_urls(
    mozilla_api_base: String,
    github_api_base: String,
    chromium_api_base: String,
    tor_archive_base: String,
    wayfern_manifest_url: Option<String>,
  ) -> Self {
    let client = Client::builder()
      .timeout(std::time::Duration::from_secs(30))
      .build()
      .unwrap_or_else(|_| Client::new());

    Self {
      client,
      mozilla_api_base,
      github_api_base,
      chromium_api_base,
      tor_archive_base,
      wayfern_manifest_url,
    }
  }

  pub fn instance() -> &'static ApiClient {
    &API_CLIENT
  }

  fn cache_file(browser: &str, suffix: &str) -> Result<PathBuf, std::io::Error> {
    let dir = app_dirs::version_cache_dir();
    fs::create_dir_all(&dir)?;
    Ok(dir.join(format!("{browser}_{suffix}.json")))
  }

  fn current_timestamp() -> u64 {
    SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_secs()
  }

  fn read_cached_versions(browser: &str) -> Option<CachedVersionData> {
    let cache_file = Self::cache_file(browser, "versions").ok()?;
    let content = fs::read_to_string(cache_file).ok()?;
    serde_json::from_str(&content).ok()
  }

  pub fn load_cached_versions(&self, browser: &str) -> Option<Vec<BrowserRelease>> {
    Self::read_cached_versions(browser).map(|cached| cached.releases)
  }

  pub fn is_cache_expired(&self, browser: &str) -> bool {
    match Self::read_cached_versions(browser) {
      Some(cached) => Self::current_timestamp().saturating_sub(cached.timestamp) >= CACHE_TTL_SECS,
      None => true,
    }
  }

  pub fn save_cached_versions(
    &self,
    browser: &str,
    releases: &[BrowserRelease],
  ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cached_data = CachedVersionData {
      releases: releases.to_vec(),
      timestamp: Self::current_timestamp(),
    };
    fs::write(
      Self::cache_file(browser, "versions")?,
      serde_json::to_string_pretty(&cached_data)?,
    )?;
    log::info!("Cached {} versions for {}", releases.len(), browser);
    Ok(())
  }

  pub fn get_cached_github_releases(&self, browser: &str) -> Option<Vec<GithubRelease>> {
    let cache_file = Self::cache_file(browser, "github").ok()?;
    let content = fs::read_to_string(cache_file).ok()?;
    let cached: CachedGithubData = serde_json::from_str(&content).ok()?;
    Some(cached.releases)
  }

  fn save_cached_github_releases(
    &self,
    browser: &str,
    releases: &[GithubRelease],
  ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cached_data = CachedGithubData {
      releases: releases.to_vec(),
      timestamp: Self::current_timestamp(),
    };
    fs::write(
      Self::cache_file(browser, "github")?,
      serde_json::to_string_pretty(&cached_data)?,
    )?;
    Ok(())
  }

  pub fn clear_all_cache(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let dir = app_dirs::version_cache_dir();
    if dir.exists() {
      for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
          fs::remove_file(path)?;
        }
      }
    }
    Ok(())
  }

  async fn get_text(&self, url: &str) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let response = self
      .client
      .get(url)
      .header("User-Agent", USER_AGENT)
      .send()
      .await?;

    if !response.status().is_success() {
      return Err(format!("Request to {url} failed with status {}", response.status()).into());
    }

    Ok(response.text().await?)
  }

  /// `product` is the product-details file stem: "firefox" or "devedition".
  pub async fn fetch_mozilla_releases(
    &self,
    browser: &str,
    product: &str,
  ) -> Result<Vec<BrowserRelease>, Box<dyn std::error::Error + Send + Sync>> {
    log::info!("Fetching {browser} releases from Mozilla product details");
    let url = format!("{}/{product}.json", self.mozilla_api_base);
    let body = self.get_text(&url).await?;
    let response: MozillaApiResponse = serde_json::from_str(&body)
      .map_err(|e| format!("Failed to parse Mozilla product details for {browser}: {e}"))?;

    let key_prefix = format!("{product}-");
    let mut releases: Vec<BrowserRelease> = response
      .releases
      .into_iter()
      .filter(|(key, release)| {
        key.starts_with(&key_prefix) && !release.version.is_empty() && release.category != "esr"
      })
      .map(|(_, release)| {
        let is_stable = matches!(release.category.as_str(), "major" | "stability");
        BrowserRelease {
          is_prerelease: !is_stable || is_browser_version_nightly(browser, &release.version, None),
          version: release.version,
          date: release.date,
        }
      })
      .collect();

    releases.sort_by(|a, b| compare_versions(&b.version, &a.version));
    Ok(releases)
  }

  async fn fetch_github_releases(
    &self,
    repo: &str,
  ) -> Result<Vec<GithubRelease>, Box<dyn std::error::Error + Send + Sync>> {
    let url = format!(
      "{}/repos/{repo}/releases?per_page=100&page=1",
      self.github_api_base
    );
    let text = self.get_text(&url).await?;
    serde_json::from_str(&text).map_err(|e| {
      log::error!("Failed to parse GitHub releases for {repo}: {e}");
      format!("Failed to parse GitHub API response: {e}").into()
    })
  }

  fn github_repo(browser: &str) -> Option<&'static str> {
    match browser {
      "zen" => Some("zen-browser/desktop"),
      "brave" => Some("brave/brave-browser"),
      "mullvad-browser" => Some("mullvad/mullvad-browser"),
      "camoufox" => Some("daijro/camoufox"),
      _ => None,
    }
  }

  fn has_compatible_asset(browser: &str, assets: &[GithubAsset], os: &str, arch: &str) -> bool {
    match browser {
      "camoufox" => {
        let (os_name, arch_name) = match (os, arch) {
          ("windows", "x64") => ("win", "x86_64"),
          ("windows", "arm64") => ("win", "arm64"),
          ("linux", "x64") => ("lin", "x86_64"),
          ("linux", "arm64") => ("lin", "arm64"),
          ("macos", "x64") => ("mac", "x86_64"),
          ("macos", "arm64") => ("mac", "arm64"),
          _ => return false,
        };
        let suffix = format!(".{os_name}.{arch_name}.zip");
        assets.iter().any(|asset| {
          let name = asset.name.to_lowercase();
          name.starts_with("camoufox-") && name.ends_with(&suffix)
        })
      }
      "brave" => {
        let wanted = match os {
          "windows" => ".exe",
          "macos" => ".dmg",
          "linux" => ".zip",
          _ => return false,
        };
        assets
          .iter()
          .any(|asset| asset.name.to_lowercase().ends_with(wanted))
      }
      _ => true,
    }
  }

  pub async fn fetch_github_browser_releases(
    &self,
    browser: &str,
  ) -> Result<Vec<GithubRelease>, Box<dyn std::error::Error + Send + Sync>> {
    let repo = Self::github_repo(browser)
      .ok_or_else(|| format!("{browser} is not distributed through GitHub releases"))?;
    log::info!("Fetching {browser} releases from GitHub ({repo})");

    let (os, arch) = platform_info();
    let mut releases: Vec<GithubRelease> = self
      .fetch_github_releases(repo)
      .await?
      .into_iter()
      .filter(|release| Self::has_compatible_asset(browser, &release.assets, &os, &arch))
      .map(|mut release| {
        release.is_nightly =
          is_browser_version_nightly(browser, &release.tag_name, Some(&release.name));
        release
      })
      .collect();

    releases.sort_by(|a, b| {
      compare_versions(
        b.tag_name.trim_start_matches('v'),
        a.tag_name.trim_start_matches('v'),
      )
    });

    if let Err(e) = self.save_cached_github_releases(browser, &releases) {
      log::error!("Failed to cache {browser} GitHub releases: {e}");
    }

    Ok(releases)
  }

  pub async fn fetch_chromium_releases(
    &self,
  ) -> Result<Vec<BrowserRelease>, Box<dyn std::error::Error + Send + Sync>> {
    let platform = chromium_platform()?;
    let url = format!("{}/{platform}/LAST_CHANGE", self.chromium_api_base);
    let latest = self.get_text(&url).await?;
    let latest_num: u32 = latest
      .trim()
      .parse()
      .map_err(|_| format!("Unexpected Chromium LAST_CHANGE value: {latest}"))?;

    // Snapshot builds are sparse; step back in coarse increments
    Ok(
      (0..20u32)
        .map(|i| latest_num.saturating_sub(i * 1000))
        .filter(|n| *n > 0)
        .map(|n| BrowserRelease {
          version: n.to_string(),
          date: String::new(),
          is_prerelease: false,
        })
        .collect(),
    )
  }

  pub async fn fetch_tor_releases(
    &self,
  ) -> Result<Vec<BrowserRelease>, Box<dyn std::error::Error + Send + Sync>> {
    let listing = self.get_text(&format!("{}/", self.tor_archive_base)).await?;
    let pattern = regex_lite::Regex::new(r#"href="(\d+\.\d+(?:\.\d+)?(?:a\d+)?)/""#)
      .map_err(|e| format!("Invalid Tor listing pattern: {e}"))?;

    let mut versions: Vec<String> = pattern
      .captures_iter(&listing)
      .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
      .collect();
    versions.dedup();
    sort_versions(&mut versions);

    Ok(
      versions
        .into_iter()
        .take(20)
        .map(|version| BrowserRelease {
          is_prerelease: is_browser_version_nightly("tor-browser", &version, None),
          version,
          date: String::new(),
        })
        .collect(),
    )
  }

  fn wayfern_manifest_url(&self) -> Option<String> {
    self.wayfern_manifest_url.clone().or_else(|| {
      crate::settings_manager::SettingsManager::instance()
        .load_settings()
        .ok()
        .and_then(|settings| settings.wayfern_manifest_url)
    })
  }

  pub async fn fetch_wayfern_manifest(
    &self,
  ) -> Result<WayfernManifest, Box<dyn std::error::Error + Send + Sync>> {
    let url = self
      .wayfern_manifest_url()
      .ok_or("Wayfern release manifest URL is not configured")?;
    let body = self.get_text(&url).await?;
    let manifest: WayfernManifest = serde_json::from_str(&body)
      .map_err(|e| format!("Failed to parse Wayfern manifest: {e}"))?;

    fs::write(
      Self::cache_file("wayfern", "manifest")?,
      serde_json::to_string_pretty(&manifest)?,
    )?;
    Ok(manifest)
  }

  pub fn cached_wayfern_manifest(&self) -> Option<WayfernManifest> {
    let content = fs::read_to_string(Self::cache_file("wayfern", "manifest").ok()?).ok()?;
    serde_json::from_str(&content).ok()
  }

  /// Download URL of the asset in `browser`'s cached GitHub release `version`
  /// whose name satisfies `matches`.
  pub fn find_cached_asset_url<F>(&self, browser: &str, version: &str, matches: F) -> Option<String>
  where
    F: Fn(&str) -> bool,
  {
    self
      .get_cached_github_releases(browser)?
      .into_iter()
      .find(|release| release.tag_name == version || release.tag_name.trim_start_matches('v') == version)?
      .assets
      .into_iter()
      .find(|asset| matches(&asset.name.to_lowercase()))
      .map(|asset| asset.browser_download_url)
  }

  async fn fetch_uncached(
    &self,
    browser: &str,
  ) -> Result<Vec<BrowserRelease>, Box<dyn std::error::Error + Send + Sync>> {
    match browser {
      "firefox" => self.fetch_mozilla_releases(browser, "firefox").await,
      "firefox-developer" => self.fetch_mozilla_releases(browser, "devedition").await,
      "chromium" => self.fetch_chromium_releases().await,
      "tor-browser" => self.fetch_tor_releases().await,
      "wayfern" => {
        let manifest = self.fetch_wayfern_manifest().await?;
        Ok(vec![BrowserRelease {
          version: manifest.version,
          date: manifest.date,
          is_prerelease: false,
        }])
      }
      "zen" | "brave" | "mullvad-browser" | "camoufox" => Ok(
        self
          .fetch_github_browser_releases(browser)
          .await?
          .into_iter()
          .map(|release| BrowserRelease {
            version: release.tag_name.trim_start_matches('v').to_string(),
            date: release.published_at,
            is_prerelease: release.is_nightly,
          })
          .collect(),
      ),
      _ => Err(format!("Unsupported browser: {browser}").into()),
    }
  }
}

impl Default for ApiClient {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl ReleaseSource for ApiClient {
  async fn fetch_releases(
    &self,
    browser: &str,
    no_caching: bool,
  ) -> Result<Vec<BrowserRelease>, Box<dyn std::error::Error + Send + Sync>> {
    if !no_caching && !self.is_cache_expired(browser) {
      if let Some(cached) = self.load_cached_versions(browser) {
        log::debug!("Using cached versions for {browser}");
        return Ok(cached);
      }
    }

    let releases = self.fetch_uncached(browser).await?;

    if let Err(e) = self.save_cached_versions(browser, &releases) {
      log::error!("Failed to cache {browser} versions: {e}");
    }

    Ok(releases)
  }

  fn cached_releases(&self, browser: &str) -> Option<Vec<BrowserRelease>> {
    self.load_cached_versions(browser)
  }
}

pub fn chromium_platform() -> Result<&'static str, Box<dyn std::error::Error + Send + Sync>> {
  let (os, arch) = platform_info();
  match (os.as_str(), arch.as_str()) {
    ("windows", "x64") => Ok("Win_x64"),
    ("windows", "arm64") => Ok("Win_Arm64"),
    ("linux", "x64") => Ok("Linux_x64"),
    ("macos", "x64") => Ok("Mac"),
    ("macos", "arm64") => Ok("Mac_Arm"),
    _ => Err(format!("Chromium snapshots are not published for {os}/{arch}").into()),
  }
}

lazy_static::lazy_static! {
  static ref API_CLIENT: ApiClient = ApiClient::new();
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn create_test_client(server: &MockServer) -> ApiClient {
    let base = server.uri();
    ApiClient::new_with_base_urls(
      base.clone(),
      base.clone(),
      base.clone(),
      format!("{base}/tor"),
      Some(format!("{base}/wayfern.json")),
    )
  }

  #[test]
  fn test_version_parsing() {
    let v = VersionComponent::parse("v1.2.3");
    assert_eq!((v.major, v.minor, v.patch), (1, 2, 3));
    assert!(v.pre_release.is_none());

    let beta = VersionComponent::parse("140.0b3");
    assert_eq!(beta.major, 140);
    assert_eq!(
      beta.pre_release,
      Some(PreRelease {
        kind: PreReleaseKind::Beta,
        number: Some(3)
      })
    );

    let alpha = VersionComponent::parse("14.5a6");
    assert_eq!(alpha.pre_release.unwrap().kind, PreReleaseKind::Alpha);

    assert!(VersionComponent::parse("twilight").is_twilight());
  }

  #[test]
  fn test_version_ordering() {
    let mut versions = vec![
      "139.0b2".to_string(),
      "138.0".to_string(),
      "139.0".to_string(),
      "twilight".to_string(),
      "139.0b10".to_string(),
      "139.0rc1".to_string(),
    ];
    sort_versions(&mut versions);
    assert_eq!(
      versions,
      vec!["twilight", "139.0", "139.0rc1", "139.0b10", "139.0b2", "138.0"]
    );
  }

  #[test]
  fn test_nightly_classification() {
    assert!(is_browser_version_nightly("firefox-developer", "140.0", None));
    assert!(is_browser_version_nightly("zen", "twilight", None));
    assert!(!is_browser_version_nightly("zen", "1.11b", None));
    assert!(!is_browser_version_nightly("camoufox", "135.0-beta.24", None));
    assert!(!is_browser_version_nightly("chromium", "1465660", None));
    assert!(is_browser_version_nightly("firefox", "140.0b1", None));
    assert!(!is_browser_version_nightly("firefox", "139.0.4", None));
    assert!(!is_browser_version_nightly(
      "brave",
      "v1.81.9",
      Some("Release v1.81.9 (Chromium 139)")
    ));
    assert!(is_browser_version_nightly(
      "brave",
      "v1.82.1",
      Some("Nightly v1.82.1")
    ));
  }

  #[tokio::test]
  async fn test_firefox_product_details_are_split_by_category() {
    let tmp = TempDir::new().unwrap();
    let _cache = app_dirs::set_test_cache_dir(tmp.path().to_path_buf());
    let server = MockServer::start().await;
    let client = create_test_client(&server);

    let body = r#"{
      "releases": {
        "firefox-139.0": {"category": "major", "date": "2025-05-27", "version": "139.0"},
        "firefox-139.0.4": {"category": "stability", "date": "2025-06-10", "version": "139.0.4"},
        "firefox-140.0b3": {"category": "dev", "date": "2025-06-01", "version": "140.0b3"},
        "firefox-128.11.0esr": {"category": "esr", "date": "2025-06-01", "version": "128.11.0esr"},
        "thunderbird-1.0": {"category": "major", "date": "2004-12-07", "version": "1.0"}
      }
    }"#;
    Mock::given(method("GET"))
      .and(path("/firefox.json"))
      .respond_with(ResponseTemplate::new(200).set_body_string(body))
      .mount(&server)
      .await;

    let releases = client.fetch_releases("firefox", true).await.unwrap();
    let versions: Vec<&str> = releases.iter().map(|r| r.version.as_str()).collect();
    assert_eq!(versions, vec!["140.0b3", "139.0.4", "139.0"]);
    assert!(releases[0].is_prerelease);
    assert!(!releases[1].is_prerelease);

    // The fetch populated the cache
    assert_eq!(client.load_cached_versions("firefox").unwrap(), releases);
    assert!(!client.is_cache_expired("firefox"));
  }

  #[tokio::test]
  async fn test_devedition_releases_are_always_nightly() {
    let tmp = TempDir::new().unwrap();
    let _cache = app_dirs::set_test_cache_dir(tmp.path().to_path_buf());
    let server = MockServer::start().await;
    let client = create_test_client(&server);

    Mock::given(method("GET"))
      .and(path("/devedition.json"))
      .respond_with(ResponseTemplate::new(200).set_body_string(
        r#"{"releases": {"devedition-140.0b1": {"category": "major", "date": "", "version": "140.0b1"}}}"#,
      ))
      .mount(&server)
      .await;

    let releases = client.fetch_releases("firefox-developer", true).await.unwrap();
    assert_eq!(releases.len(), 1);
    assert!(releases[0].is_prerelease);
  }

  #[tokio::test]
  async fn test_github_releases_use_tag_names_and_nightly_rules() {
    let tmp = TempDir::new().unwrap();
    let _cache = app_dirs::set_test_cache_dir(tmp.path().to_path_buf());
    let server = MockServer::start().await;
    let client = create_test_client(&server);

    let body = r#"[
      {"tag_name": "1.11b", "name": "Release build - 1.11b", "assets": [], "published_at": "2025-04-01"},
      {"tag_name": "twilight", "name": "Twilight build", "assets": [], "published_at": "2025-04-02"},
      {"tag_name": "1.12b", "name": "Release build - 1.12b", "assets": [], "published_at": "2025-05-01"}
    ]"#;
    Mock::given(method("GET"))
      .and(path("/repos/zen-browser/desktop/releases"))
      .respond_with(ResponseTemplate::new(200).set_body_string(body))
      .mount(&server)
      .await;

    let releases = client.fetch_releases("zen", true).await.unwrap();
    let versions: Vec<&str> = releases.iter().map(|r| r.version.as_str()).collect();
    assert_eq!(versions, vec!["twilight", "1.12b", "1.11b"]);
    assert!(releases[0].is_prerelease);
    assert!(!releases[1].is_prerelease);
    assert!(client.get_cached_github_releases("zen").is_some());
  }

  #[tokio::test]
  async fn test_tor_archive_listing() {
    let tmp = TempDir::new().unwrap();
    let _cache = app_dirs::set_test_cache_dir(tmp.path().to_path_buf());
    let server = MockServer::start().await;
    let client = create_test_client(&server);

    let listing = r#"<html><body>
      <a href="../">../</a>
      <a href="14.0.3/">14.0.3/</a>
      <a href="14.0.4/">14.0.4/</a>
      <a href="14.5a6/">14.5a6/</a>
    </body></html>"#;
    Mock::given(method("GET"))
      .and(path("/tor/"))
      .respond_with(ResponseTemplate::new(200).set_body_string(listing))
      .mount(&server)
      .await;

    let releases = client.fetch_releases("tor-browser", true).await.unwrap();
    let versions: Vec<&str> = releases.iter().map(|r| r.version.as_str()).collect();
    assert_eq!(versions, vec!["14.5a6", "14.0.4", "14.0.3"]);
    assert!(releases[0].is_prerelease);
    assert!(!releases[1].is_prerelease);
  }

  #[tokio::test]
  async fn test_wayfern_manifest_is_cached() {
    let tmp = TempDir::new().unwrap();
    let _cache = app_dirs::set_test_cache_dir(tmp.path().to_path_buf());
    let server = MockServer::start().await;
    let client = create_test_client(&server);

    Mock::given(method("GET"))
      .and(path("/wayfern.json"))
      .respond_with(ResponseTemplate::new(200).set_body_string(
        r#"{"version": "1.4.0", "downloads": {"linux-x64": "https://dl.example/wayfern.tar.xz"}}"#,
      ))
      .mount(&server)
      .await;

    let releases = client.fetch_releases("wayfern", true).await.unwrap();
    assert_eq!(releases[0].version, "1.4.0");
    let manifest = client.cached_wayfern_manifest().unwrap();
    assert_eq!(
      manifest.downloads.get("linux-x64").map(String::as_str),
      Some("https://dl.example/wayfern.tar.xz")
    );
  }

  #[tokio::test]
  async fn test_server_error_is_reported() {
    let tmp = TempDir::new().unwrap();
    let _cache = app_dirs::set_test_cache_dir(tmp.path().to_path_buf());
    let server = MockServer::start().await;
    let client = create_test_client(&server);

    Mock::given(method("GET"))
      .and(path("/firefox.json"))
      .respond_with(ResponseTemplate::new(503))
      .mount(&server)
      .await;

    let err = client.fetch_releases("firefox", true).await.unwrap_err();
    assert!(err.to_string().contains("503"), "unexpected error: {err}");
  }
}
