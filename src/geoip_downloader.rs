use crate::browser::GithubRelease;
use crate::events;
use futures_util::StreamExt;
use maxminddb::Reader;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::net::IpAddr;
use std::path::PathBuf;

const MMDB_REPO: &str = "P3TERX/GeoLite.mmdb";
const MMDB_FILE_NAME: &str = "GeoLite2-City.mmdb";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeoIPDownloadProgress {
  pub stage: String, // "downloading", "completed"
  pub percentage: f64,
  pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GeoLocation {
  pub city: Option<String>,
  pub country: Option<String>,
  pub country_code: Option<String>,
}

// Only the parts of a GeoLite2-City record we read.
#[derive(Deserialize, Default)]
struct CityRecord {
  #[serde(default)]
  city: Option<NamedRecord>,
  #[serde(default)]
  country: Option<CountryRecord>,
}

#[derive(Deserialize, Default)]
struct NamedRecord {
  #[serde(default)]
  names: HashMap<String, String>,
}

#[derive(Deserialize, Default)]
struct CountryRecord {
  #[serde(default)]
  iso_code: Option<String>,
  #[serde(default)]
  names: HashMap<String, String>,
}

pub struct GeoIPDownloader {
  client: Client,
  github_api_base: String,
}

impl GeoIPDownloader {
  fn new() -> Self {
    Self::with_github_api_base("https://api.github.com".to_string())
  }

  pub fn with_github_api_base(github_api_base: String) -> Self {
    Self {
      client: Client::new(),
      github_api_base,
    }
  }

  pub fn instance() -> &'static GeoIPDownloader {
    &GEOIP_DOWNLOADER
  }

  pub fn get_mmdb_file_path() -> PathBuf {
    crate::app_dirs::geoip_dir().join(MMDB_FILE_NAME)
  }

  pub fn is_geoip_database_available() -> bool {
    Self::get_mmdb_file_path().exists()
  }

  fn find_city_mmdb_asset(release: &GithubRelease) -> Option<String> {
    release
      .assets
      .iter()
      .find(|asset| asset.name.ends_with("-City.mmdb"))
      .map(|asset| asset.browser_download_url.clone())
  }

  async fn fetch_geoip_releases(
    &self,
  ) -> Result<Vec<GithubRelease>, Box<dyn std::error::Error + Send + Sync>> {
    let url = format!("{}/repos/{MMDB_REPO}/releases", self.github_api_base);
    let response = self
      .client
      .get(&url)
      .header("User-Agent", "donut-profiles")
      .send()
      .await?;
    if !response.status().is_success() {
      return Err(format!("Failed to fetch releases: HTTP {}", response.status()).into());
    }
    Ok(response.json().await?)
  }

  /// The configured mirror if one is set, otherwise the newest City asset
  /// published on GitHub.
  async fn resolve_download_url(&self) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let settings = crate::settings_manager::SettingsManager::instance().load_settings()?;
    if let Some(url) = settings.geoip_database_url.filter(|u| !u.trim().is_empty()) {
      return Ok(url);
    }
    let releases = self.fetch_geoip_releases().await?;
    let latest_release = releases.first().ok_or("No GeoIP database releases found")?;
    Self::find_city_mmdb_asset(latest_release)
      .ok_or_else(|| "No compatible GeoIP database asset found".into())
  }

  /// Downloads into a temp file next to the target and renames it into place
  /// once complete, so readers never see a partial database.
  pub async fn download_geoip_database(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let emit = |stage: &str, percentage: f64, message: String| {
      let _ = events::emit(
        events::names::GEOIP_DOWNLOAD_PROGRESS,
        GeoIPDownloadProgress {
          stage: stage.to_string(),
          percentage,
          message,
        },
      );
    };
    emit(
      "downloading",
      0.0,
      "Starting GeoIP database download".to_string(),
    );

    let download_url = self.resolve_download_url().await?;
    let mmdb_path = Self::get_mmdb_file_path();
    let geoip_dir = mmdb_path
      .parent()
      .ok_or("GeoIP database path has no parent directory")?;
    std::fs::create_dir_all(geoip_dir)?;

    let response = self.client.get(&download_url).send().await?;
    if !response.status().is_success() {
      return Err(
        format!(
          "Failed to download GeoIP database: HTTP {}",
          response.status()
        )
        .into(),
      );
    }

    let total_size = response.content_length().unwrap_or(0);
    let mut downloaded: u64 = 0;
    let mut temp_file = tempfile::NamedTempFile::new_in(geoip_dir)?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
      let chunk = chunk?;
      downloaded += chunk.len() as u64;
      temp_file.write_all(&chunk)?;

      if total_size > 0 {
        emit(
          "downloading",
          (downloaded as f64 / total_size as f64) * 100.0,
          format!("Downloaded {downloaded} / {total_size} bytes"),
        );
      }
    }
    temp_file.flush()?;
    temp_file
      .persist(&mmdb_path)
      .map_err(|e| format!("Failed to store GeoIP database: {e}"))?;

    log::info!("GeoIP database stored at {}", mmdb_path.display());
    emit(
      "completed",
      100.0,
      "GeoIP database download completed".to_string(),
    );
    Ok(())
  }
}

/// Looks `ip` up in the local database. `Ok(None)` when the database is
/// missing or has no record for the address.
pub fn lookup_ip(ip: &str) -> Result<Option<GeoLocation>, Box<dyn std::error::Error + Send + Sync>> {
  let mmdb_path = GeoIPDownloader::get_mmdb_file_path();
  if !mmdb_path.exists() {
    return Ok(None);
  }
  let ip_addr: IpAddr = ip
    .parse()
    .map_err(|_| format!("Invalid IP address: {ip}"))?;

  let reader = Reader::open_readfile(&mmdb_path)?;
  let Some(record) = reader.lookup(ip_addr)?.decode::<CityRecord>()? else {
    return Ok(None);
  };

  let english = |names: &HashMap<String, String>| names.get("en").cloned();
  Ok(Some(GeoLocation {
    city: record.city.as_ref().and_then(|c| english(&c.names)),
    country: record.country.as_ref().and_then(|c| english(&c.names)),
    country_code: record
      .country
      .and_then(|c| c.iso_code)
      .map(|code| code.to_uppercase()),
  }))
}

pub async fn is_geoip_database_available() -> Result<bool, String> {
  Ok(GeoIPDownloader::is_geoip_database_available())
}

pub async fn download_geoip_database() -> Result<(), String> {
  GeoIPDownloader::instance()
    .download_geoip_database()
    .await
    .map_err(|e| format!("Failed to download GeoIP database: {e}"))
}

lazy_static::lazy_static! {
  static ref GEOIP_DOWNLOADER: GeoIPDownloader = GeoIPDownloader::new();
}
