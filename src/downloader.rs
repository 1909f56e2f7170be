use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::browser::{create_browser, BrowserType};
use crate::browser_version_manager::{BrowserVersionManager, DownloadInfo};
use crate::downloaded_browsers_registry::DownloadedBrowsersRegistry;
use crate::events;
use crate::extraction;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36";

// Keyed by browser name: only one download per browser may be in flight.
// Tokens remember which version they belong to.
lazy_static::lazy_static! {
  static ref DOWNLOADING_BROWSERS: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
  static ref DOWNLOAD_CANCELLATION_TOKENS: Mutex<HashMap<String, (String, CancellationToken)>> =
    Mutex::new(HashMap::new());
  static ref ACTIVE_DOWNLOADS: Mutex<HashMap<String, DownloadProgress>> = Mutex::new(HashMap::new());
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStage {
  Downloading,
  Extracting,
  Verifying,
  Completed,
  Cancelled,
  Error,
}

impl DownloadStage {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      DownloadStage::Completed | DownloadStage::Cancelled | DownloadStage::Error
    )
  }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DownloadProgress {
  pub browser: String,
  pub version: String,
  pub downloaded_bytes: u64,
  pub total_bytes: Option<u64>,
  pub percentage: f64,
  pub speed_bytes_per_sec: f64,
  pub eta_seconds: Option<f64>,
  pub stage: DownloadStage,
}

impl DownloadProgress {
  fn stage(browser: &str, version: &str, stage: DownloadStage, percentage: f64) -> Self {
    Self {
      browser: browser.to_string(),
      version: version.to_string(),
      downloaded_bytes: 0,
      total_bytes: None,
      percentage,
      speed_bytes_per_sec: 0.0,
      eta_seconds: if stage == DownloadStage::Completed {
        Some(0.0)
      } else {
        None
      },
      stage,
    }
  }
}

/// Publishes a progress update and keeps the active-download table in step:
/// terminal stages drop the browser from it.
fn report_progress(progress: &DownloadProgress) {
  {
    let mut active = lock(&ACTIVE_DOWNLOADS);
    if progress.stage.is_terminal() {
      active.remove(&progress.browser);
    } else {
      active.insert(progress.browser.clone(), progress.clone());
    }
  }
  let _ = events::emit(events::names::DOWNLOAD_PROGRESS, progress);
}

/// Reservation of the per-browser download slot. Released on drop.
struct DownloadSlot {
  browser: String,
  token: CancellationToken,
}

impl DownloadSlot {
  fn acquire(browser: &str, version: &str) -> Result<Self, String> {
    let mut downloading = lock(&DOWNLOADING_BROWSERS);
    if !downloading.insert(browser.to_string()) {
      return Err(format!(
        "Browser '{browser}' is already being downloaded. Please wait for the current download to complete before requesting version '{version}'."
      ));
    }
    let token = CancellationToken::new();
    lock(&DOWNLOAD_CANCELLATION_TOKENS)
      .insert(browser.to_string(), (version.to_string(), token.clone()));
    Ok(Self {
      browser: browser.to_string(),
      token,
    })
  }
}

impl Drop for DownloadSlot {
  fn drop(&mut self) {
    lock(&DOWNLOADING_BROWSERS).remove(&self.browser);
    lock(&DOWNLOAD_CANCELLATION_TOKENS).remove(&self.browser);
    lock(&ACTIVE_DOWNLOADS).remove(&self.browser);
  }
}

pub fn is_downloading(browser: &str) -> bool {
  lock(&DOWNLOADING_BROWSERS).contains(browser)
}

pub struct Downloader {
  client: Client,
}

impl Downloader {
  fn new() -> Self {
    Self {
      client: Client::new(),
    }
  }

  pub fn instance() -> &'static Downloader {
    &DOWNLOADER
  }

  /// Streams `url` into `file_path`, resuming from whatever is already on
  /// disk. A 416 answer to the resume request restarts from zero.
  pub async fn download_file(
    &self,
    browser: &str,
    version: &str,
    url: &str,
    file_path: &Path,
    cancel_token: Option<&CancellationToken>,
  ) -> Result<PathBuf, Box<dyn std::error::Error + Send + Sync>> {
    let mut existing_size = std::fs::metadata(file_path).map(|m| m.len()).unwrap_or(0);

    let mut request = self.client.get(url).header("User-Agent", USER_AGENT);
    if existing_size > 0 {
      request = request.header("Range", format!("bytes={existing_size}-"));
    }
    let mut response = request.send().await?;

    if response.status().as_u16() == 416 && existing_size > 0 {
      log::info!("Server rejected resume of {browser} {version}, restarting from zero");
      let _ = std::fs::remove_file(file_path);
      existing_size = 0;
      response = self
        .client
        .get(url)
        .header("User-Agent", USER_AGENT)
        .send()
        .await?;
    }

    if !response.status().is_success() {
      return Err(format!("Download failed with status: {}", response.status()).into());
    }

    let mut total_size = response.content_length();
    if response.status().as_u16() == 206 {
      let from_content_range = response
        .headers()
        .get(reqwest::header::CONTENT_RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.rsplit('/').next())
        .and_then(|total| total.parse::<u64>().ok());
      total_size = from_content_range.or(total_size.map(|incoming| existing_size + incoming));
    } else if existing_size > 0 {
      // Range ignored, the body is the whole file
      let _ = std::fs::remove_file(file_path);
      existing_size = 0;
    }

    let percentage_of = |downloaded: u64| match total_size {
      Some(total) if total > 0 => (downloaded as f64 / total as f64) * 100.0,
      _ => 0.0,
    };

    report_progress(&DownloadProgress {
      browser: browser.to_string(),
      version: version.to_string(),
      downloaded_bytes: existing_size,
      total_bytes: total_size,
      percentage: percentage_of(existing_size),
      speed_bytes_per_sec: 0.0,
      eta_seconds: None,
      stage: DownloadStage::Downloading,
    });

    let mut file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(file_path)?;
    let mut stream = response.bytes_stream();
    let mut downloaded = existing_size;
    let start_time = Instant::now();
    let mut last_update = start_time;

    loop {
      // A stalled body must not keep a cancelled download alive
      let next = match cancel_token {
        Some(token) => tokio::select! {
          biased;
          _ = token.cancelled() => None,
          chunk = stream.next() => Some(chunk),
        },
        None => Some(stream.next().await),
      };
      let Some(next) = next else {
        drop(file);
        let _ = std::fs::remove_file(file_path);
        return Err("Download cancelled".into());
      };
      let Some(chunk) = next else {
        break;
      };
      let chunk = chunk?;
      file.write_all(&chunk)?;
      downloaded += chunk.len() as u64;

      let now = Instant::now();
      if now.duration_since(last_update) >= PROGRESS_INTERVAL {
        let elapsed = start_time.elapsed().as_secs_f64();
        // Only bytes from this session count toward speed
        let speed = if elapsed > 0.0 {
          downloaded.saturating_sub(existing_size) as f64 / elapsed
        } else {
          0.0
        };
        let eta = if speed > 0.0 {
          total_size.map(|total| total.saturating_sub(downloaded) as f64 / speed)
        } else {
          None
        };

        report_progress(&DownloadProgress {
          browser: browser.to_string(),
          version: version.to_string(),
          downloaded_bytes: downloaded,
          total_bytes: total_size,
          percentage: percentage_of(downloaded),
          speed_bytes_per_sec: speed,
          eta_seconds: eta,
          stage: DownloadStage::Downloading,
        });
        last_update = now;
      }
    }
    file.flush()?;

    Ok(file_path.to_path_buf())
  }

  /// Download, extract, verify and register `version` of `browser_type`
  /// from an already resolved `download_info`.
  pub async fn install(
    &self,
    browser_type: BrowserType,
    version: &str,
    download_info: &DownloadInfo,
  ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let browser_str = browser_type.as_str();
    let registry = DownloadedBrowsersRegistry::instance();

    if registry.is_browser_downloaded(browser_str, version) {
      log::info!("{browser_str} {version} is already downloaded");
      report_progress(&DownloadProgress::stage(
        browser_str,
        version,
        DownloadStage::Completed,
        100.0,
      ));
      return Ok(version.to_string());
    }
    if registry.is_browser_registered(browser_str, version) {
      log::info!("Registry lists {browser_str} {version} but its files are missing, dropping the entry");
      registry.remove_browser(browser_str, version)?;
    }

    let slot = DownloadSlot::acquire(browser_str, version)?;

    match self
      .run_pipeline(browser_type, version, download_info, &slot.token)
      .await
    {
      Ok(()) => {
        report_progress(&DownloadProgress::stage(
          browser_str,
          version,
          DownloadStage::Completed,
          100.0,
        ));
        drop(slot);
        Ok(version.to_string())
      }
      Err(e) => {
        let stage = if slot.token.is_cancelled() {
          DownloadStage::Cancelled
        } else {
          DownloadStage::Error
        };
        report_progress(&DownloadProgress::stage(browser_str, version, stage, 0.0));
        if stage == DownloadStage::Cancelled {
          if let Err(cleanup_error) = registry.cleanup_failed_download(browser_str, version) {
            log::warn!("Failed to clean up cancelled download: {cleanup_error}");
          }
        }
        drop(slot);
        Err(e)
      }
    }
  }

  async fn run_pipeline(
    &self,
    browser_type: BrowserType,
    version: &str,
    download_info: &DownloadInfo,
    cancel_token: &CancellationToken,
  ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let browser_str = browser_type.as_str();
    let browser_dir = DownloadedBrowsersRegistry::install_dir(browser_str, version);
    std::fs::create_dir_all(&browser_dir)
      .map_err(|e| format!("Failed to create browser directory: {e}"))?;

    let archive_path = browser_dir.join(&download_info.filename);
    self
      .download_file(
        browser_str,
        version,
        &download_info.url,
        &archive_path,
        Some(cancel_token),
      )
      .await
      .map_err(|e| format!("Failed to download browser: {e}"))?;

    if download_info.is_archive {
      report_progress(&DownloadProgress::stage(
        browser_str,
        version,
        DownloadStage::Extracting,
        100.0,
      ));
      let source = archive_path.clone();
      let dest = browser_dir.clone();
      tokio::task::spawn_blocking(move || extraction::extract_archive(&source, &dest))
        .await
        .map_err(|e| format!("Extraction task failed: {e}"))?
        .map_err(|e| format!("Failed to extract browser: {e}"))?;
    }

    if cancel_token.is_cancelled() {
      return Err("Download cancelled".into());
    }

    report_progress(&DownloadProgress::stage(
      browser_str,
      version,
      DownloadStage::Verifying,
      100.0,
    ));
    let executable = create_browser(browser_type)
      .get_executable_path(&browser_dir)
      .map_err(|e| format!("Browser executable not found after extraction: {e}"))?;
    extraction::set_executable_permissions(&executable)?;

    DownloadedBrowsersRegistry::instance().mark_download_completed(
      browser_str,
      version,
      browser_dir.clone(),
    )?;

    if download_info.is_archive && archive_path.exists() {
      if let Err(e) = std::fs::remove_file(&archive_path) {
        log::warn!("Could not delete archive after verification: {e}");
      }
    }

    if browser_type == BrowserType::Camoufox
      && !crate::geoip_downloader::GeoIPDownloader::is_geoip_database_available()
    {
      log::info!("Downloading GeoIP database for Camoufox");
      if let Err(e) = crate::geoip_downloader::GeoIPDownloader::instance()
        .download_geoip_database()
        .await
      {
        log::error!("Failed to download GeoIP database: {e}");
      }
    }

    Ok(())
  }

  pub async fn download_browser_full(
    &self,
    browser_str: &str,
    version: &str,
  ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let browser_type: BrowserType = browser_str.parse()?;
    let version_manager = BrowserVersionManager::instance();
    if !version_manager.is_browser_supported(browser_str)? {
      return Err(
        format!(
          "Browser '{}' is not supported on your platform ({} {}). Supported browsers: {}",
          browser_str,
          std::env::consts::OS,
          std::env::consts::ARCH,
          version_manager.get_supported_browsers().join(", ")
        )
        .into(),
      );
    }
    let download_info = version_manager
      .get_download_info(browser_str, version)
      .map_err(|e| format!("Failed to get download info: {e}"))?;
    self.install(browser_type, version, &download_info).await
  }
}

pub async fn download_browser(browser_str: String, version: String) -> Result<String, String> {
  Downloader::instance()
    .download_browser_full(&browser_str, &version)
    .await
    .map_err(|e| format!("Failed to download browser: {e}"))
}

pub async fn cancel_download(browser_str: String, version: String) -> Result<(), String> {
  let token = lock(&DOWNLOAD_CANCELLATION_TOKENS)
    .get(&browser_str)
    .filter(|(active_version, _)| *active_version == version)
    .map(|(_, token)| token.clone());
  match token {
    Some(token) => {
      log::info!("Cancelling download of {browser_str} {version}");
      token.cancel();
      Ok(())
    }
    None => Err(format!(
      "No active download found for {browser_str} {version}"
    )),
  }
}

pub async fn get_active_downloads() -> Result<Vec<DownloadProgress>, String> {
  let mut downloads: Vec<DownloadProgress> = lock(&ACTIVE_DOWNLOADS).values().cloned().collect();
  downloads.sort_by(|a, b| a.browser.cmp(&b.browser));
  Ok(downloads)
}

/// Removes an installed version. Refused while a profile still uses it or
/// while the browser is downloading.
pub async fn delete_downloaded_version(browser_str: String, version: String) -> Result<(), String> {
  if is_downloading(&browser_str) {
    return Err(format!(
      "Cannot delete {browser_str} {version} while a download is in progress"
    ));
  }

  let profiles = crate::profile::ProfileManager::instance()
    .list_profiles()
    .map_err(|e| format!("Failed to list profiles: {e}"))?;
  let users: Vec<String> = profiles
    .iter()
    .filter(|p| p.browser == browser_str && p.version == version)
    .map(|p| p.name.clone())
    .collect();
  if !users.is_empty() {
    return Err(format!(
      "Cannot delete {browser_str} {version}: used by profiles {}",
      users.join(", ")
    ));
  }

  let registry = DownloadedBrowsersRegistry::instance();
  if !registry.is_browser_registered(&browser_str, &version) {
    return Err(format!("{browser_str} {version} is not downloaded"));
  }
  registry
    .cleanup_failed_download(&browser_str, &version)
    .map_err(|e| format!("Failed to delete {browser_str} {version}: {e}"))
}

lazy_static::lazy_static! {
  static ref DOWNLOADER: Downloader = Downloader::new();
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::app_dirs;
  use std::fs::File;
  use tempfile::TempDir;
  use wiremock::matchers::{header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in entries {
      let mut tar_header = tar::Header::new_gnu();
      tar_header.set_size(data.len() as u64);
      tar_header.set_mode(0o755);
      tar_header.set_cksum();
      builder.append_data(&mut tar_header, name, *data).unwrap();
    }
    let raw = builder.into_inner().unwrap();
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
    encoder.write_all(&raw).unwrap();
    encoder.finish().unwrap()
  }

  #[tokio::test]
  async fn test_resume_appends_after_partial_content() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/brave.zip"))
      .and(header("Range", "bytes=6-"))
      .respond_with(
        ResponseTemplate::new(206)
          .insert_header("Content-Range", "bytes 6-10/11")
          .set_body_bytes(b"world".to_vec()),
      )
      .mount(&server)
      .await;

    let tmp = TempDir::new().unwrap();
    let target = tmp.path().join("brave.zip");
    std::fs::write(&target, b"hello ").unwrap();
    let (recorder, _emitter) = events::record_for_test();

    Downloader::instance()
      .download_file(
        "brave-resume-test",
        "1.0",
        &format!("{}/brave.zip", server.uri()),
        &target,
        None,
      )
      .await
      .unwrap();

    assert_eq!(std::fs::read(&target).unwrap(), b"hello world");
    let first = &recorder.events_named(events::names::DOWNLOAD_PROGRESS)[0];
    assert_eq!(first["downloaded_bytes"], 6);
    assert_eq!(first["total_bytes"], 11);
    lock(&ACTIVE_DOWNLOADS).remove("brave-resume-test");
  }

  #[tokio::test]
  async fn test_range_not_satisfiable_restarts_from_zero() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/chrome.zip"))
      .and(header("Range", "bytes=9-"))
      .respond_with(ResponseTemplate::new(416))
      .with_priority(1)
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/chrome.zip"))
      .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fresh".to_vec()))
      .mount(&server)
      .await;

    let tmp = TempDir::new().unwrap();
    let target = tmp.path().join("chrome.zip");
    std::fs::write(&target, b"stale-bit").unwrap();

    Downloader::instance()
      .download_file(
        "chromium-416-test",
        "1",
        &format!("{}/chrome.zip", server.uri()),
        &target,
        None,
      )
      .await
      .unwrap();

    assert_eq!(std::fs::read(&target).unwrap(), b"fresh");
    lock(&ACTIVE_DOWNLOADS).remove("chromium-416-test");
  }

  #[tokio::test]
  async fn test_failed_status_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&server)
      .await;
    let tmp = TempDir::new().unwrap();

    let result = Downloader::instance()
      .download_file(
        "mullvad-404-test",
        "1",
        &format!("{}/missing", server.uri()),
        &tmp.path().join("missing"),
        None,
      )
      .await;

    assert!(result.unwrap_err().to_string().contains("404"));
  }

  #[cfg(target_os = "linux")]
  #[tokio::test]
  async fn test_install_runs_all_stages_and_registers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/firefox-139.0.tar.gz"))
      .respond_with(
        ResponseTemplate::new(200).set_body_bytes(tar_gz(&[("firefox/firefox", b"#!/bin/sh\n")])),
      )
      .mount(&server)
      .await;

    let tmp = TempDir::new().unwrap();
    let _dirs = app_dirs::isolate_for_test(tmp.path());
    let (recorder, _emitter) = events::record_for_test();
    let info = DownloadInfo {
      url: format!("{}/firefox-139.0.tar.gz", server.uri()),
      filename: "firefox-139.0.tar.gz".to_string(),
      is_archive: true,
    };

    let version = Downloader::instance()
      .install(BrowserType::Firefox, "139.0", &info)
      .await
      .unwrap();
    assert_eq!(version, "139.0");

    let mut stages: Vec<String> = recorder
      .events_named(events::names::DOWNLOAD_PROGRESS)
      .iter()
      .map(|p| p["stage"].as_str().unwrap().to_string())
      .collect();
    stages.dedup();
    assert_eq!(stages, ["downloading", "extracting", "verifying", "completed"]);

    let registry = DownloadedBrowsersRegistry::instance();
    assert!(registry.is_browser_downloaded("firefox", "139.0"));
    let install_dir = DownloadedBrowsersRegistry::install_dir("firefox", "139.0");
    assert!(!install_dir.join("firefox-139.0.tar.gz").exists());
    assert!(get_active_downloads()
      .await
      .unwrap()
      .iter()
      .all(|p| p.browser != "firefox"));

    // Second call is served from the registry
    recorder.clear();
    Downloader::instance()
      .install(BrowserType::Firefox, "139.0", &info)
      .await
      .unwrap();
    let replay = recorder.events_named(events::names::DOWNLOAD_PROGRESS);
    assert_eq!(replay.len(), 1);
    assert_eq!(replay[0]["stage"], "completed");
  }

  #[tokio::test]
  async fn test_second_download_of_same_browser_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let _dirs = app_dirs::isolate_for_test(tmp.path());
    let _slot = DownloadSlot::acquire("zen", "1.12b").unwrap();
    assert!(is_downloading("zen"));

    let info = DownloadInfo {
      url: "http://127.0.0.1:9/zen.tar.xz".to_string(),
      filename: "zen.tar.xz".to_string(),
      is_archive: true,
    };
    let err = Downloader::instance()
      .install(BrowserType::Zen, "1.13b", &info)
      .await
      .unwrap_err();
    assert!(err.to_string().contains("already being downloaded"));
  }

  #[tokio::test]
  async fn test_cancel_mid_stream_removes_partial_file_and_frees_slot() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    // Headers and the first 4 KiB arrive, then the body stalls
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
      let (mut socket, _) = listener.accept().await.unwrap();
      let mut request = [0u8; 4096];
      let _ = socket.read(&mut request).await;
      socket
        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1048576\r\nContent-Type: application/octet-stream\r\n\r\n")
        .await
        .unwrap();
      socket.write_all(&[b'x'; 4096]).await.unwrap();
      socket.flush().await.unwrap();
      tokio::time::sleep(Duration::from_secs(60)).await;
    });

    let tmp = TempDir::new().unwrap();
    let _dirs = app_dirs::isolate_for_test(tmp.path());
    let (recorder, _emitter) = events::record_for_test();
    let info = DownloadInfo {
      url: format!("http://{addr}/devedition.tar.xz"),
      filename: "devedition.tar.xz".to_string(),
      is_archive: true,
    };
    let archive = DownloadedBrowsersRegistry::install_dir("firefox-developer", "140.0b3")
      .join("devedition.tar.xz");

    let canceller = async {
      for _ in 0..100 {
        if std::fs::metadata(&archive).map(|m| m.len()).unwrap_or(0) >= 4096 {
          break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
      }
      assert!(std::fs::metadata(&archive).unwrap().len() >= 4096);
      assert!(get_active_downloads()
        .await
        .unwrap()
        .iter()
        .any(|p| p.browser == "firefox-developer" && p.stage == DownloadStage::Downloading));
      // Another version of the same browser is not this download
      assert!(cancel_download("firefox-developer".to_string(), "139.0b9".to_string())
        .await
        .is_err());
      cancel_download("firefox-developer".to_string(), "140.0b3".to_string())
        .await
        .unwrap();
    };
    let (result, ()) = tokio::time::timeout(Duration::from_secs(10), async {
      tokio::join!(
        Downloader::instance().install(BrowserType::FirefoxDeveloper, "140.0b3", &info),
        canceller
      )
    })
    .await
    .expect("cancelled download should return promptly");
    assert!(result.unwrap_err().to_string().contains("cancelled"));

    let mut stages: Vec<String> = recorder
      .events_named(events::names::DOWNLOAD_PROGRESS)
      .iter()
      .map(|p| p["stage"].as_str().unwrap().to_string())
      .collect();
    stages.dedup();
    assert_eq!(stages, ["downloading", "cancelled"]);
    assert!(!archive.exists());
    assert!(!is_downloading("firefox-developer"));
    assert!(get_active_downloads()
      .await
      .unwrap()
      .iter()
      .all(|p| p.browser != "firefox-developer"));
    assert!(cancel_download("firefox-developer".to_string(), "140.0b3".to_string())
      .await
      .is_err());
    server.abort();
  }

  #[cfg(target_os = "linux")]
  #[tokio::test]
  async fn test_verification_failure_emits_error_and_frees_slot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(200).set_body_bytes(tar_gz(&[("README", b"nothing")])))
      .mount(&server)
      .await;

    let tmp = TempDir::new().unwrap();
    let _dirs = app_dirs::isolate_for_test(tmp.path());
    let (recorder, _emitter) = events::record_for_test();
    let info = DownloadInfo {
      url: format!("{}/mullvad.tar.gz", server.uri()),
      filename: "mullvad.tar.gz".to_string(),
      is_archive: true,
    };

    let err = Downloader::instance()
      .install(BrowserType::MullvadBrowser, "14.5", &info)
      .await
      .unwrap_err();
    assert!(err.to_string().contains("executable not found"));

    let last = recorder
      .events_named(events::names::DOWNLOAD_PROGRESS)
      .pop()
      .unwrap();
    assert_eq!(last["stage"], "error");
    assert!(!is_downloading("mullvad-browser"));
    assert!(!DownloadedBrowsersRegistry::instance().is_browser_registered("mullvad-browser", "14.5"));
  }

  #[tokio::test]
  async fn test_cancel_without_active_download_fails() {
    let err = cancel_download("tor-browser".to_string(), "14.0".to_string())
      .await
      .unwrap_err();
    assert!(err.contains("No active download"));
  }

  #[tokio::test]
  async fn test_delete_refused_for_unknown_version() {
    let tmp = TempDir::new().unwrap();
    let _dirs = app_dirs::isolate_for_test(tmp.path());
    let dir = DownloadedBrowsersRegistry::install_dir("camoufox", "135.0");
    std::fs::create_dir_all(&dir).unwrap();
    File::create(dir.join("camoufox")).unwrap();

    assert!(delete_downloaded_version("camoufox".into(), "135.0".into())
      .await
      .is_err());

    DownloadedBrowsersRegistry::instance()
      .mark_download_completed("camoufox", "135.0", dir.clone())
      .unwrap();
    delete_downloaded_version("camoufox".into(), "135.0".into())
      .await
      .unwrap();
    assert!(!dir.exists());
  }
}
