use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::time::interval;

use crate::browser_version_manager::BrowserVersionManager;
use crate::events;
use crate::settings_manager::SettingsManager;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct VersionUpdateProgress {
  pub current_browser: String,
  pub total_browsers: usize,
  pub completed_browsers: usize,
  pub new_versions_found: usize,
  pub browser_new_versions: usize, // New versions found for current browser
  pub status: String,              // "updating", "completed", "error"
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackgroundUpdateResult {
  pub browser: String,
  pub new_versions_count: usize,
  pub total_versions_count: usize,
  pub updated_successfully: bool,
  pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct BackgroundUpdateState {
  last_update_time: u64,
}

fn get_current_timestamp() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}

fn emit_progress(progress: &VersionUpdateProgress) {
  if let Err(e) = events::emit(events::names::VERSION_UPDATE_PROGRESS, progress) {
    log::warn!("Failed to emit version-update-progress: {e}");
  }
}

pub struct VersionUpdater {
  version_manager: &'static BrowserVersionManager,
  // One refresh cycle at a time, whether scheduled or manual
  run_lock: Mutex<()>,
}

impl VersionUpdater {
  fn new() -> Self {
    Self::with_version_manager(BrowserVersionManager::instance())
  }

  pub fn with_version_manager(version_manager: &'static BrowserVersionManager) -> Self {
    Self {
      version_manager,
      run_lock: Mutex::new(()),
    }
  }

  pub fn instance() -> &'static VersionUpdater {
    &VERSION_UPDATER
  }

  fn get_background_update_state_file() -> PathBuf {
    crate::app_dirs::version_cache_dir().join("background_update_state.json")
  }

  fn load_background_update_state() -> BackgroundUpdateState {
    fs::read_to_string(Self::get_background_update_state_file())
      .ok()
      .and_then(|content| serde_json::from_str(&content).ok())
      .unwrap_or_default()
  }

  fn save_background_update_state(
    state: &BackgroundUpdateState,
  ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state_file = Self::get_background_update_state_file();
    if let Some(parent) = state_file.parent() {
      fs::create_dir_all(parent)?;
    }
    fs::write(state_file, serde_json::to_string_pretty(state)?)?;
    Ok(())
  }

  fn update_interval_secs() -> u64 {
    let hours = SettingsManager::instance()
      .load_settings()
      .map(|s| s.version_update_interval_hours)
      .unwrap_or(3)
      .max(1);
    hours * 60 * 60
  }

  fn should_run_background_update() -> bool {
    let state = Self::load_background_update_state();
    let elapsed_secs = get_current_timestamp().saturating_sub(state.last_update_time);
    state.last_update_time == 0 || elapsed_secs >= Self::update_interval_secs()
  }

  /// Wakes every five minutes and refreshes when the interval has passed
  /// and automatic updates are enabled.
  pub async fn run_background_task(&'static self) {
    let mut update_interval = interval(Duration::from_secs(5 * 60));
    update_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
      update_interval.tick().await;

      let auto_update = SettingsManager::instance()
        .load_settings()
        .map(|s| s.auto_update_versions)
        .unwrap_or(true);
      if !auto_update || !Self::should_run_background_update() {
        continue;
      }

      log::info!("Starting background version update");
      if let Err(e) = self.run_update_cycle().await {
        log::error!("Background version update failed: {e}");
      }
    }
  }

  async fn run_update_cycle(
    &self,
  ) -> Result<Vec<BackgroundUpdateResult>, Box<dyn std::error::Error + Send + Sync>> {
    let _guard = self
      .run_lock
      .try_lock()
      .map_err(|_| "A version update is already running")?;
    let results = self.update_all_browser_versions().await;

    let state = BackgroundUpdateState {
      last_update_time: get_current_timestamp(),
    };
    if let Err(e) = Self::save_background_update_state(&state) {
      log::warn!("Failed to save background update state: {e}");
    }
    Ok(results)
  }

  async fn update_all_browser_versions(&self) -> Vec<BackgroundUpdateResult> {
    let supported_browsers = self.version_manager.get_supported_browsers();
    let total_browsers = supported_browsers.len();
    let mut results = Vec::with_capacity(total_browsers);
    let mut total_new_versions = 0;

    let progress = |current_browser: &str, completed: usize, found: usize, browser_new: usize| {
      VersionUpdateProgress {
        current_browser: current_browser.to_string(),
        total_browsers,
        completed_browsers: completed,
        new_versions_found: found,
        browser_new_versions: browser_new,
        status: "updating".to_string(),
      }
    };

    emit_progress(&progress("", 0, 0, 0));

    for (index, browser) in supported_browsers.iter().enumerate() {
      emit_progress(&progress(browser, index, total_new_versions, 0));

      match self
        .version_manager
        .fetch_browser_versions_with_count(browser)
        .await
      {
        Ok(result) => {
          let new_versions_count = result.new_versions_count.unwrap_or(0);
          total_new_versions += new_versions_count;
          log::info!("{browser}: {new_versions_count} new of {} versions", result.total_versions_count);
          results.push(BackgroundUpdateResult {
            browser: browser.clone(),
            new_versions_count,
            total_versions_count: result.total_versions_count,
            updated_successfully: true,
            error: None,
          });
          emit_progress(&progress(browser, index + 1, total_new_versions, new_versions_count));
        }
        Err(e) => {
          log::warn!("Failed to refresh versions for {browser}: {e}");
          results.push(BackgroundUpdateResult {
            browser: browser.clone(),
            new_versions_count: 0,
            total_versions_count: 0,
            updated_successfully: false,
            error: Some(e.to_string()),
          });
        }
      }
    }

    let all_failed = !results.is_empty() && results.iter().all(|r| !r.updated_successfully);
    emit_progress(&VersionUpdateProgress {
      current_browser: String::new(),
      total_browsers,
      completed_browsers: total_browsers,
      new_versions_found: total_new_versions,
      browser_new_versions: 0,
      status: if all_failed { "error" } else { "completed" }.to_string(),
    });

    results
  }

  pub async fn trigger_manual_update(
    &self,
  ) -> Result<Vec<BackgroundUpdateResult>, Box<dyn std::error::Error + Send + Sync>> {
    self.run_update_cycle().await
  }

  pub fn get_last_update_time(&self) -> Option<u64> {
    let state = Self::load_background_update_state();
    (state.last_update_time != 0).then_some(state.last_update_time)
  }

  pub fn get_time_until_next_update(&self) -> u64 {
    let state = Self::load_background_update_state();
    if state.last_update_time == 0 {
      return 0;
    }
    let elapsed = get_current_timestamp().saturating_sub(state.last_update_time);
    Self::update_interval_secs().saturating_sub(elapsed)
  }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VersionUpdateStatus {
  pub last_update_time: Option<u64>,
  pub seconds_until_next_update: u64,
}

pub async fn trigger_manual_version_update() -> Result<Vec<BackgroundUpdateResult>, String> {
  VersionUpdater::instance()
    .trigger_manual_update()
    .await
    .map_err(|e| format!("Failed to trigger manual update: {e}"))
}

pub async fn get_version_update_status() -> Result<VersionUpdateStatus, String> {
  let updater = VersionUpdater::instance();
  Ok(VersionUpdateStatus {
    last_update_time: updater.get_last_update_time(),
    seconds_until_next_update: updater.get_time_until_next_update(),
  })
}

lazy_static::lazy_static! {
  static ref VERSION_UPDATER: VersionUpdater = VersionUpdater::new();
}
