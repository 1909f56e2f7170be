use crate::browser::{create_browser, BrowserType};
use crate::downloaded_browsers_registry::DownloadedBrowsersRegistry;
use crate::events;
use crate::extension_manager::ExtensionManager;
use crate::profile::{BrowserProfile, ProfileManager};
use crate::proxy_manager::ProxyManager;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{SystemTime, UNIX_EPOCH};
use sysinfo::{Pid, Process, ProcessStatus, ProcessesToUpdate, System};
use tokio::process::Command;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileRunningChanged {
  pub id: String,
  pub is_running: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UrlOpenRequest {
  pub url: String,
}

fn process_system(pid: u32) -> System {
  let mut system = System::new();
  system.refresh_processes(ProcessesToUpdate::Some(&[Pid::from(pid as usize)]), true);
  system
}

/// Zombies still hold their pid until reaped but will never run again.
fn is_live(process: &Process) -> bool {
  !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
}

pub fn is_process_alive(pid: u32) -> bool {
  process_system(pid)
    .process(Pid::from(pid as usize))
    .is_some_and(is_live)
}

/// Whether `pid` is a browser started for this profile, judged by the
/// profile path on its command line.
fn process_matches_profile(pid: u32, profile: &BrowserProfile, profile_data_path: &Path) -> bool {
  let system = process_system(pid);
  let Some(process) = system
    .process(Pid::from(pid as usize))
    .filter(|p| is_live(p))
  else {
    return false;
  };
  let cmd = process.cmd();
  // Some platforms hide other processes' argv; trust the pid then
  if cmd.is_empty() {
    return true;
  }
  let path_str = profile_data_path.to_string_lossy();
  let is_chromium = profile
    .browser
    .parse::<BrowserType>()
    .map(|b| b.is_chromium_family())
    .unwrap_or(false);
  cmd.iter().any(|arg| {
    let arg = arg.to_string_lossy();
    if is_chromium {
      arg == format!("--user-data-dir={path_str}")
    } else {
      arg == path_str
    }
  })
}

/// Clears the stored pid once the browser exits, unless the profile has
/// already moved on to another process.
fn clear_exited_process(profile_id: &str, pid: u32) {
  let profile_manager = ProfileManager::instance();
  match profile_manager.get_profile(profile_id) {
    Ok(profile) if profile.process_id == Some(pid) => {
      match profile_manager.update_process_info(profile_id, None, None) {
        Ok(_) => emit_running_changed(profile_id, false),
        Err(e) => log::warn!("Failed to clear process info for profile {profile_id}: {e}"),
      }
    }
    Ok(_) => {}
    Err(e) => log::debug!("Profile {profile_id} gone before its browser exited: {e}"),
  }
}

fn emit_running_changed(profile_id: &str, is_running: bool) {
  let payload = ProfileRunningChanged {
    id: profile_id.to_string(),
    is_running,
  };
  if let Err(e) = events::emit(events::names::PROFILE_RUNNING_CHANGED, payload) {
    log::warn!("Failed to emit profile-running-changed event: {e}");
  }
}

/// Only web and file URLs may be handed to a browser.
pub fn validate_open_url(url: &str) -> Result<url::Url, String> {
  let parsed = url::Url::parse(url.trim()).map_err(|e| format!("Invalid URL '{url}': {e}"))?;
  match parsed.scheme() {
    "http" | "https" | "file" => Ok(parsed),
    scheme => Err(format!("Unsupported URL scheme '{scheme}'")),
  }
}

pub struct LaunchCommand {
  pub executable: PathBuf,
  pub args: Vec<String>,
}

pub struct BrowserRunner;

impl BrowserRunner {
  fn new() -> Self {
    Self
  }

  pub fn instance() -> &'static BrowserRunner {
    &BROWSER_RUNNER
  }

  /// Resolves the installed executable and the argv for `profile`, and
  /// prepares the profile directory (prefs and extensions) for launch.
  pub fn prepare_launch(
    &self,
    profile: &BrowserProfile,
    url: Option<String>,
  ) -> Result<LaunchCommand, Box<dyn std::error::Error + Send + Sync>> {
    let browser_type: BrowserType = profile.browser.parse()?;
    let profile_manager = ProfileManager::instance();
    let profile_data_path = profile.get_profile_data_path(&profile_manager.get_profiles_dir());
    std::fs::create_dir_all(&profile_data_path)?;

    let browser = create_browser(browser_type);
    let configured_executable = profile
      .camoufox_config
      .as_ref()
      .and_then(|c| c.executable_path.clone())
      .or_else(|| {
        profile
          .wayfern_config
          .as_ref()
          .and_then(|c| c.executable_path.clone())
      })
      .map(PathBuf::from)
      .filter(|path| path.is_file());
    let executable = match configured_executable {
      Some(path) => path,
      None => {
        let install_dir = DownloadedBrowsersRegistry::install_dir(&profile.browser, &profile.version);
        browser.get_executable_path(&install_dir).map_err(|e| {
          format!(
            "{} {} is not installed ({e}). Download it first.",
            profile.browser, profile.version
          )
        })?
      }
    };

    let proxy_settings = if browser_type.supports_proxy() {
      profile
        .proxy_id
        .as_deref()
        .and_then(|id| ProxyManager::instance().get_proxy_settings_by_id(id))
    } else {
      None
    };

    if browser_type.is_firefox_family() {
      profile_manager.sync_proxy_preferences(profile)?;
    }
    let extension_dirs =
      ExtensionManager::instance().install_extensions_for_profile(profile, &profile_data_path)?;

    let mut args = browser.create_launch_args(
      &profile_data_path.to_string_lossy(),
      proxy_settings.as_ref(),
      None,
    );
    if browser_type.is_chromium_family() && !extension_dirs.is_empty() {
      let joined: Vec<String> = extension_dirs
        .iter()
        .map(|dir| dir.to_string_lossy().to_string())
        .collect();
      args.push(format!("--load-extension={}", joined.join(",")));
    }
    if let Some(url) = url {
      args.push(url);
    }

    Ok(LaunchCommand { executable, args })
  }

  pub async fn launch_browser(
    &self,
    profile_id: &str,
    url: Option<String>,
  ) -> Result<BrowserProfile, Box<dyn std::error::Error + Send + Sync>> {
    let profile_manager = ProfileManager::instance();
    let profile = profile_manager.get_profile(profile_id)?;
    if let Some(pid) = profile.process_id {
      if is_process_alive(pid) {
        return Err(format!("Profile '{}' is already running (PID {pid})", profile.name).into());
      }
    }
    if let Some(url) = &url {
      validate_open_url(url)?;
    }

    let launch = self.prepare_launch(&profile, url)?;
    log::info!(
      "Launching {} for profile '{}': {} {:?}",
      profile.browser,
      profile.name,
      launch.executable.display(),
      launch.args
    );
    let mut child = Command::new(&launch.executable)
      .args(&launch.args)
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .spawn()
      .map_err(|e| format!("Failed to start {}: {e}", launch.executable.display()))?;
    let pid = child
      .id()
      .ok_or_else(|| format!("{} exited before it could be tracked", launch.executable.display()))?;

    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    let updated = profile_manager.update_process_info(profile_id, Some(pid), Some(now))?;
    emit_running_changed(profile_id, true);

    let profile_id = profile_id.to_string();
    tokio::spawn(async move {
      match child.wait().await {
        Ok(status) => log::info!("Browser process {pid} for profile {profile_id} exited: {status}"),
        Err(e) => log::warn!("Failed to wait on browser process {pid}: {e}"),
      }
      clear_exited_process(&profile_id, pid);
    });
    Ok(updated)
  }

  pub async fn kill_browser_process(
    &self,
    profile_id: &str,
  ) -> Result<BrowserProfile, Box<dyn std::error::Error + Send + Sync>> {
    let profile_manager = ProfileManager::instance();
    let profile = profile_manager.get_profile(profile_id)?;

    if let Some(pid) = profile.process_id {
      let system = process_system(pid);
      match system.process(Pid::from(pid as usize)) {
        Some(process) => {
          if !process.kill() {
            return Err(format!("Failed to kill process {pid}").into());
          }
          log::info!("Killed browser process {pid} for profile '{}'", profile.name);
        }
        None => log::info!("Process {pid} for profile '{}' already exited", profile.name),
      }
    }

    let updated = profile_manager.update_process_info(profile_id, None, None)?;
    emit_running_changed(profile_id, false);
    Ok(updated)
  }

  /// Reports whether the profile's browser is alive and clears a stale pid
  /// when it is not.
  pub async fn check_browser_status(
    &self,
    profile_id: &str,
  ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    let profile_manager = ProfileManager::instance();
    let profile = profile_manager.get_profile(profile_id)?;
    let Some(pid) = profile.process_id else {
      return Ok(false);
    };

    let profile_data_path = profile.get_profile_data_path(&profile_manager.get_profiles_dir());
    if process_matches_profile(pid, &profile, &profile_data_path) {
      return Ok(true);
    }

    log::info!("Stored PID {pid} for profile '{}' is gone", profile.name);
    profile_manager.update_process_info(profile_id, None, None)?;
    emit_running_changed(profile_id, false);
    Ok(false)
  }

  /// Opens `url` in the profile, restarting the browser if it is running.
  pub async fn open_url_with_profile(
    &self,
    profile_id: &str,
    url: &str,
  ) -> Result<BrowserProfile, Box<dyn std::error::Error + Send + Sync>> {
    let url = validate_open_url(url)?.to_string();
    if self.check_browser_status(profile_id).await? {
      self.kill_browser_process(profile_id).await?;
    }
    self.launch_browser(profile_id, Some(url)).await
  }
}

pub async fn launch_browser_profile(
  profile_id: String,
  url: Option<String>,
) -> Result<BrowserProfile, String> {
  BrowserRunner::instance()
    .launch_browser(&profile_id, url)
    .await
    .map_err(|e| format!("Failed to launch browser: {e}"))
}

pub async fn kill_browser_profile(profile_id: String) -> Result<BrowserProfile, String> {
  BrowserRunner::instance()
    .kill_browser_process(&profile_id)
    .await
    .map_err(|e| format!("Failed to kill browser: {e}"))
}

pub async fn check_browser_status(profile_id: String) -> Result<bool, String> {
  BrowserRunner::instance()
    .check_browser_status(&profile_id)
    .await
    .map_err(|e| format!("Failed to check browser status: {e}"))
}

/// Hands an externally opened link to connected clients so one of them can
/// pick the profile to open it in.
pub async fn handle_url_open(url: String) -> Result<(), String> {
  let parsed = validate_open_url(&url)?;
  events::emit(
    events::names::URL_OPEN_REQUEST,
    UrlOpenRequest {
      url: parsed.to_string(),
    },
  )
}

pub async fn open_url_with_profile(profile_id: String, url: String) -> Result<BrowserProfile, String> {
  BrowserRunner::instance()
    .open_url_with_profile(&profile_id, &url)
    .await
    .map_err(|e| format!("Failed to open URL: {e}"))
}

lazy_static::lazy_static! {
  static ref BROWSER_RUNNER: BrowserRunner = BrowserRunner::new();
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::app_dirs;
  use crate::browser::ProxySettings;
  use crate::profile::CreateProfileRequest;
  use tempfile::TempDir;

  fn create(name: &str, browser: &str) -> BrowserProfile {
    ProfileManager::instance()
      .create_profile(CreateProfileRequest {
        name: name.to_string(),
        browser: browser.to_string(),
        version: "130.0".to_string(),
        ..Default::default()
      })
      .unwrap()
  }

  fn fake_install(browser: &str, version: &str, relative: &str) -> PathBuf {
    let dir = DownloadedBrowsersRegistry::install_dir(browser, version);
    let exe = dir.join(relative);
    std::fs::create_dir_all(exe.parent().unwrap()).unwrap();
    std::fs::write(&exe, b"#!/bin/sh\n").unwrap();
    exe
  }

  #[test]
  fn test_validate_open_url() {
    assert!(validate_open_url("https://example.com/path").is_ok());
    assert!(validate_open_url(" http://example.com ").is_ok());
    assert!(validate_open_url("javascript:alert(1)").is_err());
    assert!(validate_open_url("not a url").is_err());
  }

  #[tokio::test]
  async fn test_handle_url_open_emits_request() {
    let (recorder, _guard) = events::record_for_test();
    handle_url_open("https://example.com".to_string()).await.unwrap();
    assert!(handle_url_open("ftp://example.com".to_string()).await.is_err());

    let requests = recorder.events_named(events::names::URL_OPEN_REQUEST);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["url"], "https://example.com/");
  }

  #[test]
  fn test_is_process_alive() {
    assert!(is_process_alive(std::process::id()));
    assert!(!is_process_alive(u32::MAX - 1));
  }

  #[cfg(target_os = "linux")]
  #[test]
  fn test_unreaped_child_counts_as_dead() {
    let mut child = std::process::Command::new("/bin/sh")
      .args(["-c", "exit 0"])
      .spawn()
      .unwrap();
    let pid = child.id();
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while is_process_alive(pid) && std::time::Instant::now() < deadline {
      std::thread::sleep(std::time::Duration::from_millis(50));
    }
    assert!(!is_process_alive(pid));
    child.wait().unwrap();
  }

  #[cfg(target_os = "linux")]
  #[tokio::test]
  async fn test_exited_browser_is_reaped_and_profile_deletable() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = TempDir::new().unwrap();
    let _dirs = app_dirs::isolate_for_test(tmp.path());
    let (recorder, _guard) = events::record_for_test();
    let exe = fake_install("chromium", "130.0", "chrome-linux/chrome");
    std::fs::write(&exe, "#!/bin/sh\nexit 0\n").unwrap();
    std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

    let profile = create("Short lived", "chromium");
    let id = profile.id.to_string();
    let launched = BrowserRunner::instance()
      .launch_browser(&id, None)
      .await
      .unwrap();
    assert!(launched.process_id.is_some());

    let manager = ProfileManager::instance();
    for _ in 0..50 {
      if manager.get_profile(&id).unwrap().process_id.is_none() {
        break;
      }
      tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    assert_eq!(manager.get_profile(&id).unwrap().process_id, None);
    assert!(!BrowserRunner::instance()
      .check_browser_status(&id)
      .await
      .unwrap());

    let running: Vec<bool> = recorder
      .events_named(events::names::PROFILE_RUNNING_CHANGED)
      .iter()
      .filter_map(|e| e["is_running"].as_bool())
      .collect();
    assert_eq!(running, vec![true, false]);

    manager.delete_profile(&id).unwrap();
  }

  #[test]
  fn test_prepare_launch_requires_installed_browser() {
    let tmp = TempDir::new().unwrap();
    let _dirs = app_dirs::isolate_for_test(tmp.path());
    let profile = create("Missing", "firefox");

    let err = BrowserRunner::instance()
      .prepare_launch(&profile, None)
      .err()
      .unwrap();
    assert!(err.to_string().contains("not installed"));
  }

  #[cfg(target_os = "linux")]
  #[test]
  fn test_prepare_launch_chromium_carries_proxy_and_url() {
    let tmp = TempDir::new().unwrap();
    let _dirs = app_dirs::isolate_for_test(tmp.path());
    let exe = fake_install("chromium", "130.0", "chrome-linux/chrome");
    let proxy = ProxyManager::instance()
      .create_stored_proxy(
        "Upstream",
        ProxySettings {
          proxy_type: "http".to_string(),
          host: "10.1.1.1".to_string(),
          port: 3128,
          username: Some("u".to_string()),
          password: Some("p".to_string()),
        },
      )
      .unwrap();
    let profile = create("Chromed", "chromium");
    let profile = ProfileManager::instance()
      .update_profile_proxy(&profile.id.to_string(), Some(proxy.id))
      .unwrap();

    let launch = BrowserRunner::instance()
      .prepare_launch(&profile, Some("https://example.com".to_string()))
      .unwrap();
    assert_eq!(launch.executable, exe);
    assert!(launch.args[0].starts_with("--user-data-dir="));
    assert!(launch
      .args
      .contains(&"--proxy-server=http://10.1.1.1:3128".to_string()));
    assert_eq!(launch.args.last().unwrap(), "https://example.com");
  }

  #[cfg(target_os = "linux")]
  #[test]
  fn test_prepare_launch_firefox_writes_prefs() {
    let tmp = TempDir::new().unwrap();
    let _dirs = app_dirs::isolate_for_test(tmp.path());
    fake_install("firefox", "130.0", "firefox/firefox");
    let profile = create("Foxy", "firefox");

    let launch = BrowserRunner::instance()
      .prepare_launch(&profile, None)
      .unwrap();
    assert_eq!(launch.args[0], "-profile");
    assert!(launch.args.contains(&"-no-remote".to_string()));
    let data_path = profile.get_profile_data_path(&ProfileManager::instance().get_profiles_dir());
    assert!(data_path.join("user.js").exists());
  }

  #[tokio::test]
  async fn test_stale_pid_is_cleared_on_status_check() {
    let tmp = TempDir::new().unwrap();
    let _dirs = app_dirs::isolate_for_test(tmp.path());
    let profile = create("Stale", "zen");
    let id = profile.id.to_string();
    ProfileManager::instance()
      .update_process_info(&id, Some(u32::MAX - 1), Some(1))
      .unwrap();
    let (recorder, _guard) = events::record_for_test();

    assert!(!BrowserRunner::instance().check_browser_status(&id).await.unwrap());
    assert!(ProfileManager::instance()
      .get_profile(&id)
      .unwrap()
      .process_id
      .is_none());
    let changes = recorder.events_named(events::names::PROFILE_RUNNING_CHANGED);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0]["is_running"], false);
  }

  #[tokio::test]
  async fn test_kill_without_process_clears_state() {
    let tmp = TempDir::new().unwrap();
    let _dirs = app_dirs::isolate_for_test(tmp.path());
    let profile = create("Idle", "brave");
    let id = profile.id.to_string();
    ProfileManager::instance()
      .update_process_info(&id, Some(u32::MAX - 1), None)
      .unwrap();

    let updated = BrowserRunner::instance()
      .kill_browser_process(&id)
      .await
      .unwrap();
    assert!(!updated.is_running());
  }
}
