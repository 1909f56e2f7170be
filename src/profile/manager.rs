use crate::api_client::is_browser_version_nightly;
use crate::browser::{BrowserType, ProxySettings};
use crate::downloaded_browsers_registry::DownloadedBrowsersRegistry;
use crate::events;
use crate::fingerprint_config::{CamoufoxConfig, WayfernConfig};
use crate::group_manager::{GroupManager, DEFAULT_GROUP_ID};
use crate::profile::types::{BrowserProfile, CreateProfileRequest};
use crate::proxy_manager::ProxyManager;
use crate::validation::{ensure_unique_name, ValidationError};
use std::fs::{self, create_dir_all};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

type ManagerResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub struct ProfileManager {
  write_lock: Mutex<()>,
}

impl ProfileManager {
  fn new() -> Self {
    Self {
      write_lock: Mutex::new(()),
    }
  }

  pub fn instance() -> &'static ProfileManager {
    &PROFILE_MANAGER
  }

  pub fn get_profiles_dir(&self) -> PathBuf {
    crate::app_dirs::profiles_dir()
  }

  fn lock(&self) -> ManagerResult<std::sync::MutexGuard<'_, ()>> {
    self
      .write_lock
      .lock()
      .map_err(|_| "Profile store lock poisoned".into())
  }

  pub fn save_profile(&self, profile: &BrowserProfile) -> ManagerResult<()> {
    let profile_uuid_dir = profile.get_profile_root(&self.get_profiles_dir());
    create_dir_all(&profile_uuid_dir)?;
    fs::write(
      profile_uuid_dir.join("metadata.json"),
      serde_json::to_string_pretty(profile)?,
    )?;

    // Tag suggestions follow every save
    if let Err(e) = crate::tag_manager::TagManager::instance()
      .rebuild_from_profiles(&self.list_profiles().unwrap_or_default())
    {
      log::warn!("Failed to rebuild tag index: {e}");
    }
    Ok(())
  }

  pub fn list_profiles(&self) -> ManagerResult<Vec<BrowserProfile>> {
    let profiles_dir = self.get_profiles_dir();
    if !profiles_dir.exists() {
      return Ok(vec![]);
    }

    let mut profiles = Vec::new();
    for entry in fs::read_dir(profiles_dir)? {
      let metadata_file = entry?.path().join("metadata.json");
      if !metadata_file.exists() {
        continue;
      }
      let content = fs::read_to_string(&metadata_file)?;
      match serde_json::from_str::<BrowserProfile>(&content) {
        Ok(profile) => profiles.push(profile),
        Err(e) => log::warn!("Skipping unreadable profile {}: {e}", metadata_file.display()),
      }
    }
    profiles.sort_by_key(|p| p.name.to_lowercase());
    Ok(profiles)
  }

  pub fn get_profile(&self, profile_id: &str) -> ManagerResult<BrowserProfile> {
    let profile_uuid =
      uuid::Uuid::parse_str(profile_id).map_err(|_| format!("Invalid profile ID: {profile_id}"))?;
    let metadata_file = self
      .get_profiles_dir()
      .join(profile_uuid.to_string())
      .join("metadata.json");
    if !metadata_file.exists() {
      return Err(format!("Profile with ID '{profile_id}' not found").into());
    }
    Ok(serde_json::from_str(&fs::read_to_string(metadata_file)?)?)
  }

  /// Loads, mutates and saves one profile under the write lock, then emits
  /// `profile-updated` with the result.
  fn modify_profile<F>(&self, profile_id: &str, f: F) -> ManagerResult<BrowserProfile>
  where
    F: FnOnce(&mut BrowserProfile) -> ManagerResult<()>,
  {
    let profile = {
      let _guard = self.lock()?;
      let mut profile = self.get_profile(profile_id)?;
      f(&mut profile)?;
      self.save_profile(&profile)?;
      profile
    };
    emit_profile_updated(&profile);
    Ok(profile)
  }

  fn ensure_proxy_allowed(&self, browser: &str, proxy_id: &str) -> ManagerResult<()> {
    let browser_type: BrowserType = browser.parse()?;
    if !browser_type.supports_proxy() {
      return Err(ValidationError::ProxyNotSupported(browser.to_string()).into());
    }
    if ProxyManager::instance().get_stored_proxy(proxy_id).is_none() {
      return Err(format!("Proxy with id '{proxy_id}' not found").into());
    }
    Ok(())
  }

  fn normalize_group_id(group_id: Option<String>) -> ManagerResult<Option<String>> {
    match group_id {
      None => Ok(None),
      Some(id) if id == DEFAULT_GROUP_ID => Ok(None),
      Some(id) => {
        if !GroupManager::instance().group_exists(&id) {
          return Err(format!("Group with id '{id}' not found").into());
        }
        Ok(Some(id))
      }
    }
  }

  pub fn create_profile(&self, request: CreateProfileRequest) -> ManagerResult<BrowserProfile> {
    let browser_type: BrowserType = request.browser.parse()?;
    if request.version.trim().is_empty() {
      return Err("Version cannot be empty".into());
    }
    if let Some(config) = &request.camoufox_config {
      config.validate()?;
    }
    if let Some(config) = &request.wayfern_config {
      config.validate()?;
    }

    let proxy_id = match request.proxy_id {
      Some(_) if !browser_type.supports_proxy() => {
        log::info!("Ignoring proxy for {} profile '{}'", browser_type, request.name);
        None
      }
      Some(id) => {
        self.ensure_proxy_allowed(browser_type.as_str(), &id)?;
        Some(id)
      }
      None => None,
    };
    let group_id = Self::normalize_group_id(request.group_id)?;

    let release_type = request.release_type.unwrap_or_else(|| {
      if is_browser_version_nightly(browser_type.as_str(), &request.version, None) {
        "nightly".to_string()
      } else {
        "stable".to_string()
      }
    });

    let profile = {
      let _guard = self.lock()?;
      let existing = self.list_profiles()?;
      ensure_unique_name(
        "Profile",
        &request.name,
        existing.iter().map(|p| p.name.as_str()),
      )?;

      let profile = BrowserProfile {
        id: uuid::Uuid::new_v4(),
        name: request.name.trim().to_string(),
        browser: browser_type.as_str().to_string(),
        version: request.version,
        release_type,
        proxy_id,
        process_id: None,
        last_launch: None,
        camoufox_config: request.camoufox_config,
        wayfern_config: request.wayfern_config,
        group_id,
        tags: crate::tag_manager::normalize_tags(request.tags),
        note: None,
        extension_group_id: None,
      };

      let profile_data_path = profile.get_profile_data_path(&self.get_profiles_dir());
      create_dir_all(&profile_data_path)?;
      self.save_profile(&profile)?;
      self.sync_proxy_preferences(&profile)?;
      profile
    };

    log::info!(
      "Created {} profile '{}' ({})",
      profile.browser,
      profile.name,
      profile.id
    );
    emit_profiles_changed();
    Ok(profile)
  }

  pub fn rename_profile(&self, profile_id: &str, new_name: &str) -> ManagerResult<BrowserProfile> {
    let profile = self.modify_profile(profile_id, |profile| {
      let existing = self.list_profiles()?;
      ensure_unique_name(
        "Profile",
        new_name,
        existing
          .iter()
          .filter(|p| p.id != profile.id)
          .map(|p| p.name.as_str()),
      )?;
      profile.name = new_name.trim().to_string();
      Ok(())
    })?;
    emit_profiles_changed();
    Ok(profile)
  }

  /// Copies the profile, data directory included, under a fresh id. Without
  /// an explicit name the copy is called "`<name>` (Copy)", numbered when
  /// that is already taken.
  pub fn clone_profile(
    &self,
    profile_id: &str,
    new_name: Option<String>,
  ) -> ManagerResult<BrowserProfile> {
    let clone = {
      let _guard = self.lock()?;
      let source = self.get_profile(profile_id)?;
      let existing = self.list_profiles()?;
      let taken = |name: &str| {
        existing
          .iter()
          .any(|p| p.name.trim().to_lowercase() == name.trim().to_lowercase())
      };

      let name = match new_name.filter(|n| !n.trim().is_empty()) {
        Some(name) => {
          ensure_unique_name("Profile", &name, existing.iter().map(|p| p.name.as_str()))?;
          name.trim().to_string()
        }
        None => {
          let base = format!("{} (Copy)", source.name);
          let mut candidate = base.clone();
          let mut n = 2;
          while taken(&candidate) {
            candidate = format!("{base} {n}");
            n += 1;
          }
          candidate
        }
      };

      let clone = BrowserProfile {
        id: uuid::Uuid::new_v4(),
        name,
        process_id: None,
        last_launch: None,
        ..source.clone()
      };

      let profiles_dir = self.get_profiles_dir();
      let source_data = source.get_profile_data_path(&profiles_dir);
      let clone_data = clone.get_profile_data_path(&profiles_dir);
      if source_data.exists() {
        copy_directory_recursive(&source_data, &clone_data)?;
      } else {
        create_dir_all(&clone_data)?;
      }
      self.save_profile(&clone)?;
      // user.js points at the PAC file of the source profile
      self.sync_proxy_preferences(&clone)?;
      clone
    };

    log::info!("Cloned profile {profile_id} as '{}' ({})", clone.name, clone.id);
    emit_profiles_changed();
    emit_profile_updated(&clone);
    Ok(clone)
  }

  /// Refused while the browser is still alive. A recorded pid whose process
  /// is gone does not block deletion.
  pub fn delete_profile(&self, profile_id: &str) -> ManagerResult<()> {
    {
      let _guard = self.lock()?;
      let profile = self.get_profile(profile_id)?;
      if let Some(pid) = profile.process_id {
        if crate::browser_runner::is_process_alive(pid) {
          return Err(
            "Cannot delete profile while browser is running. Please stop the browser first."
              .into(),
          );
        }
      }

      let profile_uuid_dir = profile.get_profile_root(&self.get_profiles_dir());
      if profile_uuid_dir.exists() {
        fs::remove_dir_all(&profile_uuid_dir)?;
      }
      log::info!("Deleted profile '{}' ({profile_id})", profile.name);
    }

    if let Err(e) = crate::tag_manager::TagManager::instance()
      .rebuild_from_profiles(&self.list_profiles().unwrap_or_default())
    {
      log::warn!("Failed to rebuild tag index: {e}");
    }
    crate::traffic_stats::TrafficStatsManager::instance().remove_profile_stats(profile_id);
    emit_profiles_changed();
    Ok(())
  }

  pub fn update_profile_tags(
    &self,
    profile_id: &str,
    tags: Vec<String>,
  ) -> ManagerResult<BrowserProfile> {
    self.modify_profile(profile_id, |profile| {
      profile.tags = crate::tag_manager::normalize_tags(tags);
      Ok(())
    })
  }

  pub fn update_profile_note(
    &self,
    profile_id: &str,
    note: Option<String>,
  ) -> ManagerResult<BrowserProfile> {
    self.modify_profile(profile_id, |profile| {
      profile.note = note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
      Ok(())
    })
  }

  /// `None` clears the proxy. Tor Browser profiles only accept `None`.
  pub fn update_profile_proxy(
    &self,
    profile_id: &str,
    proxy_id: Option<String>,
  ) -> ManagerResult<BrowserProfile> {
    self.modify_profile(profile_id, |profile| {
      if let Some(id) = &proxy_id {
        self.ensure_proxy_allowed(&profile.browser, id)?;
      }
      profile.proxy_id = proxy_id;
      self.sync_proxy_preferences(profile)
    })
  }

  pub fn update_camoufox_config(
    &self,
    profile_id: &str,
    config: CamoufoxConfig,
  ) -> ManagerResult<BrowserProfile> {
    config.validate()?;
    self.modify_profile(profile_id, |profile| {
      if profile.browser != BrowserType::Camoufox.as_str() {
        return Err(format!("Profile '{}' is not a Camoufox profile", profile.name).into());
      }
      profile.camoufox_config = Some(config);
      Ok(())
    })
  }

  pub fn update_wayfern_config(
    &self,
    profile_id: &str,
    config: WayfernConfig,
  ) -> ManagerResult<BrowserProfile> {
    config.validate()?;
    self.modify_profile(profile_id, |profile| {
      if profile.browser != BrowserType::Wayfern.as_str() {
        return Err(format!("Profile '{}' is not a Wayfern profile", profile.name).into());
      }
      profile.wayfern_config = Some(config);
      Ok(())
    })
  }

  pub fn update_profile_version(
    &self,
    profile_id: &str,
    version: &str,
  ) -> ManagerResult<BrowserProfile> {
    self.modify_profile(profile_id, |profile| {
      if profile.is_running() {
        return Err(
          "Cannot update version while browser is running. Please stop the browser first.".into(),
        );
      }
      if !DownloadedBrowsersRegistry::instance().is_browser_downloaded(&profile.browser, version) {
        return Err(format!("Browser version {version} is not downloaded").into());
      }
      profile.version = version.to_string();
      profile.release_type = if is_browser_version_nightly(&profile.browser, version, None) {
        "nightly".to_string()
      } else {
        "stable".to_string()
      };
      Ok(())
    })
  }

  /// `None` (or the default group id) moves the profiles to the default group.
  pub fn assign_profiles_to_group(
    &self,
    profile_ids: &[String],
    group_id: Option<String>,
  ) -> ManagerResult<Vec<BrowserProfile>> {
    let group_id = Self::normalize_group_id(group_id)?;
    // Resolve every id first so a bad one leaves nothing half-assigned
    for profile_id in profile_ids {
      self.get_profile(profile_id)?;
    }
    profile_ids
      .iter()
      .map(|profile_id| {
        self.modify_profile(profile_id, |profile| {
          profile.group_id = group_id.clone();
          Ok(())
        })
      })
      .collect()
  }

  pub fn assign_extension_group_to_profile(
    &self,
    profile_id: &str,
    extension_group_id: Option<String>,
  ) -> ManagerResult<BrowserProfile> {
    self.modify_profile(profile_id, |profile| {
      if let Some(group_id) = &extension_group_id {
        crate::extension_manager::ExtensionManager::instance()
          .validate_group_compatibility(group_id, &profile.browser)?;
      }
      profile.extension_group_id = extension_group_id;
      Ok(())
    })
  }

  /// Records (or clears) the browser process backing a profile.
  pub fn update_process_info(
    &self,
    profile_id: &str,
    process_id: Option<u32>,
    last_launch: Option<u64>,
  ) -> ManagerResult<BrowserProfile> {
    self.modify_profile(profile_id, |profile| {
      profile.process_id = process_id;
      if last_launch.is_some() {
        profile.last_launch = last_launch;
      }
      Ok(())
    })
  }

  fn clear_matching<P, F>(&self, matches: P, clear: F) -> ManagerResult<usize>
  where
    P: Fn(&BrowserProfile) -> bool,
    F: Fn(&mut BrowserProfile),
  {
    let affected: Vec<String> = self
      .list_profiles()?
      .into_iter()
      .filter(|p| matches(p))
      .map(|p| p.id.to_string())
      .collect();
    for profile_id in &affected {
      self.modify_profile(profile_id, |profile| {
        clear(profile);
        Ok(())
      })?;
    }
    Ok(affected.len())
  }

  pub fn clear_group_assignments(&self, group_id: &str) -> ManagerResult<usize> {
    self.clear_matching(
      |p| p.group_id.as_deref() == Some(group_id),
      |p| p.group_id = None,
    )
  }

  pub fn clear_extension_group_assignments(&self, extension_group_id: &str) -> ManagerResult<usize> {
    self.clear_matching(
      |p| p.extension_group_id.as_deref() == Some(extension_group_id),
      |p| p.extension_group_id = None,
    )
  }

  /// Drops a deleted proxy from every profile and rewrites their prefs.
  pub fn clear_proxy_assignments(&self, proxy_id: &str) -> ManagerResult<usize> {
    let affected: Vec<String> = self
      .list_profiles()?
      .into_iter()
      .filter(|p| p.proxy_id.as_deref() == Some(proxy_id))
      .map(|p| p.id.to_string())
      .collect();
    for profile_id in &affected {
      self.modify_profile(profile_id, |profile| {
        profile.proxy_id = None;
        self.sync_proxy_preferences(profile)
      })?;
    }
    Ok(affected.len())
  }

  /// Rewrites `user.js` and `proxy.pac` of every Firefox-family profile using
  /// `proxy_id` after the stored proxy's settings changed.
  pub fn resync_proxy_users(&self, proxy_id: &str) -> ManagerResult<usize> {
    let mut synced = 0;
    for profile in self
      .list_profiles()?
      .into_iter()
      .filter(|p| p.proxy_id.as_deref() == Some(proxy_id))
    {
      let is_firefox = profile
        .browser
        .parse::<BrowserType>()
        .map(|b| b.is_firefox_family())
        .unwrap_or(false);
      if is_firefox {
        self.sync_proxy_preferences(&profile)?;
        synced += 1;
      }
    }
    Ok(synced)
  }

  /// Firefox-family profiles carry their proxy in `user.js`; Chromium-family
  /// profiles get it on the command line at launch.
  pub fn sync_proxy_preferences(&self, profile: &BrowserProfile) -> ManagerResult<()> {
    let browser_type: BrowserType = profile.browser.parse()?;
    if !browser_type.is_firefox_family() {
      return Ok(());
    }
    let profile_data_path = profile.get_profile_data_path(&self.get_profiles_dir());
    create_dir_all(&profile_data_path)?;

    let proxy = profile
      .proxy_id
      .as_deref()
      .and_then(|id| ProxyManager::instance().get_proxy_settings_by_id(id));
    match proxy {
      Some(proxy) => self.apply_proxy_settings_to_profile(&profile_data_path, &proxy),
      None => self.disable_proxy_settings_in_profile(&profile_data_path),
    }
  }

  fn get_common_firefox_preferences(&self) -> Vec<String> {
    [
      "user_pref(\"browser.shell.checkDefaultBrowser\", false);",
      "user_pref(\"browser.shell.skipDefaultBrowserCheckOnFirstRun\", true);",
      "user_pref(\"browser.aboutwelcome.enabled\", false);",
      "user_pref(\"browser.startup.homepage_override.mstone\", \"ignore\");",
      "user_pref(\"startup.homepage_welcome_url\", \"\");",
      "user_pref(\"startup.homepage_override_url\", \"\");",
      // Versions are managed here, not by the browser
      "user_pref(\"app.update.enabled\", false);",
      "user_pref(\"app.update.auto\", false);",
      "user_pref(\"app.update.service.enabled\", false);",
      "user_pref(\"app.update.url\", \"\");",
      "user_pref(\"browser.startup.upgradeDialog.enabled\", false);",
      "user_pref(\"zen.welcome-screen.seen\", true);",
      "user_pref(\"zen.updates.enabled\", false);",
      "user_pref(\"extensions.autoDisableScopes\", 0);",
      "user_pref(\"datareporting.policy.dataSubmissionPolicyBypassNotification\", true);",
      "user_pref(\"toolkit.telemetry.reportingpolicy.firstRun\", false);",
      "user_pref(\"browser.warnOnQuit\", false);",
      "user_pref(\"browser.tabs.warnOnClose\", false);",
    ]
    .iter()
    .map(|pref| pref.to_string())
    .collect()
  }

  fn pac_url(pac_path: &Path) -> String {
    let absolute = pac_path
      .canonicalize()
      .unwrap_or_else(|_| pac_path.to_path_buf());
    url::Url::from_file_path(&absolute)
      .map(|url| url.to_string())
      .unwrap_or_else(|_| format!("file://{}", absolute.to_string_lossy()))
  }

  /// Writes `proxy.pac` next to the data dir and points `user.js` at it.
  pub fn apply_proxy_settings_to_profile(
    &self,
    profile_data_path: &Path,
    proxy: &ProxySettings,
  ) -> ManagerResult<()> {
    let uuid_dir = profile_data_path
      .parent()
      .ok_or("Invalid profile path - cannot find UUID directory")?;

    // prefs.js caches old proxy settings and would win over user.js
    let prefs_js_path = profile_data_path.join("prefs.js");
    if prefs_js_path.exists() {
      let _ = fs::remove_file(&prefs_js_path);
    }

    let directive = match proxy.proxy_type.to_lowercase().as_str() {
      "http" => "PROXY",
      "https" => "HTTPS",
      "socks4" => "SOCKS4",
      "socks5" => "SOCKS5",
      other => return Err(ValidationError::UnsupportedProxyType(other.to_string()).into()),
    };
    let pac_content = format!(
      "function FindProxyForURL(url, host) {{\n  return \"{directive} {}:{}\";\n}}\n",
      proxy.host, proxy.port
    );
    let pac_path = uuid_dir.join("proxy.pac");
    fs::write(&pac_path, pac_content)?;

    let mut preferences = self.get_common_firefox_preferences();
    preferences.extend([
      "user_pref(\"network.proxy.type\", 2);".to_string(),
      format!(
        "user_pref(\"network.proxy.autoconfig_url\", \"{}\");",
        Self::pac_url(&pac_path)
      ),
      "user_pref(\"network.proxy.failover_direct\", false);".to_string(),
      "user_pref(\"network.proxy.socks_remote_dns\", true);".to_string(),
      "user_pref(\"network.proxy.no_proxies_on\", \"\");".to_string(),
      "user_pref(\"signon.autologin.proxy\", true);".to_string(),
    ]);
    fs::write(profile_data_path.join("user.js"), preferences.join("\n"))?;
    log::info!(
      "Applied {} proxy {}:{} to {}",
      proxy.proxy_type,
      proxy.host,
      proxy.port,
      profile_data_path.display()
    );
    Ok(())
  }

  pub fn disable_proxy_settings_in_profile(&self, profile_data_path: &Path) -> ManagerResult<()> {
    let uuid_dir = profile_data_path
      .parent()
      .ok_or("Invalid profile path - cannot find UUID directory")?;
    let pac_path = uuid_dir.join("proxy.pac");
    fs::write(
      &pac_path,
      "function FindProxyForURL(url, host) { return 'DIRECT'; }",
    )?;

    let mut preferences = self.get_common_firefox_preferences();
    preferences.extend([
      "user_pref(\"network.proxy.type\", 0);".to_string(),
      "user_pref(\"network.proxy.failover_direct\", true);".to_string(),
      format!(
        "user_pref(\"network.proxy.autoconfig_url\", \"{}\");",
        Self::pac_url(&pac_path)
      ),
    ]);
    fs::write(profile_data_path.join("user.js"), preferences.join("\n"))?;
    Ok(())
  }
}

fn copy_directory_recursive(source: &Path, destination: &Path) -> ManagerResult<()> {
  create_dir_all(destination)?;
  for entry in fs::read_dir(source)? {
    let entry = entry?;
    let source_path = entry.path();
    let dest_path = destination.join(entry.file_name());
    if source_path.is_dir() {
      copy_directory_recursive(&source_path, &dest_path)?;
    } else {
      fs::copy(&source_path, &dest_path)?;
    }
  }
  Ok(())
}

fn emit_profile_updated(profile: &BrowserProfile) {
  if let Err(e) = events::emit(events::names::PROFILE_UPDATED, profile) {
    log::warn!("Failed to emit profile-updated event: {e}");
  }
}

fn emit_profiles_changed() {
  if let Err(e) = events::emit_empty(events::names::PROFILES_CHANGED) {
    log::warn!("Failed to emit profiles-changed event: {e}");
  }
}

pub async fn list_browser_profiles() -> Result<Vec<BrowserProfile>, String> {
  ProfileManager::instance()
    .list_profiles()
    .map_err(|e| format!("Failed to list profiles: {e}"))
}

pub async fn create_browser_profile(request: CreateProfileRequest) -> Result<BrowserProfile, String> {
  ProfileManager::instance()
    .create_profile(request)
    .map_err(|e| format!("Failed to create profile: {e}"))
}

pub async fn rename_profile(profile_id: String, new_name: String) -> Result<BrowserProfile, String> {
  ProfileManager::instance()
    .rename_profile(&profile_id, &new_name)
    .map_err(|e| format!("Failed to rename profile: {e}"))
}

pub async fn clone_profile(
  profile_id: String,
  new_name: Option<String>,
) -> Result<BrowserProfile, String> {
  ProfileManager::instance()
    .clone_profile(&profile_id, new_name)
    .map_err(|e| format!("Failed to clone profile: {e}"))
}

pub async fn delete_profile(profile_id: String) -> Result<(), String> {
  ProfileManager::instance()
    .delete_profile(&profile_id)
    .map_err(|e| format!("Failed to delete profile: {e}"))
}

pub async fn update_profile_tags(
  profile_id: String,
  tags: Vec<String>,
) -> Result<BrowserProfile, String> {
  ProfileManager::instance()
    .update_profile_tags(&profile_id, tags)
    .map_err(|e| format!("Failed to update profile tags: {e}"))
}

pub async fn update_profile_note(
  profile_id: String,
  note: Option<String>,
) -> Result<BrowserProfile, String> {
  ProfileManager::instance()
    .update_profile_note(&profile_id, note)
    .map_err(|e| format!("Failed to update profile note: {e}"))
}

pub async fn update_profile_proxy(
  profile_id: String,
  proxy_id: Option<String>,
) -> Result<BrowserProfile, String> {
  ProfileManager::instance()
    .update_profile_proxy(&profile_id, proxy_id)
    .map_err(|e| format!("Failed to update profile proxy: {e}"))
}

pub async fn update_camoufox_config(
  profile_id: String,
  config: CamoufoxConfig,
) -> Result<BrowserProfile, String> {
  ProfileManager::instance()
    .update_camoufox_config(&profile_id, config)
    .map_err(|e| format!("Failed to update Camoufox config: {e}"))
}

pub async fn update_wayfern_config(
  profile_id: String,
  config: WayfernConfig,
) -> Result<BrowserProfile, String> {
  ProfileManager::instance()
    .update_wayfern_config(&profile_id, config)
    .map_err(|e| format!("Failed to update Wayfern config: {e}"))
}

pub async fn update_profile_version(
  profile_id: String,
  version: String,
) -> Result<BrowserProfile, String> {
  ProfileManager::instance()
    .update_profile_version(&profile_id, &version)
    .map_err(|e| format!("Failed to update profile version: {e}"))
}

pub async fn assign_profiles_to_group(
  profile_ids: Vec<String>,
  group_id: Option<String>,
) -> Result<Vec<BrowserProfile>, String> {
  ProfileManager::instance()
    .assign_profiles_to_group(&profile_ids, group_id)
    .map_err(|e| format!("Failed to assign profiles to group: {e}"))
}

pub async fn assign_extension_group_to_profile(
  profile_id: String,
  extension_group_id: Option<String>,
) -> Result<BrowserProfile, String> {
  ProfileManager::instance()
    .assign_extension_group_to_profile(&profile_id, extension_group_id)
    .map_err(|e| format!("Failed to assign extension group: {e}"))
}

lazy_static::lazy_static! {
  static ref PROFILE_MANAGER: ProfileManager = ProfileManager::new();
}
