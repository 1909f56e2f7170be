use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::browser::ProxySettings;
use crate::events;
use crate::ip_utils;
use crate::validation::{
  ensure_unique_name, validate_proxy_settings, validate_storage_id, ValidationError,
  SUPPORTED_PROXY_TYPES,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredProxy {
  pub id: String,
  pub name: String,
  pub proxy_settings: ProxySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxyCheckResult {
  pub ip: String,
  pub city: Option<String>,
  pub country: Option<String>,
  pub country_code: Option<String>,
  pub timestamp: u64,
  pub is_valid: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProxyImportResult {
  pub imported: usize,
  pub skipped: usize,
  pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProxyExportFormat {
  Json,
  Txt,
}

impl FromStr for ProxyExportFormat {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "json" => Ok(Self::Json),
      "txt" => Ok(Self::Txt),
      other => Err(format!("Unsupported export format: {other}")),
    }
  }
}

fn now_secs() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}

/// Same upstream, ignoring the password and the display name.
fn same_endpoint(a: &ProxySettings, b: &ProxySettings) -> bool {
  a.proxy_type.eq_ignore_ascii_case(&b.proxy_type)
    && a.host.eq_ignore_ascii_case(&b.host)
    && a.port == b.port
    && a.username == b.username
}

/// Parses one line of a proxy list: `type://[user:pass@]host:port` or
/// `host:port[:user:pass]` (assumed http).
pub fn parse_proxy_line(line: &str) -> Result<ProxySettings, String> {
  let line = line.trim();
  let settings = if line.contains("://") {
    let parsed = url::Url::parse(line).map_err(|e| format!("Invalid proxy URL '{line}': {e}"))?;
    let host = parsed
      .host_str()
      .ok_or_else(|| format!("Missing host in '{line}'"))?
      .trim_matches(|c| c == '[' || c == ']')
      .to_string();
    let port = parsed
      .port_or_known_default()
      .ok_or_else(|| format!("Missing port in '{line}'"))?;
    let decode = |value: &str| {
      // '+' is literal in userinfo, unlike in form encoding
      url::form_urlencoded::parse(format!("v={}", value.replace('+', "%2B")).as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_else(|| value.to_string())
    };
    ProxySettings {
      proxy_type: parsed.scheme().to_lowercase(),
      host,
      port,
      username: Some(parsed.username())
        .filter(|u| !u.is_empty())
        .map(decode),
      password: parsed.password().map(decode),
    }
  } else {
    let parts: Vec<&str> = line.split(':').collect();
    let (host, port, username, password) = match parts.as_slice() {
      [host, port] => (*host, *port, None, None),
      [host, port, user, pass] => (*host, *port, Some(user.to_string()), Some(pass.to_string())),
      _ => return Err(format!("Unrecognised proxy line '{line}'")),
    };
    ProxySettings {
      proxy_type: "http".to_string(),
      host: host.to_string(),
      port: port
        .parse()
        .map_err(|_| format!("Invalid port in '{line}'"))?,
      username,
      password,
    }
  };

  if !SUPPORTED_PROXY_TYPES.contains(&settings.proxy_type.as_str()) {
    return Err(format!("Unsupported proxy type '{}'", settings.proxy_type));
  }
  validate_proxy_settings(&settings).map_err(|e| e.to_string())?;
  Ok(settings)
}

/// Stored proxies, one JSON file per proxy under `proxies/`.
pub struct ProxyManager {
  write_lock: Mutex<()>,
}

impl ProxyManager {
  fn new() -> Self {
    Self {
      write_lock: Mutex::new(()),
    }
  }

  pub fn instance() -> &'static ProxyManager {
    &PROXY_MANAGER
  }

  fn storage_dir() -> PathBuf {
    crate::app_dirs::proxies_dir()
  }

  fn proxy_file(id: &str) -> Result<PathBuf, ValidationError> {
    validate_storage_id("proxy", id)?;
    Ok(Self::storage_dir().join(format!("{id}.json")))
  }

  fn check_file(id: &str) -> Result<PathBuf, ValidationError> {
    validate_storage_id("proxy", id)?;
    Ok(
      crate::app_dirs::data_subdir()
        .join("proxy_checks")
        .join(format!("{id}.json")),
    )
  }

  fn save_proxy(&self, proxy: &StoredProxy) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let file = Self::proxy_file(&proxy.id)?;
    fs::create_dir_all(Self::storage_dir())?;
    fs::write(file, serde_json::to_string_pretty(proxy)?)?;
    Ok(())
  }

  pub fn get_stored_proxies(&self) -> Vec<StoredProxy> {
    let Ok(entries) = fs::read_dir(Self::storage_dir()) else {
      return Vec::new();
    };
    let mut proxies: Vec<StoredProxy> = entries
      .filter_map(Result::ok)
      .map(|entry| entry.path())
      .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
      .filter_map(|path| {
        let content = fs::read_to_string(&path).ok()?;
        serde_json::from_str(&content)
          .map_err(|e| log::warn!("Skipping unreadable proxy {}: {e}", path.display()))
          .ok()
      })
      .collect();
    proxies.sort_by_key(|p| p.name.to_lowercase());
    proxies
  }

  pub fn get_stored_proxy(&self, id: &str) -> Option<StoredProxy> {
    let content = fs::read_to_string(Self::proxy_file(id).ok()?).ok()?;
    serde_json::from_str(&content).ok()
  }

  pub fn get_proxy_settings_by_id(&self, id: &str) -> Option<ProxySettings> {
    self.get_stored_proxy(id).map(|p| p.proxy_settings)
  }

  pub fn create_stored_proxy(
    &self,
    name: &str,
    proxy_settings: ProxySettings,
  ) -> Result<StoredProxy, Box<dyn std::error::Error + Send + Sync>> {
    let _guard = self.write_lock.lock().map_err(|_| "Proxy store lock poisoned")?;
    validate_proxy_settings(&proxy_settings)?;
    let existing = self.get_stored_proxies();
    ensure_unique_name("Proxy", name, existing.iter().map(|p| p.name.as_str()))?;

    let proxy = StoredProxy {
      id: uuid::Uuid::new_v4().to_string(),
      name: name.trim().to_string(),
      proxy_settings: ProxySettings {
        proxy_type: proxy_settings.proxy_type.to_lowercase(),
        ..proxy_settings
      },
    };
    self.save_proxy(&proxy)?;
    log::info!("Created stored proxy '{}' ({})", proxy.name, proxy.id);
    Ok(proxy)
  }

  pub fn update_stored_proxy(
    &self,
    id: &str,
    name: Option<String>,
    proxy_settings: Option<ProxySettings>,
  ) -> Result<StoredProxy, Box<dyn std::error::Error + Send + Sync>> {
    let check_file = Self::check_file(id)?;
    let _guard = self.write_lock.lock().map_err(|_| "Proxy store lock poisoned")?;
    let mut proxy = self
      .get_stored_proxy(id)
      .ok_or_else(|| format!("Proxy with id '{id}' not found"))?;

    if let Some(name) = name {
      let existing = self.get_stored_proxies();
      ensure_unique_name(
        "Proxy",
        &name,
        existing
          .iter()
          .filter(|p| p.id != id)
          .map(|p| p.name.as_str()),
      )?;
      proxy.name = name.trim().to_string();
    }
    if let Some(settings) = proxy_settings {
      validate_proxy_settings(&settings)?;
      proxy.proxy_settings = ProxySettings {
        proxy_type: settings.proxy_type.to_lowercase(),
        ..settings
      };
      // The old check no longer describes this upstream
      let _ = fs::remove_file(&check_file);
    }

    self.save_proxy(&proxy)?;
    Ok(proxy)
  }

  pub fn delete_stored_proxy(&self, id: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let file = Self::proxy_file(id)?;
    let check_file = Self::check_file(id)?;
    let _guard = self.write_lock.lock().map_err(|_| "Proxy store lock poisoned")?;
    if !file.exists() {
      return Err(format!("Proxy with id '{id}' not found").into());
    }
    fs::remove_file(file)?;
    let _ = fs::remove_file(check_file);
    Ok(())
  }

  pub fn get_cached_check(&self, id: &str) -> Option<ProxyCheckResult> {
    let content = fs::read_to_string(Self::check_file(id).ok()?).ok()?;
    serde_json::from_str(&content).ok()
  }

  fn save_check(&self, id: &str, result: &ProxyCheckResult) {
    let write = || -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
      let path = Self::check_file(id)?;
      if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
      }
      fs::write(&path, serde_json::to_string_pretty(result)?)?;
      Ok(())
    };
    if let Err(e) = write() {
      log::warn!("Failed to cache proxy check for {id}: {e}");
    }
  }

  /// Fetches the public IP through `proxy_settings` and geolocates it when
  /// the GeoIP database is present. Failed checks are cached as invalid.
  pub async fn check_proxy(
    &self,
    proxy_id: &str,
    proxy_settings: &ProxySettings,
    endpoints: &[&str],
  ) -> Result<ProxyCheckResult, Box<dyn std::error::Error + Send + Sync>> {
    validate_storage_id("proxy", proxy_id)?;
    validate_proxy_settings(proxy_settings)?;
    let proxy_url = proxy_settings.to_url()?;

    match ip_utils::fetch_public_ip_from(endpoints, Some(&proxy_url), Duration::from_secs(10)).await
    {
      Ok(ip) => {
        let location = crate::geoip_downloader::lookup_ip(&ip)
          .unwrap_or_else(|e| {
            log::warn!("GeoIP lookup for {ip} failed: {e}");
            None
          })
          .unwrap_or_default();
        let result = ProxyCheckResult {
          ip,
          city: location.city,
          country: location.country,
          country_code: location.country_code,
          timestamp: now_secs(),
          is_valid: true,
        };
        self.save_check(proxy_id, &result);
        Ok(result)
      }
      Err(e) => {
        self.save_check(
          proxy_id,
          &ProxyCheckResult {
            ip: String::new(),
            city: None,
            country: None,
            country_code: None,
            timestamp: now_secs(),
            is_valid: false,
          },
        );
        Err(format!("Proxy check failed: {e}").into())
      }
    }
  }

  pub fn export_proxies(
    &self,
    format: ProxyExportFormat,
  ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let proxies = self.get_stored_proxies();
    match format {
      ProxyExportFormat::Json => Ok(serde_json::to_string_pretty(&proxies)?),
      ProxyExportFormat::Txt => {
        let lines = proxies
          .iter()
          .map(|p| p.proxy_settings.to_url())
          .collect::<Result<Vec<_>, _>>()?;
        Ok(lines.join("\n"))
      }
    }
  }

  /// Imports a txt proxy list, or the JSON produced by [`Self::export_proxies`].
  /// Entries matching an existing upstream are skipped.
  pub fn import_proxies(
    &self,
    content: &str,
  ) -> Result<ProxyImportResult, Box<dyn std::error::Error + Send + Sync>> {
    let mut result = ProxyImportResult::default();

    let candidates: Vec<(Option<String>, Result<ProxySettings, String>)> =
      match serde_json::from_str::<Vec<StoredProxy>>(content) {
        Ok(stored) => stored
          .into_iter()
          .map(|p| {
            let settings = validate_proxy_settings(&p.proxy_settings)
              .map(|_| p.proxy_settings)
              .map_err(|e| e.to_string());
            (Some(p.name), settings)
          })
          .collect(),
        Err(_) => content
          .lines()
          .map(str::trim)
          .filter(|line| !line.is_empty() && !line.starts_with('#'))
          .map(|line| (None, parse_proxy_line(line)))
          .collect(),
      };

    for (name, settings) in candidates {
      let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
          result.errors.push(e);
          continue;
        }
      };
      let existing = self.get_stored_proxies();
      if existing
        .iter()
        .any(|p| same_endpoint(&p.proxy_settings, &settings))
      {
        result.skipped += 1;
        continue;
      }

      let base = name.unwrap_or_else(|| format!("{}:{}", settings.host, settings.port));
      let mut candidate = base.clone();
      let mut suffix = 2;
      while ensure_unique_name("Proxy", &candidate, existing.iter().map(|p| p.name.as_str()))
        .is_err()
      {
        candidate = format!("{base} ({suffix})");
        suffix += 1;
      }

      match self.create_stored_proxy(&candidate, settings) {
        Ok(_) => result.imported += 1,
        Err(e) => result.errors.push(e.to_string()),
      }
    }

    Ok(result)
  }
}

pub async fn get_stored_proxies() -> Result<Vec<StoredProxy>, String> {
  Ok(ProxyManager::instance().get_stored_proxies())
}

pub async fn create_stored_proxy(
  name: String,
  proxy_settings: ProxySettings,
) -> Result<StoredProxy, String> {
  let proxy = ProxyManager::instance()
    .create_stored_proxy(&name, proxy_settings)
    .map_err(|e| format!("Failed to create stored proxy: {e}"))?;
  let _ = events::emit_empty(events::names::STORED_PROXIES_CHANGED);
  Ok(proxy)
}

pub async fn update_stored_proxy(
  proxy_id: String,
  name: Option<String>,
  proxy_settings: Option<ProxySettings>,
) -> Result<StoredProxy, String> {
  let settings_changed = proxy_settings.is_some();
  let proxy = ProxyManager::instance()
    .update_stored_proxy(&proxy_id, name, proxy_settings)
    .map_err(|e| format!("Failed to update stored proxy: {e}"))?;
  if settings_changed {
    crate::profile::ProfileManager::instance()
      .resync_proxy_users(&proxy_id)
      .map_err(|e| format!("Failed to apply proxy to profiles: {e}"))?;
  }
  let _ = events::emit_empty(events::names::STORED_PROXIES_CHANGED);
  Ok(proxy)
}

/// Deletes the proxy and detaches it from every profile that used it.
pub async fn delete_stored_proxy(proxy_id: String) -> Result<(), String> {
  ProxyManager::instance()
    .delete_stored_proxy(&proxy_id)
    .map_err(|e| format!("Failed to delete stored proxy: {e}"))?;
  crate::profile::ProfileManager::instance()
    .clear_proxy_assignments(&proxy_id)
    .map_err(|e| format!("Failed to detach proxy from profiles: {e}"))?;
  let _ = events::emit_empty(events::names::STORED_PROXIES_CHANGED);
  Ok(())
}

pub async fn check_proxy_validity(
  proxy_id: String,
  proxy_settings: ProxySettings,
) -> Result<ProxyCheckResult, String> {
  ProxyManager::instance()
    .check_proxy(&proxy_id, &proxy_settings, &ip_utils::PUBLIC_IP_ENDPOINTS)
    .await
    .map_err(|e| e.to_string())
}

pub async fn get_cached_proxy_check(proxy_id: String) -> Result<Option<ProxyCheckResult>, String> {
  Ok(ProxyManager::instance().get_cached_check(&proxy_id))
}

pub async fn export_proxies(format: String) -> Result<String, String> {
  let format: ProxyExportFormat = format.parse()?;
  ProxyManager::instance()
    .export_proxies(format)
    .map_err(|e| format!("Failed to export proxies: {e}"))
}

pub async fn import_proxies(content: String) -> Result<ProxyImportResult, String> {
  let result = ProxyManager::instance()
    .import_proxies(&content)
    .map_err(|e| format!("Failed to import proxies: {e}"))?;
  if result.imported > 0 {
    let _ = events::emit_empty(events::names::STORED_PROXIES_CHANGED);
  }
  Ok(result)
}

lazy_static::lazy_static! {
  static ref PROXY_MANAGER: ProxyManager = ProxyManager::new();
}
