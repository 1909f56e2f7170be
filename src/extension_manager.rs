use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::browser::BrowserType;
use crate::events;
use crate::validation::{ensure_unique_name, validate_storage_id};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Extension {
  pub id: String,
  pub name: String,
  pub file_name: String,
  pub file_type: String,
  /// Subset of `"firefox"` and `"chromium"`.
  pub browser_compatibility: Vec<String>,
  pub created_at: u64,
  pub updated_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtensionGroup {
  pub id: String,
  pub name: String,
  pub extension_ids: Vec<String>,
  pub created_at: u64,
  pub updated_at: u64,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct ExtensionGroupsData {
  groups: Vec<ExtensionGroup>,
}

fn now_secs() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}

fn extension_groups_file() -> PathBuf {
  crate::app_dirs::data_subdir().join("extension_groups.json")
}

fn determine_browser_compatibility(file_type: &str) -> Vec<String> {
  match file_type {
    "xpi" => vec!["firefox".to_string()],
    "crx" => vec!["chromium".to_string()],
    "zip" => vec!["chromium".to_string(), "firefox".to_string()],
    _ => vec![],
  }
}

fn get_file_type(file_name: &str) -> Option<String> {
  let (_, ext) = file_name.rsplit_once('.')?;
  let ext = ext.to_lowercase();
  matches!(ext.as_str(), "xpi" | "crx" | "zip").then_some(ext)
}

/// `"firefox"` or `"chromium"`, the engine families extensions target.
pub fn extension_family(browser: &str) -> Option<&'static str> {
  let browser_type: BrowserType = browser.parse().ok()?;
  if browser_type.is_firefox_family() {
    Some("firefox")
  } else if browser_type.is_chromium_family() {
    Some("chromium")
  } else {
    None
  }
}

fn emit_changed() {
  if let Err(e) = events::emit_empty(events::names::EXTENSIONS_CHANGED) {
    log::error!("Failed to emit extensions-changed event: {e}");
  }
}

pub struct ExtensionManager {
  write_lock: Mutex<()>,
}

impl ExtensionManager {
  fn new() -> Self {
    Self {
      write_lock: Mutex::new(()),
    }
  }

  pub fn instance() -> &'static ExtensionManager {
    &EXTENSION_MANAGER
  }

  fn get_extension_dir(&self, ext_id: &str) -> PathBuf {
    crate::app_dirs::extensions_dir().join(ext_id)
  }

  fn get_metadata_path(&self, ext_id: &str) -> PathBuf {
    self.get_extension_dir(ext_id).join("metadata.json")
  }

  fn get_file_dir(&self, ext_id: &str) -> PathBuf {
    self.get_extension_dir(ext_id).join("file")
  }

  pub fn add_extension(
    &self,
    name: &str,
    file_name: &str,
    file_data: &[u8],
  ) -> Result<Extension, Box<dyn std::error::Error + Send + Sync>> {
    let stored_name = Path::new(file_name)
      .file_name()
      .and_then(|n| n.to_str())
      .unwrap_or_default();
    if stored_name.is_empty() || stored_name != file_name {
      return Err(format!("Invalid extension file name: {file_name}").into());
    }
    let file_type =
      get_file_type(file_name).ok_or_else(|| format!("Unsupported file type: {file_name}"))?;
    if file_data.is_empty() {
      return Err("Extension file is empty".into());
    }
    let existing = self.list_extensions()?;
    ensure_unique_name("Extension", name, existing.iter().map(|e| e.name.as_str()))?;

    let now = now_secs();
    let ext = Extension {
      id: uuid::Uuid::new_v4().to_string(),
      name: name.trim().to_string(),
      file_name: file_name.to_string(),
      browser_compatibility: determine_browser_compatibility(&file_type),
      file_type,
      created_at: now,
      updated_at: now,
    };

    let file_dir = self.get_file_dir(&ext.id);
    fs::create_dir_all(&file_dir)?;
    fs::write(file_dir.join(file_name), file_data)?;
    fs::write(
      self.get_metadata_path(&ext.id),
      serde_json::to_string_pretty(&ext)?,
    )?;
    Ok(ext)
  }

  pub fn get_extension(&self, id: &str) -> Result<Extension, Box<dyn std::error::Error + Send + Sync>> {
    validate_storage_id("extension", id)?;
    let metadata_path = self.get_metadata_path(id);
    if !metadata_path.exists() {
      return Err(format!("Extension with id '{id}' not found").into());
    }
    Ok(serde_json::from_str(&fs::read_to_string(metadata_path)?)?)
  }

  pub fn list_extensions(&self) -> Result<Vec<Extension>, Box<dyn std::error::Error + Send + Sync>> {
    let base = crate::app_dirs::extensions_dir();
    if !base.exists() {
      return Ok(Vec::new());
    }

    let mut extensions = Vec::new();
    for entry in fs::read_dir(base)? {
      let metadata_path = entry?.path().join("metadata.json");
      if let Ok(content) = fs::read_to_string(&metadata_path) {
        match serde_json::from_str::<Extension>(&content) {
          Ok(ext) => extensions.push(ext),
          Err(e) => log::warn!("Skipping unreadable extension {}: {e}", metadata_path.display()),
        }
      }
    }
    extensions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
    Ok(extensions)
  }

  /// Removes the extension files and drops it from every group.
  pub fn delete_extension(&self, id: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _guard = self.write_lock.lock().map_err(|_| "Extension store lock poisoned")?;
    self.get_extension(id)?;
    fs::remove_dir_all(self.get_extension_dir(id))?;

    let mut groups_data = self.load_groups_data()?;
    for group in &mut groups_data.groups {
      group.extension_ids.retain(|eid| eid != id);
    }
    self.save_groups_data(&groups_data)?;
    Ok(())
  }

  fn load_groups_data(&self) -> Result<ExtensionGroupsData, Box<dyn std::error::Error + Send + Sync>> {
    let path = extension_groups_file();
    if !path.exists() {
      return Ok(ExtensionGroupsData::default());
    }
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
  }

  fn save_groups_data(
    &self,
    data: &ExtensionGroupsData,
  ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let path = extension_groups_file();
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(data)?)?;
    Ok(())
  }

  fn modify_group<F>(
    &self,
    group_id: &str,
    f: F,
  ) -> Result<ExtensionGroup, Box<dyn std::error::Error + Send + Sync>>
  where
    F: FnOnce(&mut ExtensionGroup),
  {
    let _guard = self.write_lock.lock().map_err(|_| "Extension store lock poisoned")?;
    let mut data = self.load_groups_data()?;
    let group = data
      .groups
      .iter_mut()
      .find(|g| g.id == group_id)
      .ok_or_else(|| format!("Extension group with id '{group_id}' not found"))?;
    f(group);
    group.updated_at = now_secs();
    let updated = group.clone();
    self.save_groups_data(&data)?;
    Ok(updated)
  }

  pub fn create_group(&self, name: &str) -> Result<ExtensionGroup, Box<dyn std::error::Error + Send + Sync>> {
    let _guard = self.write_lock.lock().map_err(|_| "Extension store lock poisoned")?;
    let mut data = self.load_groups_data()?;
    ensure_unique_name(
      "Extension group",
      name,
      data.groups.iter().map(|g| g.name.as_str()),
    )?;

    let now = now_secs();
    let group = ExtensionGroup {
      id: uuid::Uuid::new_v4().to_string(),
      name: name.trim().to_string(),
      extension_ids: Vec::new(),
      created_at: now,
      updated_at: now,
    };
    data.groups.push(group.clone());
    self.save_groups_data(&data)?;
    Ok(group)
  }

  pub fn get_group(&self, id: &str) -> Result<ExtensionGroup, Box<dyn std::error::Error + Send + Sync>> {
    self
      .load_groups_data()?
      .groups
      .into_iter()
      .find(|g| g.id == id)
      .ok_or_else(|| format!("Extension group with id '{id}' not found").into())
  }

  pub fn list_groups(&self) -> Result<Vec<ExtensionGroup>, Box<dyn std::error::Error + Send + Sync>> {
    Ok(self.load_groups_data()?.groups)
  }

  pub fn update_group(
    &self,
    id: &str,
    name: Option<String>,
    extension_ids: Option<Vec<String>>,
  ) -> Result<ExtensionGroup, Box<dyn std::error::Error + Send + Sync>> {
    if let Some(name) = &name {
      let groups = self.list_groups()?;
      ensure_unique_name(
        "Extension group",
        name,
        groups
          .iter()
          .filter(|g| g.id != id)
          .map(|g| g.name.as_str()),
      )?;
    }
    if let Some(ids) = &extension_ids {
      for ext_id in ids {
        self.get_extension(ext_id)?;
      }
    }
    self.modify_group(id, |group| {
      if let Some(name) = name {
        group.name = name.trim().to_string();
      }
      if let Some(ids) = extension_ids {
        group.extension_ids = ids;
      }
    })
  }

  /// Deletes the group and unassigns it from every profile.
  pub fn delete_group(&self, id: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    {
      let _guard = self.write_lock.lock().map_err(|_| "Extension store lock poisoned")?;
      let mut data = self.load_groups_data()?;
      let initial_len = data.groups.len();
      data.groups.retain(|g| g.id != id);
      if data.groups.len() == initial_len {
        return Err(format!("Extension group with id '{id}' not found").into());
      }
      self.save_groups_data(&data)?;
    }
    crate::profile::ProfileManager::instance().clear_extension_group_assignments(id)?;
    Ok(())
  }

  pub fn add_extension_to_group(
    &self,
    group_id: &str,
    extension_id: &str,
  ) -> Result<ExtensionGroup, Box<dyn std::error::Error + Send + Sync>> {
    self.get_extension(extension_id)?;
    self.modify_group(group_id, |group| {
      if !group.extension_ids.iter().any(|id| id == extension_id) {
        group.extension_ids.push(extension_id.to_string());
      }
    })
  }

  pub fn remove_extension_from_group(
    &self,
    group_id: &str,
    extension_id: &str,
  ) -> Result<ExtensionGroup, Box<dyn std::error::Error + Send + Sync>> {
    self.modify_group(group_id, |group| {
      group.extension_ids.retain(|id| id != extension_id);
    })
  }

  /// Every extension in the group must support the browser's engine family.
  pub fn validate_group_compatibility(
    &self,
    group_id: &str,
    browser: &str,
  ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let group = self.get_group(group_id)?;
    let family = extension_family(browser)
      .ok_or_else(|| format!("Extensions are not supported for browser '{browser}'"))?;

    for ext_id in &group.extension_ids {
      let ext = self.get_extension(ext_id)?;
      if !ext.browser_compatibility.iter().any(|b| b == family) {
        return Err(
          format!(
            "Extension '{}' ({}) is not compatible with {family} browsers",
            ext.name, ext.file_type
          )
          .into(),
        );
      }
    }
    Ok(())
  }

  /// Places the profile's extensions where its browser will pick them up.
  /// Gecko browsers get `.xpi` files in `<profile>/extensions`; Chromium
  /// browsers get unpacked directories whose paths are returned for
  /// `--load-extension`.
  pub fn install_extensions_for_profile(
    &self,
    profile: &crate::profile::BrowserProfile,
    profile_data_path: &Path,
  ) -> Result<Vec<PathBuf>, Box<dyn std::error::Error + Send + Sync>> {
    let Some(group_id) = &profile.extension_group_id else {
      return Ok(Vec::new());
    };
    let Some(family) = extension_family(&profile.browser) else {
      return Ok(Vec::new());
    };
    let group = self.get_group(group_id)?;
    let extensions: Vec<Extension> = group
      .extension_ids
      .iter()
      .filter_map(|id| self.get_extension(id).ok())
      .filter(|ext| ext.browser_compatibility.iter().any(|b| b == family))
      .collect();

    let mut installed = Vec::new();
    if family == "firefox" {
      let extensions_dir = profile_data_path.join("extensions");
      if extensions_dir.exists() {
        fs::remove_dir_all(&extensions_dir)?;
      }
      fs::create_dir_all(&extensions_dir)?;
      for ext in extensions {
        let src_file = self.get_file_dir(&ext.id).join(&ext.file_name);
        let stem = ext
          .file_name
          .rsplit_once('.')
          .map(|(stem, _)| stem)
          .unwrap_or(&ext.file_name);
        let dest = extensions_dir.join(format!("{stem}.xpi"));
        fs::copy(&src_file, &dest)?;
        installed.push(dest);
      }
    } else {
      let unpacked_base = profile_data_path
        .parent()
        .unwrap_or(profile_data_path)
        .join("unpacked_extensions");
      if unpacked_base.exists() {
        fs::remove_dir_all(&unpacked_base)?;
      }
      for ext in extensions {
        let src_file = self.get_file_dir(&ext.id).join(&ext.file_name);
        let unpack_dir = unpacked_base.join(&ext.id);
        fs::create_dir_all(&unpack_dir)?;
        match unpack_extension(&src_file, &unpack_dir) {
          Ok(()) => installed.push(unpack_dir),
          Err(e) => log::warn!("Failed to unpack extension '{}': {e}", ext.name),
        }
      }
    }
    Ok(installed)
  }
}

/// Unzips a `.zip` or `.crx` (a zip behind a signed header) into `dest`.
fn unpack_extension(src: &Path, dest: &Path) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
  let data = fs::read(src)?;
  let zip_start = data
    .windows(4)
    .position(|window| window == [0x50, 0x4B, 0x03, 0x04])
    .ok_or("Extension is not a zip or crx archive")?;
  let mut archive = zip::ZipArchive::new(std::io::Cursor::new(&data[zip_start..]))?;
  archive.extract(dest)?;
  Ok(())
}

pub async fn list_extensions() -> Result<Vec<Extension>, String> {
  ExtensionManager::instance()
    .list_extensions()
    .map_err(|e| format!("Failed to list extensions: {e}"))
}

pub async fn add_extension(
  name: String,
  file_name: String,
  file_data: Vec<u8>,
) -> Result<Extension, String> {
  let ext = ExtensionManager::instance()
    .add_extension(&name, &file_name, &file_data)
    .map_err(|e| format!("Failed to add extension: {e}"))?;
  emit_changed();
  Ok(ext)
}

pub async fn delete_extension(extension_id: String) -> Result<(), String> {
  ExtensionManager::instance()
    .delete_extension(&extension_id)
    .map_err(|e| format!("Failed to delete extension: {e}"))?;
  emit_changed();
  Ok(())
}

pub async fn list_extension_groups() -> Result<Vec<ExtensionGroup>, String> {
  ExtensionManager::instance()
    .list_groups()
    .map_err(|e| format!("Failed to list extension groups: {e}"))
}

pub async fn create_extension_group(name: String) -> Result<ExtensionGroup, String> {
  let group = ExtensionManager::instance()
    .create_group(&name)
    .map_err(|e| format!("Failed to create extension group: {e}"))?;
  emit_changed();
  Ok(group)
}

pub async fn update_extension_group(
  group_id: String,
  name: Option<String>,
  extension_ids: Option<Vec<String>>,
) -> Result<ExtensionGroup, String> {
  let group = ExtensionManager::instance()
    .update_group(&group_id, name, extension_ids)
    .map_err(|e| format!("Failed to update extension group: {e}"))?;
  emit_changed();
  Ok(group)
}

pub async fn delete_extension_group(group_id: String) -> Result<(), String> {
  ExtensionManager::instance()
    .delete_group(&group_id)
    .map_err(|e| format!("Failed to delete extension group: {e}"))?;
  emit_changed();
  Ok(())
}

pub async fn add_extension_to_group(
  group_id: String,
  extension_id: String,
) -> Result<ExtensionGroup, String> {
  let group = ExtensionManager::instance()
    .add_extension_to_group(&group_id, &extension_id)
    .map_err(|e| format!("Failed to add extension to group: {e}"))?;
  emit_changed();
  Ok(group)
}

pub async fn remove_extension_from_group(
  group_id: String,
  extension_id: String,
) -> Result<ExtensionGroup, String> {
  let group = ExtensionManager::instance()
    .remove_extension_from_group(&group_id, &extension_id)
    .map_err(|e| format!("Failed to remove extension from group: {e}"))?;
  emit_changed();
  Ok(group)
}

lazy_static::lazy_static! {
  static ref EXTENSION_MANAGER: ExtensionManager = ExtensionManager::new();
}
