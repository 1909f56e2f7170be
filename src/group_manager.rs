use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::events;
use crate::validation::ensure_unique_name;

pub const DEFAULT_GROUP_ID: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileGroup {
  pub id: String,
  pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupWithCount {
  pub id: String,
  pub name: String,
  pub count: usize,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct GroupsData {
  groups: Vec<ProfileGroup>,
}

pub struct GroupManager {
  write_lock: Mutex<()>,
}

impl GroupManager {
  fn new() -> Self {
    Self {
      write_lock: Mutex::new(()),
    }
  }

  pub fn instance() -> &'static GroupManager {
    &GROUP_MANAGER
  }

  fn get_groups_file_path(&self) -> PathBuf {
    crate::app_dirs::data_subdir().join("groups.json")
  }

  fn load_groups_data(&self) -> Result<GroupsData, Box<dyn std::error::Error + Send + Sync>> {
    let groups_file = self.get_groups_file_path();
    if !groups_file.exists() {
      return Ok(GroupsData::default());
    }
    let content = fs::read_to_string(groups_file)?;
    Ok(serde_json::from_str(&content)?)
  }

  fn save_groups_data(
    &self,
    groups_data: &GroupsData,
  ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let groups_file = self.get_groups_file_path();
    if let Some(parent) = groups_file.parent() {
      fs::create_dir_all(parent)?;
    }
    fs::write(groups_file, serde_json::to_string_pretty(groups_data)?)?;
    Ok(())
  }

  pub fn get_all_groups(&self) -> Result<Vec<ProfileGroup>, Box<dyn std::error::Error + Send + Sync>> {
    Ok(self.load_groups_data()?.groups)
  }

  pub fn group_exists(&self, id: &str) -> bool {
    self
      .load_groups_data()
      .map(|data| data.groups.iter().any(|g| g.id == id))
      .unwrap_or(false)
  }

  pub fn create_group(
    &self,
    name: &str,
  ) -> Result<ProfileGroup, Box<dyn std::error::Error + Send + Sync>> {
    let _guard = self.write_lock.lock().map_err(|_| "Group store lock poisoned")?;
    let mut groups_data = self.load_groups_data()?;
    ensure_unique_name("Group", name, groups_data.groups.iter().map(|g| g.name.as_str()))?;

    let group = ProfileGroup {
      id: uuid::Uuid::new_v4().to_string(),
      name: name.trim().to_string(),
    };
    groups_data.groups.push(group.clone());
    self.save_groups_data(&groups_data)?;
    log::info!("Created profile group '{}' ({})", group.name, group.id);
    Ok(group)
  }

  pub fn update_group(
    &self,
    id: &str,
    name: &str,
  ) -> Result<ProfileGroup, Box<dyn std::error::Error + Send + Sync>> {
    let _guard = self.write_lock.lock().map_err(|_| "Group store lock poisoned")?;
    let mut groups_data = self.load_groups_data()?;
    ensure_unique_name(
      "Group",
      name,
      groups_data
        .groups
        .iter()
        .filter(|g| g.id != id)
        .map(|g| g.name.as_str()),
    )?;

    let group = groups_data
      .groups
      .iter_mut()
      .find(|g| g.id == id)
      .ok_or_else(|| format!("Group with id '{id}' not found"))?;
    group.name = name.trim().to_string();
    let updated_group = group.clone();

    self.save_groups_data(&groups_data)?;
    Ok(updated_group)
  }

  pub fn delete_group(&self, id: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _guard = self.write_lock.lock().map_err(|_| "Group store lock poisoned")?;
    let mut groups_data = self.load_groups_data()?;
    let initial_len = groups_data.groups.len();
    groups_data.groups.retain(|g| g.id != id);
    if groups_data.groups.len() == initial_len {
      return Err(format!("Group with id '{id}' not found").into());
    }
    self.save_groups_data(&groups_data)?;
    Ok(())
  }

  /// Every group with its member count, preceded by the implied default
  /// group (profiles without a `group_id`).
  pub fn get_groups_with_profile_counts(
    &self,
    profiles: &[crate::profile::BrowserProfile],
  ) -> Result<Vec<GroupWithCount>, Box<dyn std::error::Error + Send + Sync>> {
    let mut group_counts: HashMap<&str, usize> = HashMap::new();
    for group_id in profiles.iter().filter_map(|p| p.group_id.as_deref()) {
      *group_counts.entry(group_id).or_insert(0) += 1;
    }

    let mut result = vec![GroupWithCount {
      id: DEFAULT_GROUP_ID.to_string(),
      name: "Default".to_string(),
      count: profiles.iter().filter(|p| p.group_id.is_none()).count(),
    }];
    result.extend(self.get_all_groups()?.into_iter().map(|group| GroupWithCount {
      count: group_counts.get(group.id.as_str()).copied().unwrap_or(0),
      id: group.id,
      name: group.name,
    }));
    Ok(result)
  }
}

pub async fn get_profile_groups() -> Result<Vec<ProfileGroup>, String> {
  GroupManager::instance()
    .get_all_groups()
    .map_err(|e| format!("Failed to get profile groups: {e}"))
}

pub async fn get_groups_with_profile_counts() -> Result<Vec<GroupWithCount>, String> {
  let profiles = crate::profile::ProfileManager::instance()
    .list_profiles()
    .map_err(|e| format!("Failed to list profiles: {e}"))?;
  GroupManager::instance()
    .get_groups_with_profile_counts(&profiles)
    .map_err(|e| format!("Failed to get groups: {e}"))
}

pub async fn create_profile_group(name: String) -> Result<ProfileGroup, String> {
  let group = GroupManager::instance()
    .create_group(&name)
    .map_err(|e| format!("Failed to create group: {e}"))?;
  let _ = events::emit_empty(events::names::GROUPS_CHANGED);
  Ok(group)
}

pub async fn update_profile_group(group_id: String, name: String) -> Result<ProfileGroup, String> {
  let group = GroupManager::instance()
    .update_group(&group_id, &name)
    .map_err(|e| format!("Failed to update group: {e}"))?;
  let _ = events::emit_empty(events::names::GROUPS_CHANGED);
  Ok(group)
}

/// Deletes the group and moves its profiles back to the default group.
pub async fn delete_profile_group(group_id: String) -> Result<(), String> {
  GroupManager::instance()
    .delete_group(&group_id)
    .map_err(|e| format!("Failed to delete group: {e}"))?;
  crate::profile::ProfileManager::instance()
    .clear_group_assignments(&group_id)
    .map_err(|e| format!("Failed to move profiles to the default group: {e}"))?;
  let _ = events::emit_empty(events::names::GROUPS_CHANGED);
  Ok(())
}

lazy_static::lazy_static! {
  static ref GROUP_MANAGER: GroupManager = GroupManager::new();
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::profile::BrowserProfile;
  use tempfile::TempDir;

  fn profile_in(group_id: Option<&str>) -> BrowserProfile {
    serde_json::from_value(serde_json::json!({
      "id": uuid::Uuid::new_v4(),
      "name": uuid::Uuid::new_v4().to_string(),
      "browser": "firefox",
      "version": "139.0",
      "group_id": group_id,
    }))
    .unwrap()
  }

  #[test]
  fn test_create_update_delete_group() {
    let tmp = TempDir::new().unwrap();
    let _guard = crate::app_dirs::set_test_data_dir(tmp.path().to_path_buf());
    let manager = GroupManager::instance();

    let group = manager.create_group("Work").unwrap();
    assert!(manager.group_exists(&group.id));

    let renamed = manager.update_group(&group.id, "Clients").unwrap();
    assert_eq!(renamed.name, "Clients");
    // Renaming to its own name is not a conflict
    assert!(manager.update_group(&group.id, "clients").is_ok());

    manager.delete_group(&group.id).unwrap();
    assert!(!manager.group_exists(&group.id));
    assert!(manager.delete_group(&group.id).is_err());
  }

  #[test]
  fn test_group_names_are_unique() {
    let tmp = TempDir::new().unwrap();
    let _guard = crate::app_dirs::set_test_data_dir(tmp.path().to_path_buf());
    let manager = GroupManager::instance();

    let first = manager.create_group("Work").unwrap();
    let err = manager.create_group("WORK").unwrap_err();
    assert!(err.to_string().contains("already exists"));

    let second = manager.create_group("Home").unwrap();
    assert!(manager.update_group(&second.id, "work").is_err());
    assert!(manager.update_group("missing", "Other").is_err());
    assert_ne!(first.id, second.id);
  }

  #[test]
  fn test_counts_include_default_and_empty_groups() {
    let tmp = TempDir::new().unwrap();
    let _guard = crate::app_dirs::set_test_data_dir(tmp.path().to_path_buf());
    let manager = GroupManager::instance();

    let busy = manager.create_group("Busy").unwrap();
    let empty = manager.create_group("Empty").unwrap();
    let profiles = vec![
      profile_in(Some(&busy.id)),
      profile_in(Some(&busy.id)),
      profile_in(None),
    ];

    let counts = manager.get_groups_with_profile_counts(&profiles).unwrap();
    assert_eq!(counts.len(), 3);
    assert_eq!(counts[0].id, DEFAULT_GROUP_ID);
    assert_eq!(counts[0].count, 1);
    assert_eq!(counts.iter().find(|g| g.id == busy.id).unwrap().count, 2);
    assert_eq!(counts.iter().find(|g| g.id == empty.id).unwrap().count, 0);
  }
}
