use crate::profile::BrowserProfile;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
struct TagsData {
  tags: Vec<String>,
}

/// Index of every tag in use, kept in `data/tags.json` for suggestions.
pub struct TagManager;

impl TagManager {
  fn new() -> Self {
    Self
  }

  pub fn instance() -> &'static TagManager {
    &TAG_MANAGER
  }

  fn get_tags_file_path(&self) -> PathBuf {
    crate::app_dirs::data_subdir().join("tags.json")
  }

  fn load_tags_data(&self) -> Result<TagsData, Box<dyn std::error::Error + Send + Sync>> {
    let file_path = self.get_tags_file_path();
    if !file_path.exists() {
      return Ok(TagsData::default());
    }
    let content = fs::read_to_string(file_path)?;
    Ok(serde_json::from_str(&content)?)
  }

  fn save_tags_data(&self, data: &TagsData) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let file_path = self.get_tags_file_path();
    if let Some(parent) = file_path.parent() {
      fs::create_dir_all(parent)?;
    }
    fs::write(file_path, serde_json::to_string_pretty(data)?)?;
    Ok(())
  }

  pub fn get_all_tags(&self) -> Result<Vec<String>, Box<dyn std::error::Error + Send + Sync>> {
    let mut all = self.load_tags_data()?.tags;
    all.sort();
    all.dedup();
    Ok(all)
  }

  /// Replaces the index with the union of tags on `profiles`. Tags are kept
  /// exactly as written.
  pub fn rebuild_from_profiles(
    &self,
    profiles: &[BrowserProfile],
  ) -> Result<Vec<String>, Box<dyn std::error::Error + Send + Sync>> {
    let set: BTreeSet<String> = profiles
      .iter()
      .flat_map(|profile| profile.tags.iter().cloned())
      .collect();
    let combined: Vec<String> = set.into_iter().collect();
    self.save_tags_data(&TagsData {
      tags: combined.clone(),
    })?;
    Ok(combined)
  }
}

/// Trims, drops empties and removes duplicates while keeping first-seen order.
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
  let mut seen = std::collections::HashSet::new();
  tags
    .into_iter()
    .map(|tag| tag.trim().to_string())
    .filter(|tag| !tag.is_empty() && seen.insert(tag.clone()))
    .collect()
}

pub async fn get_all_tags() -> Result<Vec<String>, String> {
  TagManager::instance()
    .get_all_tags()
    .map_err(|e| format!("Failed to get tags: {e}"))
}

lazy_static::lazy_static! {
  static ref TAG_MANAGER: TagManager = TagManager::new();
}
