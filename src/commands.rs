use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::browser::ProxySettings;
use crate::fingerprint_config::{CamoufoxConfig, WayfernConfig};
use crate::profile::CreateProfileRequest;
use crate::settings_manager::AppSettings;
use crate::{
  browser_runner, browser_version_manager, downloaded_browsers_registry, downloader,
  extension_manager, geoip_downloader, group_manager, profile, proxy_manager, settings_manager,
  tag_manager, traffic_stats, version_updater,
};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
  #[error("Unknown command: {0}")]
  UnknownCommand(String),
  #[error("Invalid arguments for {command}: {source}")]
  InvalidArgs {
    command: String,
    #[source]
    source: serde_json::Error,
  },
  #[error("{0}")]
  Failed(String),
}

/// Every command name [`dispatch`] understands.
pub const COMMANDS: &[&str] = &[
  // profiles
  "list_browser_profiles",
  "create_browser_profile",
  "rename_profile",
  "clone_profile",
  "delete_profile",
  "update_profile_tags",
  "update_profile_note",
  "update_profile_proxy",
  "update_camoufox_config",
  "update_wayfern_config",
  "update_profile_version",
  "assign_profiles_to_group",
  "assign_extension_group_to_profile",
  "get_all_tags",
  // process
  "launch_browser_profile",
  "launch_profile",
  "kill_browser_profile",
  "check_browser_status",
  "open_url_with_profile",
  "handle_url_open",
  // browsers
  "get_supported_browsers",
  "is_browser_supported_on_platform",
  "get_browser_release_types",
  "load_release_types",
  "get_best_available_version",
  "fetch_browser_versions_with_count",
  "fetch_browser_versions_detailed",
  "download_browser",
  "cancel_download",
  "get_active_downloads",
  "delete_downloaded_version",
  "get_downloaded_browser_versions",
  "is_browser_downloaded",
  "trigger_manual_version_update",
  "get_version_update_status",
  // geoip
  "is_geoip_database_available",
  "download_geoip_database",
  // proxies
  "get_stored_proxies",
  "create_stored_proxy",
  "update_stored_proxy",
  "delete_stored_proxy",
  "check_proxy_validity",
  "get_cached_proxy_check",
  "export_proxies",
  "import_proxies",
  // groups
  "get_profile_groups",
  "get_groups_with_profile_counts",
  "create_profile_group",
  "update_profile_group",
  "delete_profile_group",
  // extensions
  "list_extensions",
  "add_extension",
  "delete_extension",
  "list_extension_groups",
  "create_extension_group",
  "update_extension_group",
  "delete_extension_group",
  "add_extension_to_group",
  "remove_extension_from_group",
  // traffic
  "get_traffic_stats_for_period",
  "record_traffic",
  "get_all_traffic_stats",
  "clear_all_traffic_stats",
  // settings
  "get_app_settings",
  "save_app_settings",
  "generate_api_token",
];

pub fn list_commands() -> Vec<&'static str> {
  let mut commands = COMMANDS.to_vec();
  commands.sort_unstable();
  commands
}

pub fn is_known_command(command: &str) -> bool {
  COMMANDS.contains(&command)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileIdArgs {
  profile_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenameProfileArgs {
  profile_id: String,
  new_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloneProfileArgs {
  profile_id: String,
  #[serde(default)]
  new_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileTagsArgs {
  profile_id: String,
  tags: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileNoteArgs {
  profile_id: String,
  #[serde(default)]
  note: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileProxyArgs {
  profile_id: String,
  #[serde(default)]
  proxy_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CamoufoxConfigArgs {
  profile_id: String,
  config: CamoufoxConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WayfernConfigArgs {
  profile_id: String,
  config: WayfernConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileVersionArgs {
  profile_id: String,
  version: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignGroupArgs {
  profile_ids: Vec<String>,
  #[serde(default)]
  group_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignExtensionGroupArgs {
  profile_id: String,
  #[serde(default)]
  extension_group_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateProfileArgs {
  request: CreateProfileRequest,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LaunchArgs {
  profile_id: String,
  #[serde(default)]
  url: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenUrlArgs {
  profile_id: String,
  url: String,
}

#[derive(Deserialize)]
struct UrlArgs {
  url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrowserArgs {
  #[serde(alias = "browser")]
  browser_str: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrowserVersionArgs {
  #[serde(alias = "browser")]
  browser_str: String,
  version: String,
}

#[derive(Deserialize)]
struct RegistryBrowserArgs {
  browser: String,
}

#[derive(Deserialize)]
struct RegistryVersionArgs {
  browser: String,
  version: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateProxyArgs {
  name: String,
  proxy_settings: ProxySettings,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProxyArgs {
  proxy_id: String,
  #[serde(default)]
  name: Option<String>,
  #[serde(default)]
  proxy_settings: Option<ProxySettings>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProxyIdArgs {
  proxy_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckProxyArgs {
  proxy_id: String,
  proxy_settings: ProxySettings,
}

#[derive(Deserialize)]
struct FormatArgs {
  format: String,
}

#[derive(Deserialize)]
struct ContentArgs {
  content: String,
}

#[derive(Deserialize)]
struct NameArgs {
  name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupIdArgs {
  group_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateGroupArgs {
  group_id: String,
  name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddExtensionArgs {
  name: String,
  file_name: String,
  file_data: Vec<u8>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtensionIdArgs {
  extension_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateExtensionGroupArgs {
  group_id: String,
  #[serde(default)]
  name: Option<String>,
  #[serde(default)]
  extension_ids: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupExtensionArgs {
  group_id: String,
  extension_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrafficPeriodArgs {
  profile_id: String,
  seconds: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordTrafficArgs {
  profile_id: String,
  #[serde(flatten)]
  report: traffic_stats::TrafficReport,
}

#[derive(Deserialize)]
struct SettingsArgs {
  settings: AppSettings,
}

fn parse<T: DeserializeOwned>(command: &str, args: Value) -> Result<T, CommandError> {
  let args = if args.is_null() {
    Value::Object(Default::default())
  } else {
    args
  };
  serde_json::from_value(args).map_err(|source| CommandError::InvalidArgs {
    command: command.to_string(),
    source,
  })
}

fn respond<T: Serialize>(result: Result<T, String>) -> Result<Value, CommandError> {
  let value = result.map_err(CommandError::Failed)?;
  serde_json::to_value(value).map_err(|e| CommandError::Failed(format!("Failed to serialize result: {e}")))
}

/// Runs one command with JSON arguments keyed the way the UI sends them.
pub async fn dispatch(command: &str, args: Value) -> Result<Value, CommandError> {
  log::debug!("Dispatching command {command}");

  match command {
    "list_browser_profiles" => respond(profile::manager::list_browser_profiles().await),
    "create_browser_profile" => {
      let a: CreateProfileArgs = parse(command, args)?;
      respond(profile::manager::create_browser_profile(a.request).await)
    }
    "rename_profile" => {
      let a: RenameProfileArgs = parse(command, args)?;
      respond(profile::manager::rename_profile(a.profile_id, a.new_name).await)
    }
    "clone_profile" => {
      let a: CloneProfileArgs = parse(command, args)?;
      respond(profile::manager::clone_profile(a.profile_id, a.new_name).await)
    }
    "delete_profile" => {
      let a: ProfileIdArgs = parse(command, args)?;
      respond(profile::manager::delete_profile(a.profile_id).await)
    }
    "update_profile_tags" => {
      let a: ProfileTagsArgs = parse(command, args)?;
      respond(profile::manager::update_profile_tags(a.profile_id, a.tags).await)
    }
    "update_profile_note" => {
      let a: ProfileNoteArgs = parse(command, args)?;
      respond(profile::manager::update_profile_note(a.profile_id, a.note).await)
    }
    "update_profile_proxy" => {
      let a: ProfileProxyArgs = parse(command, args)?;
      respond(profile::manager::update_profile_proxy(a.profile_id, a.proxy_id).await)
    }
    "update_camoufox_config" => {
      let a: CamoufoxConfigArgs = parse(command, args)?;
      respond(profile::manager::update_camoufox_config(a.profile_id, a.config).await)
    }
    "update_wayfern_config" => {
      let a: WayfernConfigArgs = parse(command, args)?;
      respond(profile::manager::update_wayfern_config(a.profile_id, a.config).await)
    }
    "update_profile_version" => {
      let a: ProfileVersionArgs = parse(command, args)?;
      respond(profile::manager::update_profile_version(a.profile_id, a.version).await)
    }
    "assign_profiles_to_group" => {
      let a: AssignGroupArgs = parse(command, args)?;
      respond(profile::manager::assign_profiles_to_group(a.profile_ids, a.group_id).await)
    }
    "assign_extension_group_to_profile" => {
      let a: AssignExtensionGroupArgs = parse(command, args)?;
      respond(
        profile::manager::assign_extension_group_to_profile(a.profile_id, a.extension_group_id)
          .await,
      )
    }
    "get_all_tags" => respond(tag_manager::get_all_tags().await),

    "launch_browser_profile" | "launch_profile" => {
      let a: LaunchArgs = parse(command, args)?;
      respond(browser_runner::launch_browser_profile(a.profile_id, a.url).await)
    }
    "kill_browser_profile" => {
      let a: ProfileIdArgs = parse(command, args)?;
      respond(browser_runner::kill_browser_profile(a.profile_id).await)
    }
    "check_browser_status" => {
      let a: ProfileIdArgs = parse(command, args)?;
      respond(browser_runner::check_browser_status(a.profile_id).await)
    }
    "open_url_with_profile" => {
      let a: OpenUrlArgs = parse(command, args)?;
      respond(browser_runner::open_url_with_profile(a.profile_id, a.url).await)
    }
    "handle_url_open" => {
      let a: UrlArgs = parse(command, args)?;
      respond(browser_runner::handle_url_open(a.url).await)
    }

    "get_supported_browsers" => respond(browser_version_manager::get_supported_browsers().await),
    "is_browser_supported_on_platform" => {
      let a: BrowserArgs = parse(command, args)?;
      respond(browser_version_manager::is_browser_supported_on_platform(a.browser_str).await)
    }
    "get_browser_release_types" => {
      let a: BrowserArgs = parse(command, args)?;
      respond(browser_version_manager::get_browser_release_types(a.browser_str).await)
    }
    "load_release_types" => {
      let a: BrowserArgs = parse(command, args)?;
      respond(browser_version_manager::load_release_types(a.browser_str).await)
    }
    "get_best_available_version" => {
      let a: BrowserArgs = parse(command, args)?;
      respond(browser_version_manager::get_best_available_version(a.browser_str).await)
    }
    "fetch_browser_versions_with_count" => {
      let a: BrowserArgs = parse(command, args)?;
      respond(browser_version_manager::fetch_browser_versions_with_count(a.browser_str).await)
    }
    "fetch_browser_versions_detailed" => {
      let a: BrowserArgs = parse(command, args)?;
      respond(browser_version_manager::fetch_browser_versions_detailed(a.browser_str).await)
    }
    "download_browser" => {
      let a: BrowserVersionArgs = parse(command, args)?;
      respond(downloader::download_browser(a.browser_str, a.version).await)
    }
    "cancel_download" => {
      let a: BrowserVersionArgs = parse(command, args)?;
      respond(downloader::cancel_download(a.browser_str, a.version).await)
    }
    "get_active_downloads" => respond(downloader::get_active_downloads().await),
    "delete_downloaded_version" => {
      let a: BrowserVersionArgs = parse(command, args)?;
      respond(downloader::delete_downloaded_version(a.browser_str, a.version).await)
    }
    "get_downloaded_browser_versions" => {
      let a: RegistryBrowserArgs = parse(command, args)?;
      respond(downloaded_browsers_registry::get_downloaded_browser_versions(a.browser).await)
    }
    "is_browser_downloaded" => {
      let a: RegistryVersionArgs = parse(command, args)?;
      respond(downloaded_browsers_registry::is_browser_downloaded(a.browser, a.version).await)
    }
    "trigger_manual_version_update" => {
      respond(version_updater::trigger_manual_version_update().await)
    }
    "get_version_update_status" => respond(version_updater::get_version_update_status().await),

    "is_geoip_database_available" => {
      respond(geoip_downloader::is_geoip_database_available().await)
    }
    "download_geoip_database" => respond(geoip_downloader::download_geoip_database().await),

    "get_stored_proxies" => respond(proxy_manager::get_stored_proxies().await),
    "create_stored_proxy" => {
      let a: CreateProxyArgs = parse(command, args)?;
      respond(proxy_manager::create_stored_proxy(a.name, a.proxy_settings).await)
    }
    "update_stored_proxy" => {
      let a: UpdateProxyArgs = parse(command, args)?;
      respond(proxy_manager::update_stored_proxy(a.proxy_id, a.name, a.proxy_settings).await)
    }
    "delete_stored_proxy" => {
      let a: ProxyIdArgs = parse(command, args)?;
      respond(proxy_manager::delete_stored_proxy(a.proxy_id).await)
    }
    "check_proxy_validity" => {
      let a: CheckProxyArgs = parse(command, args)?;
      respond(proxy_manager::check_proxy_validity(a.proxy_id, a.proxy_settings).await)
    }
    "get_cached_proxy_check" => {
      let a: ProxyIdArgs = parse(command, args)?;
      respond(proxy_manager::get_cached_proxy_check(a.proxy_id).await)
    }
    "export_proxies" => {
      let a: FormatArgs = parse(command, args)?;
      respond(proxy_manager::export_proxies(a.format).await)
    }
    "import_proxies" => {
      let a: ContentArgs = parse(command, args)?;
      respond(proxy_manager::import_proxies(a.content).await)
    }

    "get_profile_groups" => respond(group_manager::get_profile_groups().await),
    "get_groups_with_profile_counts" => {
      respond(group_manager::get_groups_with_profile_counts().await)
    }
    "create_profile_group" => {
      let a: NameArgs = parse(command, args)?;
      respond(group_manager::create_profile_group(a.name).await)
    }
    "update_profile_group" => {
      let a: UpdateGroupArgs = parse(command, args)?;
      respond(group_manager::update_profile_group(a.group_id, a.name).await)
    }
    "delete_profile_group" => {
      let a: GroupIdArgs = parse(command, args)?;
      respond(group_manager::delete_profile_group(a.group_id).await)
    }

    "list_extensions" => respond(extension_manager::list_extensions().await),
    "add_extension" => {
      let a: AddExtensionArgs = parse(command, args)?;
      respond(extension_manager::add_extension(a.name, a.file_name, a.file_data).await)
    }
    "delete_extension" => {
      let a: ExtensionIdArgs = parse(command, args)?;
      respond(extension_manager::delete_extension(a.extension_id).await)
    }
    "list_extension_groups" => respond(extension_manager::list_extension_groups().await),
    "create_extension_group" => {
      let a: NameArgs = parse(command, args)?;
      respond(extension_manager::create_extension_group(a.name).await)
    }
    "update_extension_group" => {
      let a: UpdateExtensionGroupArgs = parse(command, args)?;
      respond(
        extension_manager::update_extension_group(a.group_id, a.name, a.extension_ids).await,
      )
    }
    "delete_extension_group" => {
      let a: GroupIdArgs = parse(command, args)?;
      respond(extension_manager::delete_extension_group(a.group_id).await)
    }
    "add_extension_to_group" => {
      let a: GroupExtensionArgs = parse(command, args)?;
      respond(extension_manager::add_extension_to_group(a.group_id, a.extension_id).await)
    }
    "remove_extension_from_group" => {
      let a: GroupExtensionArgs = parse(command, args)?;
      respond(extension_manager::remove_extension_from_group(a.group_id, a.extension_id).await)
    }

    "get_traffic_stats_for_period" => {
      let a: TrafficPeriodArgs = parse(command, args)?;
      respond(traffic_stats::get_traffic_stats_for_period(a.profile_id, a.seconds).await)
    }
    "record_traffic" => {
      let a: RecordTrafficArgs = parse(command, args)?;
      respond(traffic_stats::record_traffic(a.profile_id, a.report).await)
    }
    "get_all_traffic_stats" => respond(traffic_stats::get_all_traffic_stats().await),
    "clear_all_traffic_stats" => respond(traffic_stats::clear_all_traffic_stats().await),

    "get_app_settings" => respond(settings_manager::get_app_settings().await),
    "save_app_settings" => {
      let a: SettingsArgs = parse(command, args)?;
      respond(settings_manager::save_app_settings(a.settings).await)
    }
    "generate_api_token" => respond(settings_manager::generate_api_token().await),

    _ => Err(CommandError::UnknownCommand(command.to_string())),
  }
}

/// [`dispatch`] with the error flattened to the message the UI displays.
pub async fn invoke(command: &str, args: Value) -> Result<Value, String> {
  dispatch(command, args).await.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::app_dirs;
  use serde_json::json;
  use tempfile::TempDir;

  #[test]
  fn test_command_table_has_no_duplicates() {
    let mut commands = list_commands();
    let before = commands.len();
    commands.dedup();
    assert_eq!(before, commands.len());
    assert!(is_known_command("clone_profile"));
    assert!(!is_known_command("greet"));
  }

  #[tokio::test]
  async fn test_browser_argument_accepts_both_spellings() {
    let tmp = TempDir::new().unwrap();
    let _dirs = app_dirs::isolate_for_test(tmp.path());

    let a = invoke("get_downloaded_browser_versions", json!({ "browser": "zen" })).await;
    assert_eq!(a.unwrap(), json!([]));
    let supported = invoke("is_browser_supported_on_platform", json!({ "browser": "firefox" }))
      .await
      .unwrap();
    assert_eq!(supported, json!(true));
    let supported = invoke("is_browser_supported_on_platform", json!({ "browserStr": "firefox" }))
      .await
      .unwrap();
    assert_eq!(supported, json!(true));
  }

  #[tokio::test]
  async fn test_unknown_command_is_reported() {
    let err = dispatch("nope", Value::Null).await.unwrap_err();
    assert!(matches!(err, CommandError::UnknownCommand(ref name) if name == "nope"));
    assert_eq!(err.to_string(), "Unknown command: nope");
  }

  #[tokio::test]
  async fn test_missing_arguments_are_invalid() {
    let err = dispatch("rename_profile", json!({ "profileId": "x" }))
      .await
      .unwrap_err();
    assert!(matches!(err, CommandError::InvalidArgs { .. }));
    assert!(err.to_string().contains("newName"));
  }

  #[tokio::test]
  async fn test_camel_case_arguments_reach_managers() {
    let tmp = TempDir::new().unwrap();
    let _dirs = app_dirs::isolate_for_test(tmp.path());
    let (recorder, _guard) = crate::events::record_for_test();

    let group = invoke("create_profile_group", json!({ "name": "Work" }))
      .await
      .unwrap();
    let group_id = group["id"].as_str().unwrap().to_string();

    let renamed = invoke(
      "update_profile_group",
      json!({ "groupId": group_id, "name": "Office" }),
    )
    .await
    .unwrap();
    assert_eq!(renamed["name"], "Office");

    let groups = invoke("get_profile_groups", Value::Null).await.unwrap();
    assert_eq!(groups.as_array().unwrap().len(), 1);
    assert!(!recorder.events_named(crate::events::names::GROUPS_CHANGED).is_empty());
  }

  #[tokio::test]
  async fn test_manager_errors_become_messages() {
    let tmp = TempDir::new().unwrap();
    let _dirs = app_dirs::isolate_for_test(tmp.path());

    let err = invoke("delete_profile", json!({ "profileId": "not-a-uuid" }))
      .await
      .unwrap_err();
    assert!(err.starts_with("Failed to"), "{err}");
  }
}
