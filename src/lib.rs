pub mod api_client;
pub mod api_server;
pub mod app_dirs;
pub mod browser;
pub mod browser_runner;
pub mod browser_version_manager;
pub mod commands;
pub mod downloaded_browsers_registry;
pub mod downloader;
pub mod events;
pub mod extension_manager;
pub mod extraction;
pub mod fingerprint_config;
pub mod geoip_downloader;
pub mod group_manager;
pub mod ip_utils;
pub mod profile;
pub mod proxy_manager;
pub mod settings_manager;
pub mod tag_manager;
pub mod traffic_stats;
pub mod validation;
pub mod version_updater;
pub mod ws_events;

pub use commands::{dispatch, invoke, list_commands, CommandError};
