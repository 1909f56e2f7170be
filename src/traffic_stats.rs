use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

const RETENTION_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Traffic in one second.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BandwidthDataPoint {
  pub timestamp: u64,
  pub bytes_sent: u64,
  pub bytes_received: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomainAccessPoint {
  pub timestamp: u64,
  pub domain: String,
  pub bytes_sent: u64,
  pub bytes_received: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomainAccess {
  pub domain: String,
  pub request_count: u64,
  pub bytes_sent: u64,
  pub bytes_received: u64,
  pub first_access: u64,
  pub last_access: u64,
}

/// Summary used by the profile list: totals plus the last minute of history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficSnapshot {
  pub profile_id: String,
  pub session_start: u64,
  pub last_update: u64,
  pub total_bytes_sent: u64,
  pub total_bytes_received: u64,
  pub total_requests: u64,
  pub current_bytes_sent: u64,
  pub current_bytes_received: u64,
  pub recent_bandwidth: Vec<BandwidthDataPoint>,
}

/// Everything recorded for one profile, stored as
/// `traffic_stats/{profile_id}.json` in the cache dir.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficStats {
  pub profile_id: String,
  #[serde(default)]
  pub proxy_id: Option<String>,
  pub session_start: u64,
  pub last_update: u64,
  pub total_bytes_sent: u64,
  pub total_bytes_received: u64,
  pub total_requests: u64,
  #[serde(default)]
  pub bandwidth_history: Vec<BandwidthDataPoint>,
  /// All-time aggregate per domain.
  #[serde(default)]
  pub domains: HashMap<String, DomainAccess>,
  #[serde(default)]
  pub domain_access_history: Vec<DomainAccessPoint>,
  #[serde(default)]
  pub unique_ips: Vec<String>,
}

impl TrafficStats {
  pub fn new(profile_id: String, proxy_id: Option<String>) -> Self {
    let now = current_timestamp();
    Self {
      profile_id,
      proxy_id,
      session_start: now,
      last_update: now,
      total_bytes_sent: 0,
      total_bytes_received: 0,
      total_requests: 0,
      bandwidth_history: Vec::new(),
      domains: HashMap::new(),
      domain_access_history: Vec::new(),
      unique_ips: Vec::new(),
    }
  }

  pub fn to_snapshot(&self) -> TrafficSnapshot {
    let now = current_timestamp();
    let cutoff = now.saturating_sub(60);
    let (current_sent, current_recv) = self
      .bandwidth_history
      .last()
      .filter(|dp| dp.timestamp >= now.saturating_sub(2))
      .map(|dp| (dp.bytes_sent, dp.bytes_received))
      .unwrap_or((0, 0));

    TrafficSnapshot {
      profile_id: self.profile_id.clone(),
      session_start: self.session_start,
      last_update: self.last_update,
      total_bytes_sent: self.total_bytes_sent,
      total_bytes_received: self.total_bytes_received,
      total_requests: self.total_requests,
      current_bytes_sent: current_sent,
      current_bytes_received: current_recv,
      recent_bandwidth: self
        .bandwidth_history
        .iter()
        .filter(|dp| dp.timestamp >= cutoff)
        .cloned()
        .collect(),
    }
  }

  pub fn record_bandwidth(&mut self, bytes_sent: u64, bytes_received: u64) {
    self.record_bandwidth_at(current_timestamp(), bytes_sent, bytes_received);
  }

  /// Adds to the data point for second `timestamp`, creating it when the
  /// history has moved on.
  pub fn record_bandwidth_at(&mut self, timestamp: u64, bytes_sent: u64, bytes_received: u64) {
    self.last_update = self.last_update.max(timestamp);
    self.total_bytes_sent += bytes_sent;
    self.total_bytes_received += bytes_received;

    if let Some(last) = self.bandwidth_history.last_mut() {
      if last.timestamp == timestamp {
        last.bytes_sent += bytes_sent;
        last.bytes_received += bytes_received;
        return;
      }
    }
    self.bandwidth_history.push(BandwidthDataPoint {
      timestamp,
      bytes_sent,
      bytes_received,
    });
  }

  pub fn record_request(&mut self, domain: &str, bytes_sent: u64, bytes_received: u64) {
    self.record_request_at(current_timestamp(), domain, bytes_sent, bytes_received);
  }

  pub fn record_request_at(
    &mut self,
    timestamp: u64,
    domain: &str,
    bytes_sent: u64,
    bytes_received: u64,
  ) {
    self.total_requests += 1;
    let entry = self
      .domains
      .entry(domain.to_string())
      .or_insert_with(|| DomainAccess {
        domain: domain.to_string(),
        request_count: 0,
        bytes_sent: 0,
        bytes_received: 0,
        first_access: timestamp,
        last_access: timestamp,
      });
    entry.request_count += 1;
    entry.bytes_sent += bytes_sent;
    entry.bytes_received += bytes_received;
    entry.first_access = entry.first_access.min(timestamp);
    entry.last_access = entry.last_access.max(timestamp);

    self.domain_access_history.push(DomainAccessPoint {
      timestamp,
      domain: domain.to_string(),
      bytes_sent,
      bytes_received,
    });
  }

  pub fn record_ip(&mut self, ip: &str) {
    if !self.unique_ips.iter().any(|known| known == ip) {
      self.unique_ips.push(ip.to_string());
    }
  }

  /// Drops history older than seven days. Domains survive when they were
  /// seen recently or moved more than 1 MB.
  pub fn prune_old_data(&mut self) {
    let cutoff = current_timestamp().saturating_sub(RETENTION_SECONDS);
    self.bandwidth_history.retain(|dp| dp.timestamp >= cutoff);
    self
      .domain_access_history
      .retain(|dp| dp.timestamp >= cutoff);

    let recent_domains: HashSet<&str> = self
      .domain_access_history
      .iter()
      .map(|dp| dp.domain.as_str())
      .collect();
    self.domains.retain(|domain, access| {
      recent_domains.contains(domain.as_str())
        || access.last_access >= cutoff
        || (access.bytes_sent + access.bytes_received) > 1_000_000
    });
  }
}

fn current_timestamp() -> u64 {
  std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}

/// One measurement pushed by a proxy worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficReport {
  #[serde(default)]
  pub proxy_id: Option<String>,
  #[serde(default)]
  pub bytes_sent: u64,
  #[serde(default)]
  pub bytes_received: u64,
  /// Counts as one request to this domain when present.
  #[serde(default)]
  pub domain: Option<String>,
  #[serde(default)]
  pub ip: Option<String>,
}

impl TrafficReport {
  fn apply(&self, stats: &mut TrafficStats) {
    if self.bytes_sent > 0 || self.bytes_received > 0 {
      stats.record_bandwidth(self.bytes_sent, self.bytes_received);
    }
    if let Some(domain) = self.domain.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
      stats.record_request(domain, self.bytes_sent, self.bytes_received);
    }
    if let Some(ip) = self.ip.as_deref().map(str::trim).filter(|ip| !ip.is_empty()) {
      stats.record_ip(ip);
    }
  }
}

/// Stats narrowed to a time window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilteredTrafficStats {
  pub profile_id: String,
  pub session_start: u64,
  pub last_update: u64,
  pub total_bytes_sent: u64,
  pub total_bytes_received: u64,
  pub total_requests: u64,
  pub bandwidth_history: Vec<BandwidthDataPoint>,
  pub period_bytes_sent: u64,
  pub period_bytes_received: u64,
  pub period_requests: u64,
  pub domains: HashMap<String, DomainAccess>,
  pub unique_ips: Vec<String>,
}

/// `seconds == 0` means all time. When nothing in the window touched a
/// domain, the all-time domain table is returned instead of an empty one.
pub fn filter_stats_for_period(stats: TrafficStats, seconds: u64, now: u64) -> FilteredTrafficStats {
  let cutoff = if seconds == 0 {
    0
  } else {
    now.saturating_sub(seconds)
  };

  let bandwidth_history: Vec<BandwidthDataPoint> = stats
    .bandwidth_history
    .iter()
    .filter(|dp| dp.timestamp >= cutoff)
    .cloned()
    .collect();
  let period_bytes_sent = bandwidth_history.iter().map(|dp| dp.bytes_sent).sum();
  let period_bytes_received = bandwidth_history.iter().map(|dp| dp.bytes_received).sum();

  let mut period_domains: HashMap<String, DomainAccess> = HashMap::new();
  let mut period_requests = 0;
  for access in stats
    .domain_access_history
    .iter()
    .filter(|a| a.timestamp >= cutoff)
  {
    period_requests += 1;
    let entry = period_domains
      .entry(access.domain.clone())
      .or_insert_with(|| DomainAccess {
        domain: access.domain.clone(),
        request_count: 0,
        bytes_sent: 0,
        bytes_received: 0,
        first_access: access.timestamp,
        last_access: access.timestamp,
      });
    entry.request_count += 1;
    entry.bytes_sent += access.bytes_sent;
    entry.bytes_received += access.bytes_received;
    entry.first_access = entry.first_access.min(access.timestamp);
    entry.last_access = entry.last_access.max(access.timestamp);
  }

  let domains = if period_domains.is_empty() {
    stats.domains
  } else {
    period_domains
  };

  FilteredTrafficStats {
    profile_id: stats.profile_id,
    session_start: stats.session_start,
    last_update: stats.last_update,
    total_bytes_sent: stats.total_bytes_sent,
    total_bytes_received: stats.total_bytes_received,
    total_requests: stats.total_requests,
    bandwidth_history,
    period_bytes_sent,
    period_bytes_received,
    period_requests,
    domains,
    unique_ips: stats.unique_ips,
  }
}

pub struct TrafficStatsManager {
  write_lock: Mutex<()>,
}

impl TrafficStatsManager {
  fn new() -> Self {
    Self {
      write_lock: Mutex::new(()),
    }
  }

  pub fn instance() -> &'static TrafficStatsManager {
    &TRAFFIC_STATS_MANAGER
  }

  fn stats_file(profile_id: &str) -> Result<PathBuf, String> {
    uuid::Uuid::parse_str(profile_id).map_err(|_| format!("Invalid profile ID: {profile_id}"))?;
    Ok(crate::app_dirs::traffic_stats_dir().join(format!("{profile_id}.json")))
  }

  pub fn load(&self, profile_id: &str) -> Option<TrafficStats> {
    let content = fs::read_to_string(Self::stats_file(profile_id).ok()?).ok()?;
    serde_json::from_str(&content)
      .map_err(|e| log::warn!("Unreadable traffic stats for {profile_id}: {e}"))
      .ok()
  }

  fn save(&self, stats: &TrafficStats) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let file = Self::stats_file(&stats.profile_id)?;
    fs::create_dir_all(crate::app_dirs::traffic_stats_dir())?;
    fs::write(file, serde_json::to_string(stats)?)?;
    Ok(())
  }

  /// Applies `record` to the profile's stats (created on first use), prunes
  /// expired history and persists the result.
  pub fn record<F>(
    &self,
    profile_id: &str,
    proxy_id: Option<&str>,
    record: F,
  ) -> Result<TrafficStats, Box<dyn std::error::Error + Send + Sync>>
  where
    F: FnOnce(&mut TrafficStats),
  {
    Self::stats_file(profile_id)?;
    let _guard = self
      .write_lock
      .lock()
      .map_err(|_| "Traffic stats lock poisoned")?;
    let mut stats = self
      .load(profile_id)
      .unwrap_or_else(|| TrafficStats::new(profile_id.to_string(), None));
    if let Some(proxy_id) = proxy_id {
      stats.proxy_id = Some(proxy_id.to_string());
    }
    record(&mut stats);
    stats.prune_old_data();
    self.save(&stats)?;
    Ok(stats)
  }

  pub fn list_all(&self) -> Vec<TrafficStats> {
    let Ok(entries) = fs::read_dir(crate::app_dirs::traffic_stats_dir()) else {
      return Vec::new();
    };
    entries
      .filter_map(Result::ok)
      .filter_map(|entry| {
        let path = entry.path();
        let profile_id = path
          .file_name()?
          .to_str()?
          .strip_suffix(".json")?
          .to_string();
        self.load(&profile_id)
      })
      .collect()
  }

  pub fn get_for_period(
    &self,
    profile_id: &str,
    seconds: u64,
  ) -> Result<Option<FilteredTrafficStats>, String> {
    Self::stats_file(profile_id)?;
    Ok(
      self
        .load(profile_id)
        .map(|stats| filter_stats_for_period(stats, seconds, current_timestamp())),
    )
  }

  pub fn remove_profile_stats(&self, profile_id: &str) {
    let Ok(path) = Self::stats_file(profile_id) else {
      return;
    };
    if path.exists() {
      if let Err(e) = fs::remove_file(&path) {
        log::warn!("Failed to remove traffic stats for {profile_id}: {e}");
      }
    }
  }

  pub fn clear_all(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _guard = self
      .write_lock
      .lock()
      .map_err(|_| "Traffic stats lock poisoned")?;
    let dir = crate::app_dirs::traffic_stats_dir();
    if dir.exists() {
      fs::remove_dir_all(&dir)?;
    }
    log::info!("Cleared all traffic stats");
    Ok(())
  }
}

pub async fn get_traffic_stats_for_period(
  profile_id: String,
  seconds: u64,
) -> Result<Option<FilteredTrafficStats>, String> {
  TrafficStatsManager::instance()
    .get_for_period(&profile_id, seconds)
    .map_err(|e| format!("Failed to get traffic stats: {e}"))
}

/// Entry point for proxy workers reporting traffic of a running profile.
pub async fn record_traffic(
  profile_id: String,
  report: TrafficReport,
) -> Result<TrafficSnapshot, String> {
  crate::profile::ProfileManager::instance()
    .get_profile(&profile_id)
    .map_err(|e| format!("Failed to record traffic: {e}"))?;
  let stats = TrafficStatsManager::instance()
    .record(&profile_id, report.proxy_id.as_deref(), |stats| {
      report.apply(stats)
    })
    .map_err(|e| format!("Failed to record traffic: {e}"))?;
  Ok(stats.to_snapshot())
}

pub async fn get_all_traffic_stats() -> Result<Vec<TrafficSnapshot>, String> {
  let mut snapshots: Vec<TrafficSnapshot> = TrafficStatsManager::instance()
    .list_all()
    .iter()
    .map(TrafficStats::to_snapshot)
    .collect();
  snapshots.sort_by(|a, b| a.profile_id.cmp(&b.profile_id));
  Ok(snapshots)
}

pub async fn clear_all_traffic_stats() -> Result<(), String> {
  TrafficStatsManager::instance()
    .clear_all()
    .map_err(|e| format!("Failed to clear traffic stats: {e}"))
}

lazy_static::lazy_static! {
  static ref TRAFFIC_STATS_MANAGER: TrafficStatsManager = TrafficStatsManager::new();
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn test_bandwidth_recording_merges_same_second() {
    let mut stats = TrafficStats::new("p".to_string(), None);
    stats.record_bandwidth_at(100, 1000, 2000);
    stats.record_bandwidth_at(100, 500, 1000);
    stats.record_bandwidth_at(101, 1, 1);

    assert_eq!(stats.total_bytes_sent, 1501);
    assert_eq!(stats.total_bytes_received, 3001);
    assert_eq!(stats.bandwidth_history.len(), 2);
    assert_eq!(stats.bandwidth_history[0].bytes_sent, 1500);
  }

  #[test]
  fn test_domain_and_ip_recording() {
    let mut stats = TrafficStats::new("p".to_string(), None);
    stats.record_request("example.com", 100, 500);
    stats.record_request("example.com", 200, 1000);
    stats.record_request("google.com", 50, 200);
    stats.record_ip("192.168.1.1");
    stats.record_ip("192.168.1.1");
    stats.record_ip("10.0.0.1");

    assert_eq!(stats.total_requests, 3);
    assert_eq!(stats.domains["example.com"].request_count, 2);
    assert_eq!(stats.domains["example.com"].bytes_sent, 300);
    assert_eq!(stats.unique_ips, vec!["192.168.1.1", "10.0.0.1"]);
  }

  #[test]
  fn test_period_filter_sums_window_only() {
    let now = 10_000;
    let mut stats = TrafficStats::new("p".to_string(), None);
    stats.record_bandwidth_at(now - 7200, 10, 20);
    stats.record_bandwidth_at(now - 30, 1, 2);
    stats.record_bandwidth_at(now - 5, 3, 4);
    stats.record_request_at(now - 7200, "old.example", 1, 1);
    stats.record_request_at(now - 10, "new.example", 1, 1);

    let hour = filter_stats_for_period(stats.clone(), 3600, now);
    assert_eq!(hour.bandwidth_history.len(), 2);
    assert_eq!(hour.period_bytes_sent, 4);
    assert_eq!(hour.period_bytes_received, 6);
    assert_eq!(hour.period_requests, 1);
    assert!(hour.domains.contains_key("new.example"));
    assert!(!hour.domains.contains_key("old.example"));
    assert_eq!(hour.total_bytes_sent, 14);

    let all = filter_stats_for_period(stats, 0, now);
    assert_eq!(all.period_bytes_sent, 14);
    assert_eq!(all.period_requests, 2);
    assert_eq!(all.domains.len(), 2);
  }

  #[test]
  fn test_empty_period_falls_back_to_all_time_domains() {
    let now = 10_000;
    let mut stats = TrafficStats::new("p".to_string(), None);
    stats.record_request_at(now - 7200, "old.example", 1, 1);

    let minute = filter_stats_for_period(stats, 60, now);
    assert_eq!(minute.period_requests, 0);
    assert_eq!(minute.domains.len(), 1);
    assert!(minute.domains.contains_key("old.example"));
  }

  #[test]
  fn test_prune_drops_week_old_history() {
    let now = current_timestamp();
    let mut stats = TrafficStats::new("p".to_string(), None);
    stats.record_bandwidth_at(now - RETENTION_SECONDS - 10, 1, 1);
    stats.record_request_at(now - RETENTION_SECONDS - 10, "stale.example", 1, 1);
    stats.record_bandwidth_at(now, 1, 1);

    stats.prune_old_data();
    assert_eq!(stats.bandwidth_history.len(), 1);
    assert!(stats.domain_access_history.is_empty());
    assert!(stats.domains.is_empty());
    // Totals are all-time and survive pruning
    assert_eq!(stats.total_bytes_sent, 2);
  }

  const PROFILE_A: &str = "6f0c3a52-1d4e-4b8a-9f21-0a7d5c3e9b10";
  const PROFILE_B: &str = "b2e4d6f8-3a5c-4e7f-8b9d-1c2e3f4a5b6c";

  #[test]
  fn test_manager_persists_lists_and_clears() {
    let tmp = TempDir::new().unwrap();
    let _dirs = crate::app_dirs::isolate_for_test(tmp.path());
    let manager = TrafficStatsManager::instance();

    manager
      .record(PROFILE_A, Some("proxy-1"), |stats| {
        stats.record_bandwidth(100, 200);
        stats.record_request("example.com", 100, 200);
      })
      .unwrap();
    manager
      .record(PROFILE_B, None, |stats| stats.record_ip("10.0.0.1"))
      .unwrap();

    let loaded = manager.load(PROFILE_A).unwrap();
    assert_eq!(loaded.proxy_id.as_deref(), Some("proxy-1"));
    assert_eq!(loaded.total_bytes_received, 200);
    assert_eq!(manager.list_all().len(), 2);

    let period = manager.get_for_period(PROFILE_A, 60).unwrap().unwrap();
    assert_eq!(period.period_requests, 1);
    assert!(manager
      .get_for_period("00000000-0000-4000-8000-000000000000", 60)
      .unwrap()
      .is_none());

    manager.remove_profile_stats(PROFILE_B);
    assert_eq!(manager.list_all().len(), 1);
    manager.clear_all().unwrap();
    assert!(manager.list_all().is_empty());
  }

  #[test]
  fn test_non_uuid_profile_ids_never_reach_the_filesystem() {
    let tmp = TempDir::new().unwrap();
    let _dirs = crate::app_dirs::isolate_for_test(tmp.path());
    let manager = TrafficStatsManager::instance();

    let outside = crate::app_dirs::data_dir().join("escaped.json");
    fs::create_dir_all(outside.parent().unwrap()).unwrap();
    fs::write(&outside, r#"{"profile_id":"x","session_start":0,"last_update":0,"total_bytes_sent":0,"total_bytes_received":0,"total_requests":0}"#).unwrap();

    let traversal = "../../escaped";
    assert!(manager.record(traversal, None, |s| s.record_ip("1.1.1.1")).is_err());
    assert!(manager.load(traversal).is_none());
    let err = manager.get_for_period(traversal, 0).unwrap_err();
    assert_eq!(err, "Invalid profile ID: ../../escaped");
    manager.remove_profile_stats(traversal);
    assert!(outside.exists());
    assert!(manager.list_all().is_empty());
  }

  #[tokio::test]
  async fn test_recorded_reports_feed_period_queries() {
    let tmp = TempDir::new().unwrap();
    let _dirs = crate::app_dirs::isolate_for_test(tmp.path());
    let profile = crate::profile::ProfileManager::instance()
      .create_profile(crate::profile::CreateProfileRequest {
        name: "Metered".to_string(),
        browser: "firefox".to_string(),
        version: "139.0".to_string(),
        ..Default::default()
      })
      .unwrap();
    let profile_id = profile.id.to_string();

    let report = TrafficReport {
      proxy_id: Some("proxy-1".to_string()),
      bytes_sent: 120,
      bytes_received: 4800,
      domain: Some("example.com".to_string()),
      ip: Some("203.0.113.7".to_string()),
    };
    record_traffic(profile_id.clone(), report.clone()).await.unwrap();
    let snapshot = record_traffic(profile_id.clone(), TrafficReport {
      domain: None,
      ..report
    })
    .await
    .unwrap();
    assert_eq!(snapshot.total_bytes_received, 9600);
    assert_eq!(snapshot.total_requests, 1);

    let period = get_traffic_stats_for_period(profile_id.clone(), 3600)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(period.period_bytes_sent, 240);
    assert_eq!(period.domains["example.com"].request_count, 1);
    assert_eq!(period.unique_ips, vec!["203.0.113.7"]);
    assert_eq!(get_all_traffic_stats().await.unwrap().len(), 1);

    let missing = record_traffic(
      "00000000-0000-4000-8000-000000000000".to_string(),
      TrafficReport::default(),
    )
    .await;
    assert!(missing.is_err());
  }
}
