use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Channel names pushed to connected clients.
pub mod names {
  pub const DOWNLOAD_PROGRESS: &str = "download-progress";
  pub const VERSION_UPDATE_PROGRESS: &str = "version-update-progress";
  pub const PROFILE_UPDATED: &str = "profile-updated";
  pub const PROFILE_RUNNING_CHANGED: &str = "profile-running-changed";
  pub const PROFILES_CHANGED: &str = "profiles-changed";
  pub const STORED_PROXIES_CHANGED: &str = "stored-proxies-changed";
  pub const GROUPS_CHANGED: &str = "groups-changed";
  pub const EXTENSIONS_CHANGED: &str = "extensions-changed";
  pub const GEOIP_DOWNLOAD_PROGRESS: &str = "geoip-download-progress";
  pub const URL_OPEN_REQUEST: &str = "url-open-request";
}

/// Sink for backend events.
///
/// Uses `serde_json::Value` so the trait stays dyn-compatible; call sites go
/// through [`emit`] and [`emit_empty`], which accept any `Serialize` payload.
pub trait EventEmitter: Send + Sync {
  fn emit_value(&self, event: &str, payload: serde_json::Value) -> Result<(), String>;
}

/// Event carried on the broadcast channel that feeds WebSocket clients.
#[derive(Clone, Debug)]
pub struct BroadcastEvent {
  pub event_type: String,
  pub payload: serde_json::Value,
}

/// Fans events out to every subscriber (one per WebSocket connection).
#[derive(Clone)]
pub struct BroadcastEmitter {
  tx: broadcast::Sender<BroadcastEvent>,
}

impl BroadcastEmitter {
  pub fn new(tx: broadcast::Sender<BroadcastEvent>) -> Self {
    Self { tx }
  }

  pub fn with_capacity(capacity: usize) -> (Self, broadcast::Receiver<BroadcastEvent>) {
    let (tx, rx) = broadcast::channel(capacity);
    (Self { tx }, rx)
  }

  pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
    self.tx.subscribe()
  }
}

impl EventEmitter for BroadcastEmitter {
  fn emit_value(&self, event: &str, payload: serde_json::Value) -> Result<(), String> {
    let event = BroadcastEvent {
      event_type: event.to_string(),
      payload,
    };
    // No subscribers is not an error
    let _ = self.tx.send(event);
    Ok(())
  }
}

#[derive(Clone, Default)]
pub struct NoopEmitter;

impl EventEmitter for NoopEmitter {
  fn emit_value(&self, _event: &str, _payload: serde_json::Value) -> Result<(), String> {
    Ok(())
  }
}

/// Keeps every emitted event in memory, in order. Used by the CLI `invoke`
/// subcommand to print side-effect events and by tests to assert on them.
#[derive(Clone, Default)]
pub struct RecordingEmitter {
  events: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
}

impl RecordingEmitter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn events(&self) -> Vec<(String, serde_json::Value)> {
    match self.events.lock() {
      Ok(events) => events.clone(),
      Err(poisoned) => poisoned.into_inner().clone(),
    }
  }

  pub fn events_named(&self, name: &str) -> Vec<serde_json::Value> {
    self
      .events()
      .into_iter()
      .filter(|(event, _)| event == name)
      .map(|(_, payload)| payload)
      .collect()
  }

  pub fn clear(&self) {
    if let Ok(mut events) = self.events.lock() {
      events.clear();
    }
  }
}

impl EventEmitter for RecordingEmitter {
  fn emit_value(&self, event: &str, payload: serde_json::Value) -> Result<(), String> {
    self
      .events
      .lock()
      .map_err(|e| e.to_string())?
      .push((event.to_string(), payload));
    Ok(())
  }
}

static GLOBAL_EMITTER: std::sync::OnceLock<Arc<dyn EventEmitter>> = std::sync::OnceLock::new();

/// Install the process-wide emitter. Call once during startup.
pub fn set_global_emitter(emitter: Arc<dyn EventEmitter>) -> Result<(), String> {
  GLOBAL_EMITTER
    .set(emitter)
    .map_err(|_| "Global emitter already set".to_string())
}

/// The process-wide emitter, or a no-op one if none has been installed.
pub fn global_emitter() -> Arc<dyn EventEmitter> {
  #[cfg(test)]
  {
    if let Some(emitter) = TEST_EMITTER.with(|cell| cell.borrow().clone()) {
      return emitter;
    }
  }

  GLOBAL_EMITTER
    .get()
    .cloned()
    .unwrap_or_else(|| Arc::new(NoopEmitter))
}

pub fn emit<S: Serialize>(event: &str, payload: S) -> Result<(), String> {
  let value = serde_json::to_value(payload).map_err(|e| e.to_string())?;
  global_emitter().emit_value(event, value)
}

pub fn emit_empty(event: &str) -> Result<(), String> {
  global_emitter().emit_value(event, serde_json::Value::Null)
}

#[cfg(test)]
thread_local! {
  static TEST_EMITTER: std::cell::RefCell<Option<Arc<dyn EventEmitter>>> = const { std::cell::RefCell::new(None) };
}

#[cfg(test)]
pub struct TestEmitterGuard;

#[cfg(test)]
impl Drop for TestEmitterGuard {
  fn drop(&mut self) {
    TEST_EMITTER.with(|cell| *cell.borrow_mut() = None);
  }
}

/// Route this thread's events into a fresh recorder until the guard drops.
#[cfg(test)]
pub fn record_for_test() -> (RecordingEmitter, TestEmitterGuard) {
  let recorder = RecordingEmitter::new();
  let shared: Arc<dyn EventEmitter> = Arc::new(recorder.clone());
  TEST_EMITTER.with(|cell| *cell.borrow_mut() = Some(shared));
  (recorder, TestEmitterGuard)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_broadcast_emitter_delivers_to_subscriber() {
    let (emitter, mut rx) = BroadcastEmitter::with_capacity(16);
    emitter
      .emit_value(names::PROFILE_UPDATED, serde_json::json!({"id": "abc"}))
      .unwrap();

    let event = rx.try_recv().unwrap();
    assert_eq!(event.event_type, "profile-updated");
    assert_eq!(event.payload["id"], "abc");
  }

  #[test]
  fn test_broadcast_emitter_without_receivers_is_ok() {
    let (tx, _) = broadcast::channel::<BroadcastEvent>(4);
    let emitter = BroadcastEmitter::new(tx);
    assert!(emitter
      .emit_value("anything", serde_json::Value::Null)
      .is_ok());
  }

  #[test]
  fn test_recording_emitter_keeps_order_and_filters() {
    let (recorder, _guard) = record_for_test();
    emit(names::STORED_PROXIES_CHANGED, "first").unwrap();
    emit_empty(names::PROFILES_CHANGED).unwrap();
    emit(names::STORED_PROXIES_CHANGED, "second").unwrap();

    let all = recorder.events();
    assert_eq!(all.len(), 3);
    assert_eq!(all[1].0, "profiles-changed");

    let proxies = recorder.events_named(names::STORED_PROXIES_CHANGED);
    assert_eq!(proxies, vec![serde_json::json!("first"), serde_json::json!("second")]);

    recorder.clear();
    assert!(recorder.events().is_empty());
  }

  #[test]
  fn test_emit_without_installed_emitter_is_noop() {
    assert!(emit("test", 42).is_ok());
    assert!(emit_empty("test").is_ok());
  }
}
