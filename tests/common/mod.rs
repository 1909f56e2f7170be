#![allow(dead_code)]

use donut_profiles_lib::app_dirs::{CACHE_DIR_ENV, DATA_DIR_ENV};
use donut_profiles_lib::events::{self, BroadcastEmitter, BroadcastEvent};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Points the process-wide data and cache dirs at fresh temp dirs until dropped.
/// Tests using it must be `#[serial]` since the override is an env var.
pub struct TestEnv {
  pub data: TempDir,
  pub cache: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    let data = TempDir::new().expect("data dir");
    let cache = TempDir::new().expect("cache dir");
    std::env::set_var(DATA_DIR_ENV, data.path());
    std::env::set_var(CACHE_DIR_ENV, cache.path());
    Self { data, cache }
  }
}

impl Drop for TestEnv {
  fn drop(&mut self) {
    std::env::remove_var(DATA_DIR_ENV);
    std::env::remove_var(CACHE_DIR_ENV);
  }
}

/// The emitter installed for the whole test binary. The global slot can only
/// be filled once, so every test shares it and subscribes for its own events.
pub fn shared_emitter() -> Arc<BroadcastEmitter> {
  static EMITTER: OnceLock<Arc<BroadcastEmitter>> = OnceLock::new();
  EMITTER
    .get_or_init(|| {
      let (emitter, _rx) = BroadcastEmitter::with_capacity(1024);
      let emitter = Arc::new(emitter);
      let _ = events::set_global_emitter(emitter.clone());
      emitter
    })
    .clone()
}

/// Everything already queued on `rx`, without waiting.
pub fn drain(rx: &mut broadcast::Receiver<BroadcastEvent>) -> Vec<BroadcastEvent> {
  let mut out = Vec::new();
  while let Ok(event) = rx.try_recv() {
    out.push(event);
  }
  out
}

pub fn names(events: &[BroadcastEvent]) -> Vec<&str> {
  events.iter().map(|e| e.event_type.as_str()).collect()
}

pub const SHORT_TIMEOUT: Duration = Duration::from_secs(5);

/// A minimal `.xpi`: a zip with a manifest.
pub fn sample_xpi() -> Vec<u8> {
  use std::io::Write;
  let mut buf = std::io::Cursor::new(Vec::new());
  {
    let mut writer = zip::ZipWriter::new(&mut buf);
    writer
      .start_file("manifest.json", zip::write::SimpleFileOptions::default())
      .expect("start file");
    writer
      .write_all(br#"{"manifest_version":2,"name":"Sample","version":"1.0"}"#)
      .expect("write manifest");
    writer.finish().expect("finish zip");
  }
  buf.into_inner()
}
