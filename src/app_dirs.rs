use directories::BaseDirs;
use std::path::PathBuf;
use std::sync::OnceLock;

static BASE_DIRS: OnceLock<Option<BaseDirs>> = OnceLock::new();

pub const DATA_DIR_ENV: &str = "DONUT_PROFILES_DATA_DIR";
pub const CACHE_DIR_ENV: &str = "DONUT_PROFILES_CACHE_DIR";

fn base_dirs() -> Option<&'static BaseDirs> {
  BASE_DIRS.get_or_init(BaseDirs::new).as_ref()
}

pub fn app_name() -> &'static str {
  if cfg!(debug_assertions) {
    "DonutProfilesDev"
  } else {
    "DonutProfiles"
  }
}

/// Root of all persisted state. Resolution order: test override, env var,
/// platform data dir, and finally the system temp dir when no home exists.
pub fn data_dir() -> PathBuf {
  #[cfg(test)]
  {
    if let Some(dir) = TEST_DATA_DIR.with(|cell| cell.borrow().clone()) {
      return dir;
    }
  }

  if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
    return PathBuf::from(dir);
  }

  match base_dirs() {
    Some(dirs) => dirs.data_local_dir().join(app_name()),
    None => std::env::temp_dir().join(app_name()),
  }
}

pub fn cache_dir() -> PathBuf {
  #[cfg(test)]
  {
    if let Some(dir) = TEST_CACHE_DIR.with(|cell| cell.borrow().clone()) {
      return dir;
    }
  }

  if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
    return PathBuf::from(dir);
  }

  match base_dirs() {
    Some(dirs) => dirs.cache_dir().join(app_name()),
    None => std::env::temp_dir().join(app_name()).join("cache"),
  }
}

pub fn profiles_dir() -> PathBuf {
  data_dir().join("profiles")
}

pub fn binaries_dir() -> PathBuf {
  data_dir().join("binaries")
}

pub fn data_subdir() -> PathBuf {
  data_dir().join("data")
}

pub fn settings_dir() -> PathBuf {
  data_dir().join("settings")
}

pub fn proxies_dir() -> PathBuf {
  data_dir().join("proxies")
}

pub fn extensions_dir() -> PathBuf {
  data_dir().join("extensions")
}

pub fn version_cache_dir() -> PathBuf {
  cache_dir().join("version_cache")
}

pub fn traffic_stats_dir() -> PathBuf {
  cache_dir().join("traffic_stats")
}

pub fn geoip_dir() -> PathBuf {
  cache_dir().join("geoip")
}

#[cfg(test)]
thread_local! {
  static TEST_DATA_DIR: std::cell::RefCell<Option<PathBuf>> = const { std::cell::RefCell::new(None) };
  static TEST_CACHE_DIR: std::cell::RefCell<Option<PathBuf>> = const { std::cell::RefCell::new(None) };
}

#[cfg(test)]
pub struct TestDirGuard {
  kind: TestDirKind,
}

#[cfg(test)]
enum TestDirKind {
  Data,
  Cache,
}

#[cfg(test)]
impl Drop for TestDirGuard {
  fn drop(&mut self) {
    match self.kind {
      TestDirKind::Data => TEST_DATA_DIR.with(|cell| *cell.borrow_mut() = None),
      TestDirKind::Cache => TEST_CACHE_DIR.with(|cell| *cell.borrow_mut() = None),
    }
  }
}

#[cfg(test)]
pub fn set_test_data_dir(dir: PathBuf) -> TestDirGuard {
  TEST_DATA_DIR.with(|cell| *cell.borrow_mut() = Some(dir));
  TestDirGuard {
    kind: TestDirKind::Data,
  }
}

#[cfg(test)]
pub fn set_test_cache_dir(dir: PathBuf) -> TestDirGuard {
  TEST_CACHE_DIR.with(|cell| *cell.borrow_mut() = Some(dir));
  TestDirGuard {
    kind: TestDirKind::Cache,
  }
}

/// Points both the data and cache dirs at subfolders of `root` for the
/// lifetime of the returned guards.
#[cfg(test)]
pub fn isolate_for_test(root: &std::path::Path) -> (TestDirGuard, TestDirGuard) {
  (
    set_test_data_dir(root.join("data-root")),
    set_test_cache_dir(root.join("cache-root")),
  )
}
