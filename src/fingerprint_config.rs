use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::validation::{validate_fingerprint_json, ValidationError};

pub const SUPPORTED_FINGERPRINT_OS: [&str; 3] = ["windows", "macos", "linux"];

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CamoufoxConfig {
  #[serde(default)]
  pub os: Option<String>,
  /// `true`/`false`, or an explicit IP address to geolocate.
  #[serde(default)]
  pub geoip: Option<serde_json::Value>,
  #[serde(default)]
  pub locale: Option<String>,
  #[serde(default)]
  pub timezone: Option<String>,
  #[serde(default)]
  pub screen_max_width: Option<u32>,
  #[serde(default)]
  pub screen_max_height: Option<u32>,
  #[serde(default)]
  pub screen_min_width: Option<u32>,
  #[serde(default)]
  pub screen_min_height: Option<u32>,
  #[serde(default)]
  pub window_width: Option<u32>,
  #[serde(default)]
  pub window_height: Option<u32>,
  #[serde(default)]
  pub webgl_vendor: Option<String>,
  #[serde(default)]
  pub webgl_renderer: Option<String>,
  #[serde(default)]
  pub block_images: Option<bool>,
  #[serde(default)]
  pub block_webrtc: Option<bool>,
  #[serde(default)]
  pub block_webgl: Option<bool>,
  #[serde(default)]
  pub disable_cache: Option<bool>,
  #[serde(default)]
  pub allow_eval: Option<bool>,
  /// Complete fingerprint as a JSON document, stored as-is.
  #[serde(default)]
  pub fingerprint: Option<String>,
  #[serde(default)]
  pub randomize_fingerprint_on_launch: Option<bool>,
  #[serde(default)]
  pub executable_path: Option<String>,
}

impl Default for CamoufoxConfig {
  fn default() -> Self {
    Self {
      os: None,
      geoip: Some(serde_json::Value::Bool(true)),
      locale: None,
      timezone: None,
      screen_max_width: None,
      screen_max_height: None,
      screen_min_width: None,
      screen_min_height: None,
      window_width: None,
      window_height: None,
      webgl_vendor: None,
      webgl_renderer: None,
      block_images: None,
      block_webrtc: None,
      block_webgl: None,
      disable_cache: None,
      allow_eval: None,
      fingerprint: None,
      randomize_fingerprint_on_launch: None,
      executable_path: None,
    }
  }
}

impl CamoufoxConfig {
  pub fn validate(&self) -> Result<(), ValidationError> {
    validate_common(&CommonFields {
      os: self.os.as_deref(),
      geoip: self.geoip.as_ref(),
      fingerprint: self.fingerprint.as_deref(),
      min: (self.screen_min_width, self.screen_min_height),
      max: (self.screen_max_width, self.screen_max_height),
    })
  }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct WayfernConfig {
  #[serde(default)]
  pub os: Option<String>,
  #[serde(default)]
  pub geoip: Option<serde_json::Value>,
  #[serde(default)]
  pub locale: Option<String>,
  #[serde(default)]
  pub timezone: Option<String>,
  #[serde(default)]
  pub screen_max_width: Option<u32>,
  #[serde(default)]
  pub screen_max_height: Option<u32>,
  #[serde(default)]
  pub screen_min_width: Option<u32>,
  #[serde(default)]
  pub screen_min_height: Option<u32>,
  #[serde(default)]
  pub webgl_vendor: Option<String>,
  #[serde(default)]
  pub webgl_renderer: Option<String>,
  #[serde(default)]
  pub block_images: Option<bool>,
  #[serde(default)]
  pub block_webrtc: Option<bool>,
  #[serde(default)]
  pub block_webgl: Option<bool>,
  #[serde(default)]
  pub fingerprint: Option<String>,
  #[serde(default)]
  pub randomize_fingerprint_on_launch: Option<bool>,
  #[serde(default)]
  pub executable_path: Option<String>,
}

impl WayfernConfig {
  pub fn validate(&self) -> Result<(), ValidationError> {
    validate_common(&CommonFields {
      os: self.os.as_deref(),
      geoip: self.geoip.as_ref(),
      fingerprint: self.fingerprint.as_deref(),
      min: (self.screen_min_width, self.screen_min_height),
      max: (self.screen_max_width, self.screen_max_height),
    })
  }
}

struct CommonFields<'a> {
  os: Option<&'a str>,
  geoip: Option<&'a serde_json::Value>,
  fingerprint: Option<&'a str>,
  min: (Option<u32>, Option<u32>),
  max: (Option<u32>, Option<u32>),
}

fn validate_common(fields: &CommonFields<'_>) -> Result<(), ValidationError> {
  validate_fingerprint_json(fields.fingerprint)?;

  if let Some(os) = fields.os {
    if !SUPPORTED_FINGERPRINT_OS.contains(&os) {
      return Err(ValidationError::UnsupportedOs(os.to_string()));
    }
  }

  match fields.geoip {
    None | Some(serde_json::Value::Bool(_)) | Some(serde_json::Value::Null) => {}
    Some(serde_json::Value::String(ip)) => {
      ip.parse::<IpAddr>()
        .map_err(|_| ValidationError::InvalidGeoip(ip.clone()))?;
    }
    Some(other) => return Err(ValidationError::InvalidGeoip(other.to_string())),
  }

  for (axis, min, max) in [
    ("width", fields.min.0, fields.max.0),
    ("height", fields.min.1, fields.max.1),
  ] {
    if min == Some(0) || max == Some(0) {
      return Err(ValidationError::InvalidScreenBounds(format!(
        "{axis} must be greater than zero"
      )));
    }
    if let (Some(min), Some(max)) = (min, max) {
      if min > max {
        return Err(ValidationError::InvalidScreenBounds(format!(
          "minimum {axis} {min} exceeds maximum {max}"
        )));
      }
    }
  }

  Ok(())
}
