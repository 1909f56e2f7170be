use thiserror::Error;

use crate::browser::ProxySettings;

pub const SUPPORTED_PROXY_TYPES: [&str; 4] = ["http", "https", "socks4", "socks5"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
  #[error("{kind} name cannot be empty")]
  EmptyName { kind: &'static str },
  #[error("{kind} with name '{name}' already exists")]
  DuplicateName { kind: &'static str, name: String },
  #[error("Invalid fingerprint configuration: {0}")]
  InvalidFingerprint(String),
  #[error("Invalid proxy port: {0}")]
  InvalidProxyPort(u32),
  #[error("Invalid proxy host: host cannot be empty")]
  EmptyProxyHost,
  #[error("Unsupported proxy type '{0}', expected one of http, https, socks4, socks5")]
  UnsupportedProxyType(String),
  #[error("{0} does not support proxy configuration")]
  ProxyNotSupported(String),
  #[error("Invalid {kind} id '{id}'")]
  InvalidId { kind: &'static str, id: String },
  #[error("Invalid screen bounds: {0}")]
  InvalidScreenBounds(String),
  #[error("Unsupported operating system '{0}', expected windows, macos or linux")]
  UnsupportedOs(String),
  #[error("Invalid geoip value: {0}")]
  InvalidGeoip(String),
}

/// Rejects `name` when it is blank or when any of `existing` matches it
/// case-insensitively (after trimming).
pub fn ensure_unique_name<'a, I>(
  kind: &'static str,
  name: &str,
  existing: I,
) -> Result<(), ValidationError>
where
  I: IntoIterator<Item = &'a str>,
{
  let trimmed = name.trim();
  if trimmed.is_empty() {
    return Err(ValidationError::EmptyName { kind });
  }

  let needle = trimmed.to_lowercase();
  if existing
    .into_iter()
    .any(|other| other.trim().to_lowercase() == needle)
  {
    return Err(ValidationError::DuplicateName {
      kind,
      name: trimmed.to_string(),
    });
  }

  Ok(())
}

/// The `fingerprint` field is stored opaquely but must at least be JSON.
/// Empty or whitespace-only strings count as "not set".
pub fn validate_fingerprint_json(fingerprint: Option<&str>) -> Result<(), ValidationError> {
  match fingerprint {
    Some(raw) if !raw.trim().is_empty() => serde_json::from_str::<serde_json::Value>(raw)
      .map(|_| ())
      .map_err(|e| ValidationError::InvalidFingerprint(e.to_string())),
    _ => Ok(()),
  }
}

/// Ids that become file names: ASCII letters, digits, `-` and `_` only.
pub fn validate_storage_id(kind: &'static str, id: &str) -> Result<(), ValidationError> {
  let valid = !id.is_empty()
    && id.len() <= 128
    && id
      .bytes()
      .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
  if valid {
    Ok(())
  } else {
    Err(ValidationError::InvalidId {
      kind,
      id: id.to_string(),
    })
  }
}

pub fn validate_proxy_port(port: u32) -> Result<u16, ValidationError> {
  match u16::try_from(port) {
    Ok(p) if p > 0 => Ok(p),
    _ => Err(ValidationError::InvalidProxyPort(port)),
  }
}

pub fn validate_proxy_settings(settings: &ProxySettings) -> Result<(), ValidationError> {
  if !SUPPORTED_PROXY_TYPES.contains(&settings.proxy_type.to_lowercase().as_str()) {
    return Err(ValidationError::UnsupportedProxyType(
      settings.proxy_type.clone(),
    ));
  }
  if settings.host.trim().is_empty() {
    return Err(ValidationError::EmptyProxyHost);
  }
  validate_proxy_port(u32::from(settings.port))?;
  Ok(())
}
