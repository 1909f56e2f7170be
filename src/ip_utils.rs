//! Public IP discovery, optionally through a proxy.

use std::net::IpAddr;
use std::time::Duration;

pub const PUBLIC_IP_ENDPOINTS: [&str; 4] = [
  "https://api.ipify.org",
  "https://checkip.amazonaws.com",
  "https://ipinfo.io/ip",
  "https://icanhazip.com",
];

#[derive(Debug, thiserror::Error)]
pub enum IpError {
  #[error("Network error: {0}")]
  Network(String),

  #[error("Invalid proxy: {0}")]
  InvalidProxy(String),
}

pub fn validate_ip(ip: &str) -> bool {
  ip.parse::<IpAddr>().is_ok()
}

/// Fetch the public IP as seen through `proxy_url`, trying each endpoint in
/// turn until one answers with a valid address.
pub async fn fetch_public_ip_from(
  endpoints: &[&str],
  proxy_url: Option<&str>,
  timeout: Duration,
) -> Result<String, IpError> {
  let mut builder = reqwest::Client::builder().timeout(timeout);
  if let Some(proxy_url) = proxy_url {
    let proxy =
      reqwest::Proxy::all(proxy_url).map_err(|e| IpError::InvalidProxy(e.to_string()))?;
    builder = builder.proxy(proxy);
  } else {
    builder = builder.no_proxy();
  }
  let client = builder
    .build()
    .map_err(|e| IpError::Network(e.to_string()))?;

  let mut last_error = None;
  for url in endpoints {
    match client.get(*url).send().await {
      Ok(response) if response.status().is_success() => match response.text().await {
        Ok(text) => {
          let ip = text.trim().to_string();
          if validate_ip(&ip) {
            return Ok(ip);
          }
          last_error = Some(format!("{url} returned a non-IP body"));
        }
        Err(e) => last_error = Some(format!("Failed to read response from {url}: {e}")),
      },
      Ok(response) => last_error = Some(format!("HTTP {} from {url}", response.status())),
      Err(e) => last_error = Some(format!("Request to {url} failed: {e}")),
    }
  }

  Err(IpError::Network(last_error.unwrap_or_else(|| {
    "Failed to fetch public IP from any endpoint".to_string()
  })))
}

pub async fn fetch_public_ip(proxy_url: Option<&str>) -> Result<String, IpError> {
  fetch_public_ip_from(&PUBLIC_IP_ENDPOINTS, proxy_url, Duration::from_secs(10)).await
}

#[cfg(test)]
mod tests {
  use super::*;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  #[test]
  fn test_validate_ip() {
    assert!(validate_ip("8.8.8.8"));
    assert!(validate_ip("2001:4860:4860::8888"));
    assert!(!validate_ip("invalid"));
    assert!(!validate_ip("256.256.256.256"));
  }

  #[tokio::test]
  async fn test_falls_through_to_next_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/broken"))
      .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/ip"))
      .respond_with(ResponseTemplate::new(200).set_body_string("203.0.113.9\n"))
      .mount(&server)
      .await;

    let broken = format!("{}/broken", server.uri());
    let good = format!("{}/ip", server.uri());
    let ip = fetch_public_ip_from(&[&broken, &good], None, Duration::from_secs(5))
      .await
      .unwrap();
    assert_eq!(ip, "203.0.113.9");
  }

  #[tokio::test]
  async fn test_all_endpoints_failing_reports_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(502))
      .mount(&server)
      .await;

    let url = format!("{}/ip", server.uri());
    let err = fetch_public_ip_from(&[&url], None, Duration::from_secs(5))
      .await
      .unwrap_err();
    assert!(err.to_string().contains("502"));
  }

  #[tokio::test]
  async fn test_invalid_proxy_url_is_rejected() {
    let err = fetch_public_ip_from(&["http://127.0.0.1:9"], Some("::not a url::"), Duration::from_secs(1))
      .await
      .unwrap_err();
    assert!(matches!(err, IpError::InvalidProxy(_)));
  }
}
