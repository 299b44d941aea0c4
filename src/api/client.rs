use crate::config::Config;
use color_eyre::{eyre::eyre, Result};
use reqwest::{header, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use url::Url;

/// Status and body of a completed API request.
#[derive(Debug, Clone)]
pub struct ApiResponse {
  pub status: StatusCode,
  pub body: Vec<u8>,
}

impl ApiResponse {
  pub fn is_success(&self) -> bool {
    self.status.is_success()
  }

  pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
    serde_json::from_slice(&self.body).map_err(|e| eyre!("Invalid JSON response: {}", e))
  }
}

/// HTTP transport to the payroll API.
///
/// One request per call, no retries and no timeout.
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  origin: Url,
  session: Option<String>,
}

impl ApiClient {
  pub fn new(config: &Config) -> Result<Self> {
    Self::with_origin(config.origin_url()?, Config::get_session_cookie())
  }

  pub fn with_origin(origin: Url, session: Option<String>) -> Result<Self> {
    let http = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      origin,
      session,
    })
  }

  pub fn origin(&self) -> &Url {
    &self.origin
  }

  pub fn url(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid API path '{}': {}", path, e))
  }

  /// Send a request and read the whole body.
  ///
  /// Only transport failures are errors; any HTTP status is returned as-is.
  pub async fn request(
    &self,
    method: Method,
    path: &str,
    query: &[(&str, String)],
    body: Option<&Value>,
  ) -> Result<ApiResponse> {
    let url = self.url(path)?;
    let mut request = self.http.request(method.clone(), url);

    if !query.is_empty() {
      request = request.query(query);
    }
    if let Some(session) = &self.session {
      request = request.header(header::COOKIE, format!("session={}", session));
    }
    if let Some(body) = body {
      request = request.json(body);
    }

    let started = Instant::now();
    let response = request
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", path, e))?;

    let status = response.status();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response from {}: {}", path, e))?
      .to_vec();

    log_request(&method, path, status, started.elapsed());

    Ok(ApiResponse { status, body })
  }
}

/// Log a finished request, escalating the level for slow responses.
fn log_request(method: &Method, path: &str, status: StatusCode, elapsed: Duration) {
  let duration = format!("{:.3}s", elapsed.as_secs_f64());
  let status = status.as_u16();

  if elapsed < Duration::from_millis(100) {
    info!(%method, path, status, %duration, "request completed");
  } else if elapsed < Duration::from_millis(500) {
    warn!(%method, path, status, %duration, "slow request");
  } else {
    error!(%method, path, status, %duration, "very slow request");
  }
}
