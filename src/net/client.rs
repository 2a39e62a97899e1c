use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::time::Duration;
use url::Url;

use super::types::{Headers, Request, ResponseSnapshot};

/// Anything that can put a request on the wire.
///
/// An `Err` means the request never produced a response (unreachable host,
/// rejected connection, timeout). Any HTTP status, including 5xx, is an `Ok`.
pub trait Network: Send + Sync + 'static {
  fn send(&self, request: Request) -> impl Future<Output = Result<ResponseSnapshot>> + Send;
}

/// Network access through reqwest, resolving relative URLs against the origin.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  origin: Url,
}

impl HttpNetwork {
  pub fn new(origin: Url, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, origin })
  }
}

impl Network for HttpNetwork {
  async fn send(&self, request: Request) -> Result<ResponseSnapshot> {
    let url = self
      .origin
      .join(&request.url)
      .map_err(|e| eyre!("Invalid request URL '{}': {}", request.url, e))?;

    let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
      .map_err(|e| eyre!("Invalid HTTP method '{}': {}", request.method, e))?;

    let mut builder = self.client.request(method, url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body {
      builder = builder.body(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", url, e))?;

    let status = response.status().as_u16();
    let headers = collect_headers(response.headers());

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body from {}: {}", url, e))?
      .to_vec();

    Ok(ResponseSnapshot {
      status,
      headers,
      body,
    })
  }
}

/// Flatten a header map, joining repeated fields with `, `.
///
/// Values that are not valid UTF-8 are kept lossily rather than dropped.
fn collect_headers(map: &reqwest::header::HeaderMap) -> Headers {
  let mut headers = Headers::new();
  for (name, value) in map {
    let value = String::from_utf8_lossy(value.as_bytes());
    headers
      .entry(name.as_str().to_string())
      .and_modify(|joined: &mut String| {
        joined.push_str(", ");
        joined.push_str(&value);
      })
      .or_insert_with(|| value.to_string());
  }
  headers
}

/// Whether a mutating request counts as delivered.
///
/// Transport errors and 5xx responses are failures and keep the action queued.
/// Every other status is a definitive answer from the server.
pub fn is_delivered(result: &Result<ResponseSnapshot>) -> bool {
  match result {
    Ok(response) => response.status < 500,
    Err(_) => false,
  }
}
