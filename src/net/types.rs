use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Header set with lowercased names.
pub type Headers = BTreeMap<String, String>;

/// How the application issued a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestMode {
  /// Top-level page navigation
  Navigate,
  /// Subresource or script-initiated request
  #[default]
  Other,
}

/// An outgoing HTTP request as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
  #[serde(default = "default_method")]
  pub method: String,
  /// Absolute URL or origin-relative path
  pub url: String,
  #[serde(default)]
  pub headers: Headers,
  #[serde(default, with = "wire_body")]
  pub body: Option<Vec<u8>>,
  #[serde(default)]
  pub mode: RequestMode,
}

fn default_method() -> String {
  "GET".to_string()
}

impl Request {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: default_method(),
      url: url.into(),
      headers: Headers::new(),
      body: None,
      mode: RequestMode::Other,
    }
  }

  #[cfg(test)]
  pub fn navigate(url: impl Into<String>) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  #[cfg(test)]
  pub fn with_method(mut self, method: &str) -> Self {
    self.method = method.to_string();
    self
  }

  #[cfg(test)]
  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_lowercase(), value.to_string());
    self
  }

  #[cfg(test)]
  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }

  /// Whether this is a read request (GET).
  pub fn is_read(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }
}

/// Immutable snapshot of a response: status, headers and the full body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
  pub status: u16,
  #[serde(default)]
  pub headers: Headers,
  #[serde(default, with = "wire_body::required")]
  pub body: Vec<u8>,
}

impl ResponseSnapshot {
  pub fn new(status: u16) -> Self {
    Self {
      status,
      headers: Headers::new(),
      body: Vec::new(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_lowercase(), value.to_string());
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = body.into();
    self
  }

  /// 2xx status.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Synthesized response for a read with no live, cached or offline answer.
  pub fn service_unavailable() -> Self {
    Self::new(503)
  }
}

/// Body encoding on the JSON host protocol.
///
/// UTF-8 bodies travel as plain strings and anything else as
/// `{"base64": "..."}`. Byte arrays are accepted on input too.
pub(crate) mod wire_body {
  use base64::{engine::general_purpose::STANDARD, Engine};
  use serde::{Deserialize, Deserializer, Serialize, Serializer};

  #[derive(Serialize)]
  struct Encoded<'a> {
    base64: &'a str,
  }

  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Wire {
    Text(String),
    Encoded { base64: String },
    Bytes(Vec<u8>),
  }

  impl Wire {
    fn into_bytes<E: serde::de::Error>(self) -> Result<Vec<u8>, E> {
      match self {
        Wire::Text(text) => Ok(text.into_bytes()),
        Wire::Encoded { base64 } => STANDARD
          .decode(base64.as_bytes())
          .map_err(|e| E::custom(format!("invalid base64 body: {}", e))),
        Wire::Bytes(bytes) => Ok(bytes),
      }
    }
  }

  fn encode<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    match std::str::from_utf8(bytes) {
      Ok(text) => serializer.serialize_str(text),
      Err(_) => Encoded {
        base64: &STANDARD.encode(bytes),
      }
      .serialize(serializer),
    }
  }

  pub fn serialize<S>(body: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    match body {
      Some(bytes) => encode(bytes, serializer),
      None => serializer.serialize_none(),
    }
  }

  pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
  where
    D: Deserializer<'de>,
  {
    Option::<Wire>::deserialize(deserializer)?
      .map(Wire::into_bytes::<D::Error>)
      .transpose()
  }

  pub mod required {
    use super::{encode, Wire};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
      S: Serializer,
    {
      encode(body, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
      D: Deserializer<'de>,
    {
      Wire::deserialize(deserializer)?.into_bytes::<D::Error>()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_request_defaults_from_json() {
    let request: Request = serde_json::from_str(r#"{"url": "/lists"}"#).unwrap();
    assert_eq!(request.method, "GET");
    assert!(request.is_read());
    assert!(!request.is_navigation());
    assert_eq!(request.body, None);
  }

  #[test]
  fn test_request_text_body() {
    let request: Request = serde_json::from_str(
      r#"{"method": "POST", "url": "/shopping_list/42", "body": "{\"qty\":2}", "mode": "navigate"}"#,
    )
    .unwrap();
    assert!(!request.is_read());
    assert!(request.is_navigation());
    assert_eq!(request.body.as_deref(), Some(br#"{"qty":2}"#.as_slice()));
  }

  #[test]
  fn test_binary_body_survives_json() {
    let png = vec![137, 80, 78, 71, 13, 10, 26, 10, 255, 0];
    let response = ResponseSnapshot::new(200)
      .with_header("content-type", "image/png")
      .with_body(png.clone());

    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["body"]["base64"], "iVBORw0KGgr/AA==");

    let back: ResponseSnapshot = serde_json::from_value(json).unwrap();
    assert_eq!(back.body, png);
  }

  #[test]
  fn test_text_body_stays_a_string() {
    let json = serde_json::to_value(ResponseSnapshot::new(200).with_body("hello")).unwrap();
    assert_eq!(json["body"], "hello");
  }

  #[test]
  fn test_request_body_accepts_base64_and_byte_array() {
    let encoded: Request =
      serde_json::from_str(r#"{"method": "PUT", "url": "/avatar", "body": {"base64": "/wA="}}"#)
        .unwrap();
    assert_eq!(encoded.body, Some(vec![255, 0]));

    let array: Request =
      serde_json::from_str(r#"{"method": "PUT", "url": "/avatar", "body": [255, 0]}"#).unwrap();
    assert_eq!(array.body, Some(vec![255, 0]));

    let bad = serde_json::from_str::<Request>(r#"{"url": "/", "body": {"base64": "!!"}}"#);
    assert!(bad.is_err());
  }

  #[test]
  fn test_success_range() {
    assert!(ResponseSnapshot::new(200).is_success());
    assert!(ResponseSnapshot::new(204).is_success());
    assert!(!ResponseSnapshot::new(304).is_success());
    assert!(!ResponseSnapshot::service_unavailable().is_success());
  }
}
