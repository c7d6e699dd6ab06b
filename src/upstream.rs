//! The network side: requests forwarded to the upstream origin.

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use url::Url;

/// Largest request body forwarded upstream.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Headers that describe a single hop, never copied in either direction.
const HOP_HEADERS: &[&str] = &[
  "connection",
  "content-length",
  "host",
  "keep-alive",
  "proxy-connection",
  "te",
  "trailer",
  "transfer-encoding",
  "upgrade",
];

/// Left to the HTTP client, which only advertises encodings it can decode.
const NEGOTIATED_HEADERS: &[&str] = &["accept-encoding"];

fn is_forwardable(name: &str) -> bool {
  !HOP_HEADERS.contains(&name.to_ascii_lowercase().as_str())
}

fn is_forwardable_upstream(name: &str) -> bool {
  is_forwardable(name) && !NEGOTIATED_HEADERS.contains(&name.to_ascii_lowercase().as_str())
}

/// A request as seen by the cache and the upstream client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
  pub method: String,
  /// Path and query, e.g. `/app.js?v=2`
  pub url: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl FetchRequest {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: "GET".to_string(),
      url: url.into(),
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  /// Capture an intercepted request, buffering its body.
  pub async fn from_request(request: axum::extract::Request) -> Result<Self> {
    let (parts, body) = request.into_parts();

    let url = parts
      .uri
      .path_and_query()
      .map(|pq| pq.as_str().to_string())
      .unwrap_or_else(|| "/".to_string());

    let headers = parts
      .headers
      .iter()
      .filter(|(name, _)| is_forwardable_upstream(name.as_str()))
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
      .await
      .map_err(|e| eyre!("Failed to read request body: {}", e))?;

    Ok(Self {
      method: parts.method.as_str().to_string(),
      url,
      headers,
      body: body.to_vec(),
    })
  }

  /// Stable, fixed-length key for the request identity (method + URL).
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.to_ascii_uppercase().as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A captured response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl FetchResponse {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  #[cfg(test)]
  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

impl IntoResponse for FetchResponse {
  fn into_response(self) -> Response {
    let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, Body::from(self.body)).into_response();

    let headers = response.headers_mut();
    for (name, value) in self.headers {
      if !is_forwardable(&name) {
        continue;
      }
      if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(&value),
      ) {
        headers.append(name, value);
      }
    }

    response
  }
}

/// Something that can perform a live fetch.
pub trait Upstream: Send + Sync + 'static {
  fn fetch(&self, request: &FetchRequest) -> impl Future<Output = Result<FetchResponse>> + Send;
}

/// Upstream origin reached over HTTP
#[derive(Clone)]
pub struct HttpUpstream {
  client: reqwest::Client,
  base: Url,
}

impl HttpUpstream {
  pub fn new(base: &str) -> Result<Self> {
    let base = Url::parse(base).map_err(|e| eyre!("Invalid upstream URL {}: {}", base, e))?;

    let client = reqwest::Client::builder()
      .redirect(reqwest::redirect::Policy::none())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base })
  }
}

impl Upstream for HttpUpstream {
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
    let url = self
      .base
      .join(&request.url)
      .map_err(|e| eyre!("Invalid request URL {}: {}", request.url, e))?;

    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid method {}: {}", request.method, e))?;

    let mut builder = self.client.request(method, url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if !request.body.is_empty() {
      builder = builder.body(request.body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;

    // A body the client decoded has its content-encoding removed already;
    // any that remains still applies to the bytes.
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter(|(name, _)| is_forwardable(name.as_str()))
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response from {}: {}", url, e))?;

    tracing::debug!(%url, status, "fetched from upstream");

    Ok(FetchResponse {
      status,
      headers,
      body: body.to_vec(),
    })
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cache_hash_depends_on_method_and_url() {
    let get = FetchRequest::get("/app.js");
    let mut post = FetchRequest::get("/app.js");
    post.method = "POST".to_string();

    assert_eq!(get.cache_hash(), FetchRequest::get("/app.js").cache_hash());
    assert_ne!(get.cache_hash(), post.cache_hash());
    assert_ne!(get.cache_hash(), FetchRequest::get("/app.js?v=2").cache_hash());
    assert_eq!(get.cache_hash().len(), 64);
  }

  #[test]
  fn test_cache_hash_ignores_body_and_headers() {
    let mut request = FetchRequest::get("/index.html");
    request.headers.push(("accept".to_string(), "text/html".to_string()));
    request.body = b"ignored".to_vec();

    assert_eq!(request.cache_hash(), FetchRequest::get("/index.html").cache_hash());
  }

  #[tokio::test]
  async fn test_from_request_captures_path_query_and_body() {
    let request = axum::http::Request::builder()
      .method("POST")
      .uri("/create?x=1")
      .header("host", "localhost")
      .header("content-type", "application/x-www-form-urlencoded")
      .body(Body::from("title=milk"))
      .unwrap();

    let captured = FetchRequest::from_request(request).await.unwrap();

    assert_eq!(captured.method, "POST");
    assert_eq!(captured.url, "/create?x=1");
    assert_eq!(captured.body, b"title=milk");
    assert!(captured.headers.iter().all(|(name, _)| name != "host"));
    assert!(captured
      .headers
      .iter()
      .any(|(name, _)| name == "content-type"));
  }

  #[tokio::test]
  async fn test_from_request_leaves_encoding_negotiation_to_client() {
    let request = axum::http::Request::builder()
      .uri("/app.js")
      .header("accept-encoding", "gzip, deflate, br, zstd")
      .header("accept", "*/*")
      .body(Body::empty())
      .unwrap();

    let captured = FetchRequest::from_request(request).await.unwrap();

    assert!(captured
      .headers
      .iter()
      .all(|(name, _)| name != "accept-encoding"));
    assert!(captured.headers.iter().any(|(name, _)| name == "accept"));
  }

  /// Origin that answers one connection with `response` and returns the
  /// request head it received.
  async fn one_shot_origin(response: Vec<u8>) -> (String, tokio::task::JoinHandle<String>) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
      let (mut socket, _) = listener.accept().await.unwrap();
      let mut seen = Vec::new();
      let mut buf = [0u8; 1024];
      while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
          break;
        }
        seen.extend_from_slice(&buf[..n]);
      }
      socket.write_all(&response).await.unwrap();
      socket.shutdown().await.ok();
      String::from_utf8_lossy(&seen).to_ascii_lowercase()
    });

    (format!("http://{}", addr), handle)
  }

  #[tokio::test]
  async fn test_undecoded_body_keeps_content_encoding() {
    let compressed: Vec<u8> = vec![27, 5, 0, 248, 165, 4, 146, 18, 0];
    let mut raw = format!(
      "HTTP/1.1 200 OK\r\ncontent-type: text/javascript\r\ncontent-encoding: br\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
      compressed.len()
    )
    .into_bytes();
    raw.extend_from_slice(&compressed);

    let (base, origin) = one_shot_origin(raw).await;
    let browser = axum::http::Request::builder()
      .uri("/app.js")
      .header("accept-encoding", "gzip, deflate, br, zstd")
      .body(Body::empty())
      .unwrap();
    let request = FetchRequest::from_request(browser).await.unwrap();

    let fetched = HttpUpstream::new(&base).unwrap().fetch(&request).await.unwrap();
    let head = origin.await.unwrap();

    assert!(!head.contains("zstd"));
    assert!(!head.contains(", br"));
    assert_eq!(fetched.body, compressed);
    assert!(fetched
      .headers
      .contains(&("content-encoding".to_string(), "br".to_string())));

    let response = fetched.into_response();
    assert_eq!(response.headers()["content-encoding"], "br");
    assert_eq!(response.headers()["content-type"], "text/javascript");
  }

  #[test]
  fn test_into_response_drops_hop_headers() {
    let response = FetchResponse::new(200, "ok")
      .with_header("content-type", "text/plain")
      .with_header("transfer-encoding", "chunked")
      .into_response();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/plain");
    assert!(response.headers().get("transfer-encoding").is_none());
  }

  #[test]
  fn test_invalid_upstream_url_is_rejected() {
    assert!(HttpUpstream::new("not a url").is_err());
    assert!(HttpUpstream::new("http://127.0.0.1:3000").is_ok());
  }
}
