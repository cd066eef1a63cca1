//! Live network access.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;

use crate::error::NetworkError;
use crate::http::{Headers, Request, Response};

/// A live fetch. Resolves with whatever status the server answered; only
/// transport failures are errors.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// `reqwest`-backed network with a bounded timeout per attempt.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if !request.body.is_empty() {
      builder = builder.body(request.body.clone());
    }

    let url = request.url.to_string();
    let response = builder
      .send()
      .await
      .map_err(|e| classify(&url, e))?;

    let status = response.status().as_u16();
    let mut headers = Headers::new();
    for (name, value) in response.headers() {
      if let Ok(value) = value.to_str() {
        headers.insert(name.as_str().to_string(), value.to_string());
      }
    }
    let body = response
      .bytes()
      .await
      .map_err(|e| classify(&url, e))?
      .to_vec();

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}

fn classify(url: &str, err: reqwest::Error) -> NetworkError {
  if err.is_timeout() {
    NetworkError::Timeout {
      url: url.to_string(),
    }
  } else if err.is_connect() {
    NetworkError::Connect {
      url: url.to_string(),
      reason: err.to_string(),
    }
  } else {
    NetworkError::Other(err.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  #[tokio::test]
  async fn test_unreachable_host_is_transport_error() {
    let network = HttpNetwork::new(Duration::from_millis(500)).unwrap();
    // Port 9 (discard) on localhost is essentially never listening
    let request = Request::get(Url::parse("http://127.0.0.1:9/").unwrap());
    assert!(network.fetch(&request).await.is_err());
  }
}
