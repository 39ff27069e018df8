use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

/// A GET request against the flag server, relative to the transport's base URL.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub path: String,
    pub query: Vec<(String, String)>,
    pub timeout: Duration,
}

/// The status and body of a completed request. Non-2xx statuses are still a `Response`; deciding
/// what they mean is up to the caller.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("could not connect to flag server")]
    Connect(#[source] Box<dyn StdError + Send + Sync>),
    #[error("flag server responded with status {status}")]
    Status { status: u16, body: String },
    #[error("request failed")]
    Other(#[source] Box<dyn StdError + Send + Sync>),
}

/// Transport is the capability to perform a single GET and hand back the status and body.
///
/// Connection pooling, TLS and any transport-level retries are the implementation's business;
/// the service calls [Transport::get] at most once per instance.
pub trait Transport: Send + Sync {
    fn get(&self, request: &Request) -> Result<Response, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn get(&self, request: &Request) -> Result<Response, TransportError> {
        (**self).get(request)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn get(&self, request: &Request) -> Result<Response, TransportError> {
        (**self).get(request)
    }
}

/// The default [Transport], backed by a blocking reqwest client.
///
/// Every request carries an `Authorization` header with the token given at construction. The
/// blocking client must not be driven from inside an async runtime's worker thread.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, auth_token: &str) -> Result<Self, TransportError> {
        let mut token =
            HeaderValue::from_str(auth_token).map_err(|e| TransportError::Other(Box::new(e)))?;
        token.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, token);

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::Other(Box::new(e)))?;

        let base_url: String = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Transport for HttpTransport {
    fn get(&self, request: &Request) -> Result<Response, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);
        debug!("GET {}", url);

        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                TransportError::Timeout(request.timeout)
            } else if e.is_connect() {
                TransportError::Connect(Box::new(e))
            } else {
                TransportError::Other(Box::new(e))
            }
        };

        let response = self
            .client
            .get(url)
            .query(&request.query)
            .timeout(request.timeout)
            .send()
            .map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.text().map_err(classify)?;

        Ok(Response { status, body })
    }
}
