//! HTTP transport seam.
//!
//! The client never talks to the network directly: it builds an [`HttpRequest`]
//! and hands it to a [`Transport`]. Status codes are not interpreted here;
//! redirects, retries and auth failures are handled by the client.

use std::fmt;
use std::io::Read;
use std::time::Duration;

use url::Url;

use crate::{Error, Result};

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
        }
    }
}

/// Request body.
pub enum Body {
    Empty,
    Bytes(Vec<u8>),
    /// Streamed body; `length` of `None` selects chunked encoding.
    Stream {
        reader: Box<dyn Read + Send>,
        length: Option<u64>,
    },
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Body::Stream { length, .. } => write!(f, "Stream({:?})", length),
        }
    }
}

/// An HTTP request ready to be executed.
#[derive(Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl HttpRequest {
    pub fn new(method: Method, url: &Url) -> Self {
        HttpRequest {
            method,
            url: url.clone(),
            headers: Vec::new(),
            body: Body::Empty,
        }
    }

    /// Set a header.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Set the body.
    pub fn body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Get a header value (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Add headers from an LFS link.
    ///
    /// `Transfer-Encoding` is never copied: a `chunked` value switches a
    /// streamed body to chunked encoding instead.
    pub fn add_link_headers<'a>(&mut self, headers: impl IntoIterator<Item = (&'a String, &'a String)>) {
        for (name, value) in headers {
            if name.eq_ignore_ascii_case("Transfer-Encoding") {
                if let Body::Stream { length, .. } = &mut self.body {
                    if value.eq_ignore_ascii_case("chunked") {
                        *length = None;
                    }
                }
            } else {
                self.headers.push((name.clone(), value.clone()));
            }
        }
    }
}

/// An HTTP response with an unread body.
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Box<dyn Read + Send>,
}

impl HttpResponse {
    /// Get a header value (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Deserialize the body as JSON.
    pub fn into_json<T: serde::de::DeserializeOwned>(self) -> Result<T> {
        Ok(serde_json::from_reader(self.body)?)
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Executes HTTP requests.
///
/// Implementations return every response the server produced, whatever its
/// status; only failures to obtain a response are errors.
pub trait Transport: Send + Sync {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// [`Transport`] backed by a `ureq` agent.
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    /// Create a transport with default settings.
    pub fn new() -> Self {
        UreqTransport::builder().build()
    }

    /// Start configuring a transport.
    pub fn builder() -> UreqTransportBuilder {
        UreqTransportBuilder::default()
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        UreqTransport::new()
    }
}

/// Builder for [`UreqTransport`].
#[derive(Debug, Clone, Default)]
pub struct UreqTransportBuilder {
    user_agent: Option<String>,
    timeout: Option<Duration>,
}

impl UreqTransportBuilder {
    /// Set the User-Agent header.
    pub fn user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = Some(user_agent.to_string());
        self
    }

    /// Set the overall per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> UreqTransport {
        // Redirects are followed by the client, not by the agent.
        let mut builder = ureq::AgentBuilder::new()
            .redirects(0)
            .user_agent(self.user_agent.as_deref().unwrap_or(concat!(
                "lfs-batch/",
                env!("CARGO_PKG_VERSION")
            )));
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        UreqTransport {
            agent: builder.build(),
        }
    }
}

impl Transport for UreqTransport {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut req = self
            .agent
            .request(request.method.as_str(), request.url.as_str());
        for (name, value) in &request.headers {
            req = req.set(name, value);
        }

        let result = match request.body {
            Body::Empty => req.call(),
            Body::Bytes(bytes) => req.send_bytes(&bytes),
            Body::Stream { reader, length } => {
                if let Some(length) = length {
                    req = req.set("Content-Length", &length.to_string());
                }
                req.send(reader)
            }
        };

        let response = match result {
            Ok(response) => response,
            // Status handling belongs to the caller.
            Err(ureq::Error::Status(_, response)) => response,
            Err(err) => return Err(err.into()),
        };

        let headers = response
            .headers_names()
            .into_iter()
            .filter_map(|name| {
                let value = response.header(&name)?.to_string();
                Some((name, value))
            })
            .collect();
        Ok(HttpResponse {
            status: response.status(),
            reason: response.status_text().to_string(),
            headers,
            body: Box::new(response.into_reader()),
        })
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(code, response) => Error::RequestFailed {
                status: code,
                reason: response.status_text().to_string(),
                url: response.get_url().to_string(),
            },
            other => Error::Http(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_link_headers_copied() {
        let url = Url::parse("https://example.com/").unwrap();
        let mut request = HttpRequest::new(Method::Get, &url);
        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Token-1".to_string());
        request.add_link_headers(&headers);
        assert_eq!(request.get_header("authorization"), Some("Token-1"));
    }

    #[test]
    fn test_chunked_link_header() {
        let url = Url::parse("https://example.com/").unwrap();
        let mut request = HttpRequest::new(Method::Put, &url).body(Body::Stream {
            reader: Box::new(std::io::empty()),
            length: Some(10),
        });
        let mut headers = BTreeMap::new();
        headers.insert("Transfer-Encoding".to_string(), "chunked".to_string());
        request.add_link_headers(&headers);

        assert!(request.get_header("Transfer-Encoding").is_none());
        match request.body {
            Body::Stream { length, .. } => assert_eq!(length, None),
            other => panic!("unexpected body: {:?}", other),
        }
    }
}
