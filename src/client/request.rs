//! Outbound request heads.

use http::{Method, Uri, Version};

use crate::proto::headers;

/// Method, target, version and header lines of an outbound request.
///
/// Header names and values are kept verbatim so they can be validated
/// as they would appear on the wire.
#[derive(Debug, Clone)]
pub struct RequestHead {
    method: Method,
    uri: Uri,
    version: Version,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Create a new HTTP/1.1 request head.
    ///
    /// A `Host` header is derived from the URI's authority.
    pub fn new(method: Method, uri: Uri) -> Self {
        let mut head = Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: Vec::new(),
        };
        if let Some(host) = host_header(&head.uri) {
            head.headers.push(("Host".to_string(), host));
        }
        head
    }

    pub fn get(uri: Uri) -> Self {
        Self::new(Method::GET, uri)
    }

    /// Append a header line.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace every header of that name (case-insensitive) with one line.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First value of a header, matched case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Request target for the request line: path and query, `/` if empty.
    pub fn target(&self) -> &str {
        match self.uri.path_and_query() {
            Some(pq) if !pq.as_str().is_empty() => pq.as_str(),
            _ => "/",
        }
    }

    /// Whether the request asks to keep the connection open.
    pub fn keep_alive(&self) -> bool {
        headers::keep_alive(
            self.version,
            self.headers
                .iter()
                .filter(|(n, _)| n.eq_ignore_ascii_case("connection"))
                .map(|(_, v)| v.as_bytes()),
        )
    }
}

impl<B> From<&http::Request<B>> for RequestHead {
    fn from(request: &http::Request<B>) -> Self {
        let mut head = Self::new(request.method().clone(), request.uri().clone())
            .with_version(request.version());
        for (name, value) in request.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            if name == http::header::HOST {
                head.set_header("Host", value);
            } else {
                head.headers.push((name.as_str().to_string(), value));
            }
        }
        head
    }
}

fn host_header(uri: &Uri) -> Option<String> {
    let host = uri.host().filter(|h| !h.is_empty())?;
    Some(match uri.port_u16() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}
