//! Destination authority keys.
//!
//! An authority identifies where a pooled connection leads. Only the scheme,
//! host and port take part; paths and queries never do.

use std::fmt;

use http::Uri;

use crate::error::{Error, Result};

const TLS_PREFIX: &str = "tls://";

/// Normalized `host:port` destination, prefixed with `tls://` for https.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Authority {
    tls: bool,
    host: String,
    port: u16,
    key: String,
}

impl Authority {
    /// Derive the authority of a request URI.
    ///
    /// Only `http` and `https` are accepted; the port defaults to 80 and
    /// 443 respectively.
    pub fn from_uri(uri: &Uri) -> Result<Self> {
        let scheme = uri.scheme_str().unwrap_or("").to_ascii_lowercase();
        let tls = match scheme.as_str() {
            "http" => false,
            "https" => true,
            _ => {
                return Err(Error::invalid(format!(
                    "invalid request URI given, scheme must be http or https (got {:?})",
                    scheme
                )))
            }
        };

        let host = match uri.host() {
            Some(host) if !host.is_empty() => host.to_ascii_lowercase(),
            _ => return Err(Error::invalid("invalid request URI given, host is missing")),
        };
        let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });

        let key = format!("{}{}:{}", if tls { TLS_PREFIX } else { "" }, host, port);
        Ok(Self {
            tls,
            host,
            port,
            key,
        })
    }

    /// Whether the connection must be encrypted.
    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// Host name or IP literal (IPv6 literals keep their brackets).
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` without the TLS prefix, suitable for socket connects.
    pub fn address(&self) -> &str {
        if self.tls {
            &self.key[TLS_PREFIX.len()..]
        } else {
            &self.key
        }
    }

    /// The canonical key, e.g. `tls://example.com:443`.
    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}
