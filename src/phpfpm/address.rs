//! Scrape address parsing.
//!
//! A pool is configured with a single URI that carries the connection scheme,
//! the connection target and the FastCGI status path:
//!
//! - `tcp://127.0.0.1:9000/status` → tcp, `127.0.0.1:9000`, `/status`
//! - `unix:///run/php/fpm.sock;/status` → unix, `/run/php/fpm.sock`, `/status`

use percent_encoding::percent_decode_str;
use std::fmt;
use thiserror::Error;
use url::Url;

/// Transport used to reach php-fpm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Tcp,
    Unix,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Tcp => f.write_str("tcp"),
            Scheme::Unix => f.write_str("unix"),
        }
    }
}

/// Errors produced while parsing a scrape URI.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("invalid scrape URI '{uri}': {reason}")]
    Malformed { uri: String, reason: String },

    #[error("unsupported scheme '{scheme}' in scrape URI '{uri}' (expected tcp or unix)")]
    UnsupportedScheme { uri: String, scheme: String },

    #[error("scrape URI '{0}' has no host or socket path")]
    MissingTarget(String),
}

/// A parsed scrape URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeAddress {
    pub scheme: Scheme,
    /// `host:port` for tcp, the socket path for unix.
    pub target: String,
    /// FastCGI script path of the status page, empty when not configured.
    pub path: String,
}

impl ScrapeAddress {
    pub fn parse(uri: &str) -> Result<Self, AddressError> {
        let parsed = Url::parse(uri).map_err(|e| AddressError::Malformed {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;

        match parsed.scheme() {
            "tcp" => {
                let host = parsed
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| AddressError::MissingTarget(uri.to_string()))?;
                let target = match parsed.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host.to_string(),
                };
                Ok(Self {
                    scheme: Scheme::Tcp,
                    target,
                    path: decode_path(uri, parsed.path())?,
                })
            }
            "unix" => {
                // The status path rides after ';' because the socket path
                // already occupies the URI path.
                let decoded = decode_path(uri, parsed.path())?;
                let (socket, path) = match decoded.split_once(';') {
                    Some((socket, path)) => (socket, path),
                    None => (decoded.as_str(), ""),
                };
                if socket.is_empty() {
                    return Err(AddressError::MissingTarget(uri.to_string()));
                }
                Ok(Self {
                    scheme: Scheme::Unix,
                    target: socket.to_string(),
                    path: path.to_string(),
                })
            }
            other => Err(AddressError::UnsupportedScheme {
                uri: uri.to_string(),
                scheme: other.to_string(),
            }),
        }
    }
}

/// `Url::path` keeps percent escapes; sockets and scripts are opened by
/// their literal names.
fn decode_path(uri: &str, raw: &str) -> Result<String, AddressError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|path| path.into_owned())
        .map_err(|e| AddressError::Malformed {
            uri: uri.to_string(),
            reason: format!("path is not valid UTF-8 after percent-decoding: {e}"),
        })
}

impl fmt::Display for ScrapeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scheme {
            Scheme::Tcp => write!(f, "tcp://{}{}", self.target, self.path),
            Scheme::Unix if self.path.is_empty() => write!(f, "unix://{}", self.target),
            Scheme::Unix => write!(f, "unix://{};{}", self.target, self.path),
        }
    }
}
