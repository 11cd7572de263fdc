//! A single php-fpm pool and its update protocol.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::logging::{Logger, SharedLogger};
use crate::phpfpm::address::{AddressError, Scheme, ScrapeAddress};
use crate::phpfpm::fastcgi::{FastCgiError, FcgiClient, FcgiResponse};
use crate::phpfpm::status::{decode_status, DecodeError, PoolStatus};

pub const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(3);

const SERVER_SOFTWARE: &str = concat!("herakles-phpfpm-exporter/", env!("CARGO_PKG_VERSION"));

/// Per-cycle scrape settings shared by every pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeSettings {
    /// Deadline covering connect, request and response.
    pub timeout: Duration,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SCRAPE_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("scrape timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    FastCgi(#[from] FastCgiError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("scrape worker panicked: {0}")]
    WorkerPanicked(String),
}

/// One configured php-fpm pool and the result of its most recent scrape.
#[derive(Debug)]
pub struct Pool {
    address: String,
    status: PoolStatus,
    last_error: Option<ScrapeError>,
    failure_count: u64,
}

impl Pool {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            status: PoolStatus::default(),
            last_error: None,
            failure_count: 0,
        }
    }

    /// Scrape URI as configured.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Last successfully decoded status. Zero-valued until the first success.
    pub fn status(&self) -> &PoolStatus {
        &self.status
    }

    /// Pool name reported by php-fpm, empty before the first success.
    pub fn name(&self) -> &str {
        &self.status.name
    }

    pub fn last_error(&self) -> Option<&ScrapeError> {
        self.last_error.as_ref()
    }

    /// Number of failed scrapes over the lifetime of this pool.
    pub fn failure_count(&self) -> u64 {
        self.failure_count
    }

    /// `true` when the most recent scrape succeeded.
    pub fn is_up(&self) -> bool {
        self.last_error.is_none() && !self.status.name.is_empty()
    }

    /// Scrapes php-fpm once and stores the outcome on the pool.
    ///
    /// Never fails: any error is recorded in `last_error`, counted in
    /// `failure_count`, and leaves the previous status untouched.
    pub async fn update(&mut self, settings: &ScrapeSettings, logger: &dyn Logger) {
        let outcome = fetch_status(&self.address, settings, logger).await;
        self.apply(outcome, logger);
    }

    /// Stores the result of one scrape of this pool.
    pub(crate) fn apply(&mut self, outcome: Result<PoolStatus, ScrapeError>, logger: &dyn Logger) {
        match outcome {
            Ok(status) => {
                self.status = status;
                self.last_error = None;
            }
            Err(err) => self.record_failure(err, logger),
        }
    }

    pub(crate) fn record_failure(&mut self, err: ScrapeError, logger: &dyn Logger) {
        self.failure_count += 1;
        logger.error(&format!(
            "Error scraping php-fpm pool at {}: {}",
            self.address, err
        ));
        self.last_error = Some(err);
    }
}

/// Scrapes `uri` once without touching any pool.
pub(crate) async fn scrape(
    uri: String,
    settings: ScrapeSettings,
    logger: SharedLogger,
) -> Result<PoolStatus, ScrapeError> {
    fetch_status(&uri, &settings, logger.as_ref()).await
}

async fn fetch_status(
    uri: &str,
    settings: &ScrapeSettings,
    logger: &dyn Logger,
) -> Result<PoolStatus, ScrapeError> {
    let address = ScrapeAddress::parse(uri)?;

    let response = tokio::time::timeout(settings.timeout, request_status(&address))
        .await
        .map_err(|_| ScrapeError::Timeout(settings.timeout))??;

    if !response.stderr.is_empty() {
        logger.debug(&format!(
            "php-fpm at {} wrote to stderr: {}",
            uri,
            String::from_utf8_lossy(&response.stderr)
        ));
    }
    if response.status != 200 {
        logger.debug(&format!(
            "php-fpm at {} answered with status {}",
            uri, response.status
        ));
    }

    Ok(decode_status(&response.body)?)
}

async fn request_status(address: &ScrapeAddress) -> Result<FcgiResponse, ScrapeError> {
    let connect_error = |source| ScrapeError::Connect {
        target: address.target.clone(),
        source,
    };

    match address.scheme {
        Scheme::Tcp => {
            let stream = TcpStream::connect(&address.target)
                .await
                .map_err(connect_error)?;
            query(stream, &address.path).await
        }
        #[cfg(unix)]
        Scheme::Unix => {
            let stream = tokio::net::UnixStream::connect(&address.target)
                .await
                .map_err(connect_error)?;
            query(stream, &address.path).await
        }
        #[cfg(not(unix))]
        Scheme::Unix => Err(connect_error(io::Error::new(
            io::ErrorKind::Unsupported,
            "unix sockets are not supported on this platform",
        ))),
    }
}

async fn query<S>(stream: S, path: &str) -> Result<FcgiResponse, ScrapeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let params = [
        ("SCRIPT_FILENAME", path),
        ("SCRIPT_NAME", path),
        ("SERVER_SOFTWARE", SERVER_SOFTWARE),
        ("REMOTE_ADDR", "127.0.0.1"),
        ("REQUEST_METHOD", "GET"),
        ("QUERY_STRING", "json&full"),
        ("CONTENT_LENGTH", "0"),
    ];

    // The client owns the stream; it is closed when dropped on every path.
    let mut client = FcgiClient::new(stream);
    Ok(client.get(&params).await?)
}
