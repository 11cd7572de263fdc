//! Fake php-fpm responder for integration tests.
//!
//! Speaks just enough FastCGI to answer one status request per connection,
//! built on the crate's own record codec.

#![allow(dead_code)]

use herakles_phpfpm_exporter::phpfpm::fastcgi::{
    decode_params, encode_record, encode_stream, read_record, RecordType,
};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Status payload of a healthy two-worker pool.
pub const STATUS_JSON: &str = r#"{"pool":"www","process manager":"dynamic","start time":1528367006,"start since":4455,"accepted conn":91,"listen queue":0,"max listen queue":3,"listen queue len":128,"idle processes":1,"active processes":1,"total processes":2,"max active processes":2,"max children reached":0,"slow requests":4,"processes":[{"pid":21,"state":"Idle","start time":1528367006,"start since":4455,"requests":46,"request duration":2410,"request method":"GET","request uri":"/index.php","content length":0,"user":"-","script":"/srv/index.php","last request cpu":414.94,"last request memory":2097152},{"pid":22,"state":"Running","start time":1528367006,"start since":4455,"requests":45,"request duration":135,"request method":"GET","request uri":"/status?json&full","content length":0,"user":"-","script":"-","last request cpu":0.00,"last request memory":0}]}"#;

/// A running fake responder.
pub struct FakeFpm {
    /// Scrape URI pointing at this responder.
    pub uri: String,
    body: Arc<Mutex<Vec<u8>>>,
    params: Arc<Mutex<Vec<Vec<(String, String)>>>>,
    handle: JoinHandle<()>,
    _dir: Option<tempfile::TempDir>,
}

impl FakeFpm {
    /// Starts a responder on an ephemeral TCP port.
    pub async fn tcp(body: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let body = Arc::new(Mutex::new(body.as_bytes().to_vec()));
        let params = Arc::new(Mutex::new(Vec::new()));

        let (b, p) = (body.clone(), params.clone());
        let handle = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(respond(socket, b.clone(), p.clone()));
            }
        });

        Self {
            uri: format!("tcp://127.0.0.1:{port}/status"),
            body,
            params,
            handle,
            _dir: None,
        }
    }

    /// Starts a responder on a unix socket inside a temporary directory.
    #[cfg(unix)]
    pub async fn unix(body: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("php-fpm.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        let body = Arc::new(Mutex::new(body.as_bytes().to_vec()));
        let params = Arc::new(Mutex::new(Vec::new()));

        let (b, p) = (body.clone(), params.clone());
        let handle = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(respond(socket, b.clone(), p.clone()));
            }
        });

        Self {
            uri: format!("unix://{};/status", path.display()),
            body,
            params,
            handle,
            _dir: Some(dir),
        }
    }

    /// Replaces the payload served to the next requests.
    pub fn set_body(&self, body: &[u8]) {
        *self.body.lock().unwrap() = body.to_vec();
    }

    /// FastCGI params received per request, in arrival order.
    pub fn received_params(&self) -> Vec<Vec<(String, String)>> {
        self.params.lock().unwrap().clone()
    }

    /// Stops accepting connections.
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for FakeFpm {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn respond<S>(
    mut socket: S,
    body: Arc<Mutex<Vec<u8>>>,
    seen: Arc<Mutex<Vec<Vec<(String, String)>>>>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut params = Vec::new();
    let mut request_id = 1;
    loop {
        let record = match read_record(&mut socket).await {
            Ok(record) => record,
            Err(_) => return,
        };
        request_id = record.request_id;
        match record.record_type {
            RecordType::Params => params.extend_from_slice(&record.content),
            RecordType::Stdin if record.content.is_empty() => break,
            _ => {}
        }
    }
    seen.lock()
        .unwrap()
        .push(decode_params(&params).unwrap_or_default());

    let mut stdout = b"X-Powered-By: PHP/8.2.0\r\nContent-type: application/json\r\n\r\n".to_vec();
    stdout.extend_from_slice(&body.lock().unwrap());

    let mut out = Vec::new();
    encode_stream(&mut out, RecordType::Stdout, request_id, &stdout).unwrap();
    encode_record(&mut out, RecordType::EndRequest, request_id, &[0u8; 8]).unwrap();
    let _ = socket.write_all(&out).await;
    let _ = socket.shutdown().await;
}
