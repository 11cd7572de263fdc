//! Minimal FastCGI client for the php-fpm status page.
//!
//! Only what a status scrape needs is implemented: one request per
//! connection in the responder role, no keep-alive and no multiplexing.
//! Record framing follows the FastCGI 1.0 protocol (8-byte header,
//! big-endian lengths, content padded to a multiple of 8 bytes).

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const FCGI_VERSION_1: u8 = 1;
pub const HEADER_LEN: usize = 8;
pub const MAX_CONTENT_LEN: usize = u16::MAX as usize;

/// Request id used for the single request sent per connection.
pub const REQUEST_ID: u16 = 1;

const ROLE_RESPONDER: u16 = 1;
const REQUEST_COMPLETE: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    BeginRequest = 1,
    AbortRequest = 2,
    EndRequest = 3,
    Params = 4,
    Stdin = 5,
    Stdout = 6,
    Stderr = 7,
    Data = 8,
    GetValues = 9,
    GetValuesResult = 10,
    UnknownType = 11,
}

impl RecordType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => RecordType::BeginRequest,
            2 => RecordType::AbortRequest,
            3 => RecordType::EndRequest,
            4 => RecordType::Params,
            5 => RecordType::Stdin,
            6 => RecordType::Stdout,
            7 => RecordType::Stderr,
            8 => RecordType::Data,
            9 => RecordType::GetValues,
            10 => RecordType::GetValuesResult,
            11 => RecordType::UnknownType,
            _ => return None,
        })
    }
}

#[derive(Debug, Error)]
pub enum FastCgiError {
    #[error("FastCGI I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported FastCGI protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown FastCGI record type {0}")]
    UnknownRecordType(u8),

    #[error("FastCGI record content of {0} bytes exceeds the 65535 byte limit")]
    RecordTooLarge(usize),

    #[error("malformed FastCGI name-value pair")]
    MalformedParams,

    #[error("FastCGI request ended with protocol status {0}")]
    ProtocolStatus(u8),

    #[error("connection closed before the FastCGI request completed")]
    UnexpectedEof,

    #[error("malformed CGI response header line '{0}'")]
    MalformedHeader(String),
}

/// A single decoded FastCGI record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub record_type: RecordType,
    pub request_id: u16,
    pub content: Vec<u8>,
}

/// Appends one framed record to `buf`.
pub fn encode_record(
    buf: &mut Vec<u8>,
    record_type: RecordType,
    request_id: u16,
    content: &[u8],
) -> Result<(), FastCgiError> {
    if content.len() > MAX_CONTENT_LEN {
        return Err(FastCgiError::RecordTooLarge(content.len()));
    }
    let padding = (8 - content.len() % 8) % 8;

    buf.push(FCGI_VERSION_1);
    buf.push(record_type as u8);
    buf.extend_from_slice(&request_id.to_be_bytes());
    buf.extend_from_slice(&(content.len() as u16).to_be_bytes());
    buf.push(padding as u8);
    buf.push(0);
    buf.extend_from_slice(content);
    buf.resize(buf.len() + padding, 0);
    Ok(())
}

/// Appends a stream (PARAMS, STDIN, STDOUT, ...) split into records and
/// terminated by the mandatory empty record.
pub fn encode_stream(
    buf: &mut Vec<u8>,
    record_type: RecordType,
    request_id: u16,
    data: &[u8],
) -> Result<(), FastCgiError> {
    for chunk in data.chunks(MAX_CONTENT_LEN) {
        encode_record(buf, record_type, request_id, chunk)?;
    }
    encode_record(buf, record_type, request_id, &[])
}

fn encode_length(buf: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        buf.push(len as u8);
    } else {
        buf.extend_from_slice(&((len as u32) | 0x8000_0000).to_be_bytes());
    }
}

/// Encodes FastCGI name-value pairs.
pub fn encode_params(params: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = Vec::new();
    for (name, value) in params {
        encode_length(&mut buf, name.len());
        encode_length(&mut buf, value.len());
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(value.as_bytes());
    }
    buf
}

fn decode_length(content: &[u8], pos: &mut usize) -> Result<usize, FastCgiError> {
    let first = *content.get(*pos).ok_or(FastCgiError::MalformedParams)?;
    if first & 0x80 == 0 {
        *pos += 1;
        return Ok(first as usize);
    }
    let bytes = content
        .get(*pos..*pos + 4)
        .ok_or(FastCgiError::MalformedParams)?;
    *pos += 4;
    Ok((u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) & 0x7fff_ffff) as usize)
}

/// Decodes FastCGI name-value pairs.
pub fn decode_params(content: &[u8]) -> Result<Vec<(String, String)>, FastCgiError> {
    let mut pairs = Vec::new();
    let mut pos = 0;
    while pos < content.len() {
        let name_len = decode_length(content, &mut pos)?;
        let value_len = decode_length(content, &mut pos)?;
        let name = content
            .get(pos..pos + name_len)
            .ok_or(FastCgiError::MalformedParams)?;
        pos += name_len;
        let value = content
            .get(pos..pos + value_len)
            .ok_or(FastCgiError::MalformedParams)?;
        pos += value_len;
        pairs.push((
            String::from_utf8_lossy(name).into_owned(),
            String::from_utf8_lossy(value).into_owned(),
        ));
    }
    Ok(pairs)
}

/// Builds BEGIN_REQUEST, PARAMS and STDIN for one responder request.
pub fn encode_request(
    request_id: u16,
    params: &[(&str, &str)],
    stdin: &[u8],
) -> Result<Vec<u8>, FastCgiError> {
    let mut buf = Vec::with_capacity(256);

    let mut begin = [0u8; 8];
    begin[..2].copy_from_slice(&ROLE_RESPONDER.to_be_bytes());
    encode_record(&mut buf, RecordType::BeginRequest, request_id, &begin)?;

    encode_stream(&mut buf, RecordType::Params, request_id, &encode_params(params))?;
    encode_stream(&mut buf, RecordType::Stdin, request_id, stdin)?;
    Ok(buf)
}

async fn read_exact_or_eof<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), FastCgiError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(FastCgiError::UnexpectedEof),
        Err(e) => Err(e.into()),
    }
}

/// Reads one record, discarding its padding.
pub async fn read_record<R>(reader: &mut R) -> Result<Record, FastCgiError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    read_exact_or_eof(reader, &mut header).await?;

    if header[0] != FCGI_VERSION_1 {
        return Err(FastCgiError::UnsupportedVersion(header[0]));
    }
    let record_type =
        RecordType::from_u8(header[1]).ok_or(FastCgiError::UnknownRecordType(header[1]))?;
    let request_id = u16::from_be_bytes([header[2], header[3]]);
    let content_len = u16::from_be_bytes([header[4], header[5]]) as usize;
    let padding_len = header[6] as usize;

    let mut content = vec![0u8; content_len + padding_len];
    read_exact_or_eof(reader, &mut content).await?;
    content.truncate(content_len);

    Ok(Record {
        record_type,
        request_id,
        content,
    })
}

/// Writes one record.
pub async fn write_record<W>(
    writer: &mut W,
    record_type: RecordType,
    request_id: u16,
    content: &[u8],
) -> Result<(), FastCgiError>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(HEADER_LEN + content.len() + 8);
    encode_record(&mut buf, record_type, request_id, content)?;
    writer.write_all(&buf).await?;
    Ok(())
}

/// Response of a FastCGI responder, split into CGI headers and body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FcgiResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub stderr: Vec<u8>,
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

impl FcgiResponse {
    /// Splits the STDOUT stream at the first blank line. Output without a
    /// header block is treated as a bare body with status 200.
    pub fn from_stdout(stdout: Vec<u8>, stderr: Vec<u8>) -> Result<Self, FastCgiError> {
        let crlf = find_subslice(&stdout, b"\r\n\r\n").map(|i| (i, i + 4));
        let lf = find_subslice(&stdout, b"\n\n").map(|i| (i, i + 2));
        let split = match (crlf, lf) {
            (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
            (a, b) => a.or(b),
        };

        let Some((head_end, body_start)) = split else {
            return Ok(Self {
                status: 200,
                headers: Vec::new(),
                body: stdout,
                stderr,
            });
        };

        let head = String::from_utf8_lossy(&stdout[..head_end]).into_owned();
        let mut status = 200;
        let mut headers = Vec::new();
        for line in head.lines().map(|l| l.trim_end_matches('\r')) {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FastCgiError::MalformedHeader(line.to_string()))?;
            let (name, value) = (name.trim(), value.trim());
            if name.eq_ignore_ascii_case("status") {
                status = value
                    .split_whitespace()
                    .next()
                    .and_then(|code| code.parse().ok())
                    .ok_or_else(|| FastCgiError::MalformedHeader(line.to_string()))?;
            }
            headers.push((name.to_string(), value.to_string()));
        }

        Ok(Self {
            status,
            headers,
            body: stdout[body_start..].to_vec(),
            stderr,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// FastCGI client bound to one connected stream.
pub struct FcgiClient<S> {
    stream: S,
}

impl<S> FcgiClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Sends a body-less request and collects the full response.
    pub async fn get(&mut self, params: &[(&str, &str)]) -> Result<FcgiResponse, FastCgiError> {
        let request = encode_request(REQUEST_ID, params, &[])?;
        self.stream.write_all(&request).await?;
        self.stream.flush().await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        loop {
            let record = read_record(&mut self.stream).await?;
            if record.request_id != REQUEST_ID {
                continue;
            }
            match record.record_type {
                RecordType::Stdout => stdout.extend_from_slice(&record.content),
                RecordType::Stderr => stderr.extend_from_slice(&record.content),
                RecordType::EndRequest => {
                    let protocol_status = record.content.get(4).copied().unwrap_or(REQUEST_COMPLETE);
                    if protocol_status != REQUEST_COMPLETE {
                        return Err(FastCgiError::ProtocolStatus(protocol_status));
                    }
                    break;
                }
                _ => {}
            }
        }

        FcgiResponse::from_stdout(stdout, stderr)
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn test_encode_record_pads_to_eight_bytes() {
        let mut buf = Vec::new();
        encode_record(&mut buf, RecordType::Stdout, 1, b"hello").unwrap();
        assert_eq!(buf.len(), HEADER_LEN + 8);
        assert_eq!(&buf[..8], &[1, 6, 0, 1, 0, 5, 3, 0]);
        assert_eq!(&buf[8..13], b"hello");
    }

    #[test]
    fn test_encode_record_rejects_oversized_content() {
        let mut buf = Vec::new();
        let content = vec![0u8; MAX_CONTENT_LEN + 1];
        assert!(matches!(
            encode_record(&mut buf, RecordType::Stdout, 1, &content),
            Err(FastCgiError::RecordTooLarge(_))
        ));
    }

    #[test]
    fn test_params_long_values_use_four_byte_lengths() {
        let long = "x".repeat(300);
        let encoded = encode_params(&[("SCRIPT_FILENAME", "/status"), ("LONG", &long)]);
        let decoded = decode_params(&encoded).unwrap();
        assert_eq!(decoded[0], ("SCRIPT_FILENAME".into(), "/status".into()));
        assert_eq!(decoded[1].1.len(), 300);
        assert!(decode_params(&[5, 1, b'a']).is_err());
    }

    #[test]
    fn test_response_splits_headers_and_body() {
        let stdout = b"X-Powered-By: PHP/8.2\r\nContent-type: application/json\r\n\r\n{\"pool\":\"www\"}".to_vec();
        let response = FcgiResponse::from_stdout(stdout, Vec::new()).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.body, b"{\"pool\":\"www\"}");
    }

    #[test]
    fn test_response_reads_status_header() {
        let stdout = b"Status: 404 Not Found\r\nContent-type: text/html\r\n\r\nFile not found.\n".to_vec();
        let response = FcgiResponse::from_stdout(stdout, b"Primary script unknown".to_vec()).unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.body, b"File not found.\n");
        assert_eq!(response.stderr, b"Primary script unknown");
    }

    #[tokio::test]
    async fn test_client_round_trip_over_duplex() {
        let (client_side, mut server_side) = duplex(64 * 1024);

        let server = tokio::spawn(async move {
            let mut params = Vec::new();
            loop {
                let record = read_record(&mut server_side).await.unwrap();
                match record.record_type {
                    RecordType::Params => params.extend_from_slice(&record.content),
                    RecordType::Stdin if record.content.is_empty() => break,
                    _ => {}
                }
            }

            let mut out = Vec::new();
            encode_stream(
                &mut out,
                RecordType::Stdout,
                REQUEST_ID,
                b"Content-type: application/json\r\n\r\n{\"pool\":\"www\"}",
            )
            .unwrap();
            encode_record(&mut out, RecordType::EndRequest, REQUEST_ID, &[0; 8]).unwrap();
            server_side.write_all(&out).await.unwrap();
            decode_params(&params).unwrap()
        });

        let mut client = FcgiClient::new(client_side);
        let response = client
            .get(&[("SCRIPT_NAME", "/status"), ("QUERY_STRING", "json&full")])
            .await
            .unwrap();
        assert_eq!(response.body, b"{\"pool\":\"www\"}");

        let params = server.await.unwrap();
        assert!(params.contains(&("QUERY_STRING".to_string(), "json&full".to_string())));
    }

    #[tokio::test]
    async fn test_client_reports_truncated_response() {
        let (client_side, mut server_side) = duplex(1024);
        tokio::spawn(async move {
            let _ = read_record(&mut server_side).await;
            drop(server_side);
        });

        let mut client = FcgiClient::new(client_side);
        let err = client.get(&[("SCRIPT_NAME", "/status")]).await.unwrap_err();
        assert!(matches!(err, FastCgiError::UnexpectedEof | FastCgiError::Io(_)));
    }
}
