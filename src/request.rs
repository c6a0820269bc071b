use hyper::body::Bytes;
use log::debug;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::{error::RequestError, headers::Headers};

/// A single relay request as read from the local client.
///
/// `target` is the real upstream URL, recovered from the percent-encoded
/// request path. `range_start` is the first byte requested through a
/// `Range: bytes=<start>-[<end>]` header, or `0`. `body` holds the
/// `Content-Length` bytes that followed the head, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    pub method: String,
    pub target: String,
    pub headers: Headers,
    pub range_start: u64,
    pub body: Bytes,
}

impl ProxyRequest {
    pub async fn read(
        mut reader: impl AsyncBufRead + Unpin,
        max_line_length: usize,
        max_body: u64,
    ) -> Result<Self, RequestError> {
        let line = read_line(&mut reader, max_line_length)
            .await?
            .ok_or(RequestError::EmptyRequest)?;
        let line = String::from_utf8_lossy(&line).into_owned();

        let mut tokens = line.split_whitespace();
        let (Some(method), Some(uri)) = (tokens.next(), tokens.next()) else {
            return Err(RequestError::MalformedRequestLine(line.clone()));
        };
        let target = decode_target(uri)?;
        let method = method.to_string();

        let headers = read_headers(&mut reader, max_line_length).await;
        let range_start = headers.get_str("Range").map(parse_range_start).unwrap_or(0);
        let body = read_body(&mut reader, &headers, max_body).await?;

        Ok(ProxyRequest {
            method,
            target,
            headers,
            range_start,
            body,
        })
    }
}

/// Reads one line without its terminator. `None` means the stream ended
/// before any byte arrived.
async fn read_line(
    reader: &mut (impl AsyncBufRead + Unpin),
    max_line_length: usize,
) -> Result<Option<Vec<u8>>, RequestError> {
    let mut buf = Vec::new();
    let n = reader
        .take(max_line_length as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if n >= max_line_length {
        return Err(RequestError::LineTooLong(max_line_length));
    }
    Ok(Some(buf))
}

async fn read_headers(
    reader: &mut (impl AsyncBufRead + Unpin),
    max_line_length: usize,
) -> Headers {
    let mut headers = Headers::new();
    loop {
        let line = match read_line(reader, max_line_length).await {
            Ok(Some(line)) if !line.is_empty() => line,
            Ok(_) => break,
            Err(e) => {
                debug!("stopped reading headers: {}", e);
                break;
            }
        };
        let (name, value) = match line.iter().position(|b| *b == b':') {
            Some(colon) => (
                String::from_utf8_lossy(&line[..colon]).trim().to_string(),
                &line[colon + 1..],
            ),
            None => (String::new(), &line[..]),
        };
        if name.is_empty() {
            let line = String::from_utf8_lossy(&line);
            debug!("skipping header line without a name: {:?}", line);
            continue;
        }
        headers.push(name, value.strip_prefix(b" ").unwrap_or(value));
    }
    headers
}

/// Reads the body announced by `Content-Length`. Requests without one have
/// no body.
async fn read_body(
    reader: &mut (impl AsyncBufRead + Unpin),
    headers: &Headers,
    max_body: u64,
) -> Result<Bytes, RequestError> {
    let Some(len) = headers
        .get_str("Content-Length")
        .and_then(|v| v.trim().parse::<u64>().ok())
    else {
        return Ok(Bytes::new());
    };
    if len > max_body {
        return Err(RequestError::BodyTooLarge(len));
    }
    let mut body = Vec::with_capacity(len as usize);
    reader.take(len).read_to_end(&mut body).await?;
    if (body.len() as u64) < len {
        return Err(RequestError::Io(std::io::ErrorKind::UnexpectedEof.into()));
    }
    Ok(Bytes::from(body))
}

fn decode_target(uri: &str) -> Result<String, RequestError> {
    let encoded = uri.strip_prefix('/').unwrap_or(uri).replace('+', " ");
    urlencoding::decode(&encoded)
        .map(|target| target.into_owned())
        .map_err(|e| RequestError::InvalidTarget(e.to_string()))
}

pub(crate) fn parse_range_start(value: &str) -> u64 {
    value
        .split_once('=')
        .and_then(|(_, range)| range.split('-').next())
        .and_then(|start| start.trim().parse().ok())
        .unwrap_or(0)
}
