use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};

use crate::{headers::Headers, transport::UpstreamResponse};

/// Response headers never relayed: the upstream's identity and the chunked
/// framing the relay does not speak.
const DROPPED_RESPONSE_HEADERS: [&str; 2] = ["Server", "Transfer-Encoding"];

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy)]
pub struct RelayBuffers {
    pub copy: usize,
    pub write: usize,
}

impl Default for RelayBuffers {
    fn default() -> Self {
        RelayBuffers {
            copy: 32 * 1024,
            write: 64 * 1024,
        }
    }
}

/// Builds the HTTP/1.0 response head sent to the local client. Header
/// values are written back byte for byte.
pub fn response_head(status: u16, headers: &Headers) -> Vec<u8> {
    let mut head = format!("HTTP/1.0 {} OK\r\n", status).into_bytes();
    let mut has_content_type = false;
    for (name, value) in headers.iter() {
        if DROPPED_RESPONSE_HEADERS
            .iter()
            .any(|h| h.eq_ignore_ascii_case(name))
        {
            continue;
        }
        let value = if name.eq_ignore_ascii_case("Connection") {
            &b"close"[..]
        } else {
            value
        };
        if name.eq_ignore_ascii_case("Content-Type") {
            has_content_type = true;
        }
        head.extend_from_slice(name.as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value);
        head.extend_from_slice(b"\r\n");
    }
    if !has_content_type {
        head.extend_from_slice(b"Content-Type: ");
        head.extend_from_slice(DEFAULT_CONTENT_TYPE.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(b"\r\n");
    head
}

/// Writes the rewritten head and streams the body of `response` to `client`.
///
/// Returns the number of body bytes copied. The client side is shut down on
/// every path, and the upstream body is dropped before returning.
pub async fn relay(
    response: UpstreamResponse,
    client: impl AsyncWrite + Unpin,
    buffers: RelayBuffers,
) -> std::io::Result<u64> {
    let UpstreamResponse {
        status,
        headers,
        mut body,
        ..
    } = response;
    let mut writer = BufWriter::with_capacity(buffers.write, client);

    let copied = copy_body(status, &headers, &mut body, &mut writer, buffers.copy).await;
    drop(body);
    if let Err(e) = writer.shutdown().await {
        debug!("unable to close client stream: {}", e);
    }
    copied
}

async fn copy_body(
    status: u16,
    headers: &Headers,
    body: &mut (impl AsyncRead + Unpin),
    writer: &mut (impl AsyncWrite + Unpin),
    buffer_size: usize,
) -> std::io::Result<u64> {
    writer.write_all(&response_head(status, headers)).await?;
    // a zero-length read buffer would look like end of stream
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = match body.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("upstream read failed after {} bytes: {}", total, e);
                return Err(e);
            }
        };
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    writer.flush().await?;
    Ok(total)
}
