use std::{
    future::Future,
    io,
    pin::Pin,
    task::{ready, Context, Poll},
};

use http_body_util::Full;
use hyper::{
    body::{Body, Bytes, Incoming},
    header::{HeaderName, HeaderValue},
    Method, Request,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use log::debug;
use tokio::io::{AsyncRead, ReadBuf};
use url::Url;

use crate::{
    error::{TlsError, UpstreamError},
    headers::Headers,
    tls::{default_client_config, TrustPolicy},
};

pub type UpstreamBody = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: String,
    pub url: Url,
    pub headers: Headers,
    /// Sent as-is; empty for the usual bodiless media request.
    pub body: Bytes,
}

pub struct UpstreamResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: UpstreamBody,
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Executes one upstream exchange and hands back the response with its body
/// still unread. Redirects are not followed here.
pub trait Transport: Send + Sync + 'static {
    fn execute(
        &self,
        request: UpstreamRequest,
    ) -> impl Future<Output = Result<UpstreamResponse, UpstreamError>> + Send;
}

type HttpsConnector = hyper_rustls::HttpsConnector<HttpConnector>;

/// HTTP/1.1 transport over hyper. Connections are never pooled, every
/// exchange opens its own.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client<HttpsConnector, Full<Bytes>>,
}

impl HttpTransport {
    pub fn new(trust: Option<&TrustPolicy>) -> Result<Self, TlsError> {
        let tls = match trust {
            Some(policy) => policy.client_config()?,
            None => default_client_config()?,
        };
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build(https);
        Ok(HttpTransport { client })
    }
}

impl Transport for HttpTransport {
    async fn execute(
        &self,
        request: UpstreamRequest,
    ) -> Result<UpstreamResponse, UpstreamError> {
        match request.url.scheme() {
            "http" | "https" => {}
            scheme => return Err(UpstreamError::UnsupportedScheme(scheme.to_string())),
        }
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| UpstreamError::InvalidMethod(request.method.clone()))?;

        let mut builder = Request::builder().method(method).uri(request.url.as_str());
        for (name, value) in request.headers.iter() {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(value),
            ) {
                (Ok(name), Ok(value)) => builder = builder.header(name, value),
                _ => debug!("dropping invalid header {:?}", name),
            }
        }
        let req = builder.body(Full::new(request.body))?;

        let res = self.client.request(req).await?;
        let (parts, body) = res.into_parts();
        let reason = parts
            .extensions
            .get::<hyper::ext::ReasonPhrase>()
            .map(|r| String::from_utf8_lossy(r.as_bytes()).into_owned())
            .or_else(|| parts.status.canonical_reason().map(str::to_string))
            .unwrap_or_default();

        Ok(UpstreamResponse {
            status: parts.status.as_u16(),
            reason,
            headers: Headers::from(&parts.headers),
            body: Box::new(BodyReader::new(body)),
        })
    }
}

/// Adapts a hyper body into a byte reader, dropping trailers.
pub struct BodyReader<B = Incoming> {
    body: B,
    chunk: Bytes,
}

impl<B> BodyReader<B> {
    pub fn new(body: B) -> Self {
        BodyReader {
            body,
            chunk: Bytes::new(),
        }
    }
}

impl<B> AsyncRead for BodyReader<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.chunk.is_empty() {
                let n = this.chunk.len().min(buf.remaining());
                buf.put_slice(&this.chunk.split_to(n));
                return Poll::Ready(Ok(()));
            }
            match ready!(Pin::new(&mut this.body).poll_frame(cx)) {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        this.chunk = data;
                    }
                }
                Some(Err(e)) => return Poll::Ready(Err(io::Error::other(e))),
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}
