use thiserror::Error;
pub(crate) mod request;
pub(crate) mod tls;
pub(crate) mod upstream;

pub use request::RequestError;
pub use tls::TlsError;
pub use upstream::UpstreamError;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("BindError: unable to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },
    #[error("RequestError: {0}")]
    Request(#[from] RequestError),
    #[error("UpstreamError: {0}")]
    Upstream(#[from] UpstreamError),
    #[error("TlsError: {0}")]
    Tls(#[from] TlsError),
    #[error("IOError: {0}")]
    IO(#[from] std::io::Error),
}
