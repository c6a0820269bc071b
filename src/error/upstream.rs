use thiserror::Error;
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("Invalid upstream url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported upstream scheme: {0}")]
    UnsupportedScheme(String),
    #[error("Invalid request method: {0}")]
    InvalidMethod(String),
    #[error("Unable to build upstream request: {0}")]
    Request(#[from] hyper::http::Error),
    #[error("Unable to reach upstream: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),
    #[error("Upstream answered {code} {reason}")]
    Status { code: u16, reason: String },
    #[error("Stopped after {0} redirects")]
    TooManyRedirects(usize),
    #[error("IOError: {0}")]
    Io(#[from] std::io::Error),
}
