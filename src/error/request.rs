use thiserror::Error;
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Connection closed before a request was sent")]
    EmptyRequest,
    #[error("Malformed request line: {0:?}")]
    MalformedRequestLine(String),
    #[error("Invalid request target: {0}")]
    InvalidTarget(String),
    #[error("Request line exceeds {0} bytes")]
    LineTooLong(usize),
    #[error("Request body of {0} bytes exceeds the limit")]
    BodyTooLarge(u64),
    #[error("IOError: {0}")]
    Io(#[from] std::io::Error),
}
