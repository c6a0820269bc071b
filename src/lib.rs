pub mod address;
mod config;
mod error;
mod forward;
mod handler;
mod headers;
mod request;
mod response;
mod server;
mod tls;
mod transport;

use tokio::io::{AsyncRead, AsyncWrite};

pub use address::{AddressResolver, NetworkInfo};
pub use config::Config;
pub use error::{RelayError, RequestError, TlsError, UpstreamError};
pub use forward::Forwarder;
pub use handler::{
    ConnectionHandler, ConnectionHandlerFactory, RelayFactory, RelayHandler, WebRelay,
};
pub use headers::Headers;
pub use request::ProxyRequest;
pub use response::{relay, response_head, RelayBuffers};
pub use server::{ProxyServer, State};
pub use tls::{HostnameVerifier, TrustMaterial, TrustPolicy};
pub use transport::{
    BodyReader, HttpTransport, Transport, UpstreamBody, UpstreamRequest, UpstreamResponse,
};

pub trait AsyncSocket: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
impl<T> AsyncSocket for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
