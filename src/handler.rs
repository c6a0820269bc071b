use std::{future::Future, net::SocketAddr, sync::Arc};

use log::{debug, info, warn};
use tokio::io::BufReader;

use crate::{
    config::Config,
    error::{RelayError, RequestError, TlsError},
    forward::Forwarder,
    request::ProxyRequest,
    response::{relay, RelayBuffers},
    tls::TrustPolicy,
    transport::{HttpTransport, Transport},
    AsyncSocket,
};

/// Serves exactly one accepted connection, then releases it.
pub trait ConnectionHandler: Send + 'static {
    fn handle(self, socket: impl AsyncSocket) -> impl Future<Output = ()> + Send + 'static;
}

/// Produces a fresh [`ConnectionHandler`] for every accepted connection.
pub trait ConnectionHandlerFactory: Send + Sync + 'static {
    type Handler: ConnectionHandler;
    fn new_handler(&self, peer: SocketAddr) -> Self::Handler;
}

#[derive(Debug, Clone, Copy)]
struct RelaySettings {
    request_buffer_size: usize,
    max_line_length: usize,
    max_request_body: u64,
    buffers: RelayBuffers,
}

impl From<&Config> for RelaySettings {
    fn from(config: &Config) -> Self {
        RelaySettings {
            request_buffer_size: config.request_buffer_size,
            max_line_length: config.max_line_length.max(1),
            max_request_body: config.max_request_body,
            buffers: RelayBuffers {
                copy: config.copy_buffer_size.max(1),
                write: config.write_buffer_size,
            },
        }
    }
}

pub struct RelayFactory<T> {
    forwarder: Arc<Forwarder<T>>,
    settings: RelaySettings,
}

/// The standard relay: hyper transport with an optional TLS trust policy.
pub type WebRelay = RelayFactory<HttpTransport>;

impl RelayFactory<HttpTransport> {
    pub fn new(config: &Config, trust: Option<TrustPolicy>) -> Result<Self, TlsError> {
        Ok(Self::with_transport(config, HttpTransport::new(trust.as_ref())?))
    }
}

impl<T: Transport> RelayFactory<T> {
    pub fn with_transport(config: &Config, transport: T) -> Self {
        RelayFactory {
            forwarder: Arc::new(Forwarder::new(transport, config.max_redirects)),
            settings: RelaySettings::from(config),
        }
    }

    pub fn forwarder(&self) -> &Forwarder<T> {
        &self.forwarder
    }
}

impl<T: Transport> ConnectionHandlerFactory for RelayFactory<T> {
    type Handler = RelayHandler<T>;

    fn new_handler(&self, peer: SocketAddr) -> Self::Handler {
        RelayHandler {
            forwarder: self.forwarder.clone(),
            settings: self.settings,
            peer,
        }
    }
}

pub struct RelayHandler<T> {
    forwarder: Arc<Forwarder<T>>,
    settings: RelaySettings,
    peer: SocketAddr,
}

impl<T: Transport> RelayHandler<T> {
    /// Parses, forwards and relays one request. Returns the body bytes sent.
    pub async fn serve(&self, socket: impl AsyncSocket) -> Result<u64, RelayError> {
        let (read, write) = tokio::io::split(socket);
        let mut reader = BufReader::with_capacity(self.settings.request_buffer_size, read);
        let request = ProxyRequest::read(
            &mut reader,
            self.settings.max_line_length,
            self.settings.max_request_body,
        )
        .await?;

        info!("processing request for {}", request.target);
        if request.range_start > 0 {
            debug!("range requested from byte {}", request.range_start);
        }

        let response = self.forwarder.forward(&request).await?;
        drop(reader);
        let copied = relay(response, write, self.settings.buffers).await?;
        debug!("relayed {} bytes from {}", copied, request.target);
        Ok(copied)
    }
}

impl<T: Transport> ConnectionHandler for RelayHandler<T> {
    async fn handle(self, socket: impl AsyncSocket) {
        match self.serve(socket).await {
            Ok(_) => {}
            Err(RelayError::Request(RequestError::EmptyRequest)) => {
                debug!("{} closed the connection without a request", self.peer)
            }
            Err(e) => warn!("request from {} failed: {}", self.peer, e),
        }
    }
}
