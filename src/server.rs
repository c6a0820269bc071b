use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use log::{debug, error, info, warn};
use tokio::{net::TcpListener, select, sync::Notify};
use url::Url;

use crate::{
    address::{AddressResolver, NetworkInfo},
    config::Config,
    error::RelayError,
    handler::{ConnectionHandler, ConnectionHandlerFactory},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle = 0,
    Running = 1,
    Stopped = 2,
}

impl From<u8> for State {
    fn from(v: u8) -> Self {
        match v {
            0 => State::Idle,
            1 => State::Running,
            _ => State::Stopped,
        }
    }
}

struct Lifecycle {
    state: AtomicU8,
    wake: Notify,
}

impl Lifecycle {
    fn state(&self) -> State {
        State::from(self.state.load(Ordering::SeqCst))
    }
}

/// Loopback relay bound at construction time.
///
/// The port never changes once bound. [`ProxyServer::start`] must be called
/// from within a tokio runtime and at most once; later calls are ignored.
pub struct ProxyServer<F> {
    config: Config,
    local_addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    lifecycle: Arc<Lifecycle>,
    factory: Arc<F>,
    network: Option<Arc<dyn NetworkInfo>>,
}

impl<F: ConnectionHandlerFactory> ProxyServer<F> {
    pub async fn bind(config: Config, factory: F) -> Result<Self, RelayError> {
        let addr = SocketAddr::new(config.bind_addr, config.port);
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(source) => {
                error!("unable to bind relay to {}: {}", addr, source);
                return Err(RelayError::Bind { addr, source });
            }
        };
        let local_addr = listener.local_addr()?;
        debug!("relay bound to {}", local_addr);
        Ok(ProxyServer {
            config,
            local_addr,
            listener: Mutex::new(Some(listener)),
            lifecycle: Arc::new(Lifecycle {
                state: AtomicU8::new(State::Idle as u8),
                wake: Notify::new(),
            }),
            factory: Arc::new(factory),
            network: None,
        })
    }

    pub fn start(&self) {
        if self
            .lifecycle
            .state
            .compare_exchange(
                State::Idle as u8,
                State::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            warn!("relay on {} was already started", self.local_addr);
            return;
        }
        let Some(listener) = self.take_listener() else {
            return;
        };
        info!("relay listening on {}", self.local_addr);
        tokio::spawn(accept_loop(
            listener,
            self.lifecycle.clone(),
            self.factory.clone(),
            self.config.accept_timeout,
        ));
    }
}

impl<F> ProxyServer<F> {
    pub fn with_network_info(mut self, network: impl NetworkInfo + 'static) -> Self {
        self.network = Some(Arc::new(network));
        self
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> State {
        self.lifecycle.state()
    }

    /// Stops admitting connections. In-flight connections are left to finish
    /// on their own.
    pub fn stop(&self) {
        let previous = State::from(
            self.lifecycle
                .state
                .swap(State::Stopped as u8, Ordering::SeqCst),
        );
        if previous == State::Running {
            self.lifecycle.wake.notify_one();
        }
        // never started: release the socket right away
        drop(self.take_listener());
    }

    pub fn private_address(&self, target: &str) -> Option<Url> {
        AddressResolver::new(self.port()).private(target)
    }

    pub fn public_address(&self, target: &str) -> Option<Url> {
        let Some(network) = &self.network else {
            warn!("no network information available for a public address");
            return None;
        };
        AddressResolver::new(self.port()).public(target, network.as_ref())
    }

    fn take_listener(&self) -> Option<TcpListener> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl<F> Drop for ProxyServer<F> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop<F: ConnectionHandlerFactory>(
    listener: TcpListener,
    lifecycle: Arc<Lifecycle>,
    factory: Arc<F>,
    accept_timeout: Duration,
) {
    while lifecycle.state() == State::Running {
        let accepted = select! {
            _ = lifecycle.wake.notified() => continue,
            accepted = tokio::time::timeout(accept_timeout, listener.accept()) => accepted,
        };
        match accepted {
            Err(_) => continue,
            Ok(Ok((socket, peer))) => {
                debug!("client connected from {}", peer);
                tokio::spawn(factory.new_handler(peer).handle(socket));
            }
            Ok(Err(e)) => warn!("error accepting relay client: {}", e),
        }
    }
    info!(
        "relay on {} stopped accepting connections",
        listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default()
    );
}
