use std::net::Ipv4Addr;

use log::warn;
use url::Url;

/// Source of the device's current network-interface address.
///
/// Platforms report the IPv4 address as a 32-bit integer whose in-memory bytes
/// are already in network order.
pub trait NetworkInfo: Send + Sync {
    fn raw_ipv4(&self) -> Option<u32>;
}

impl<F> NetworkInfo for F
where
    F: Fn() -> Option<u32> + Send + Sync,
{
    fn raw_ipv4(&self) -> Option<u32> {
        self()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AddressResolver {
    port: u16,
}

impl AddressResolver {
    pub fn new(port: u16) -> Self {
        AddressResolver { port }
    }

    pub fn private(&self, target: &str) -> Option<Url> {
        self.address(Ipv4Addr::LOCALHOST, target)
    }

    pub fn public(&self, target: &str, network: &dyn NetworkInfo) -> Option<Url> {
        let Some(host) = network.raw_ipv4().and_then(normalize_ipv4) else {
            warn!("unable to determine the device network address");
            return None;
        };
        self.address(host, target)
    }

    fn address(&self, host: Ipv4Addr, target: &str) -> Option<Url> {
        let url = format!(
            "http://{}:{}/{}",
            host,
            self.port,
            urlencoding::encode(target)
        );
        match Url::parse(&url) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("unable to build relay address {}: {}", url, e);
                None
            }
        }
    }
}

pub(crate) fn normalize_ipv4(raw: u32) -> Option<Ipv4Addr> {
    let addr = Ipv4Addr::from(raw.to_ne_bytes());
    (!addr.is_unspecified()).then_some(addr)
}
