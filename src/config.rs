use std::{
    net::{IpAddr, Ipv4Addr},
    time::Duration,
};

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: IpAddr,
    /// `0` asks the OS for an ephemeral port.
    pub port: u16,
    /// Upper bound on how long a stop request can go unnoticed by the accept loop.
    pub accept_timeout: Duration,
    pub request_buffer_size: usize,
    pub max_line_length: usize,
    /// Largest request body read from the client and forwarded upstream.
    pub max_request_body: u64,
    pub copy_buffer_size: usize,
    pub write_buffer_size: usize,
    pub max_redirects: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            accept_timeout: Duration::from_secs(5),
            request_buffer_size: 8 * 1024,
            max_line_length: 8 * 1024,
            max_request_body: 1024 * 1024,
            copy_buffer_size: 32 * 1024,
            write_buffer_size: 64 * 1024,
            max_redirects: 20,
        }
    }
}
