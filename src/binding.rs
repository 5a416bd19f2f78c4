use std::net::{IpAddr, SocketAddr};

/// An (IP, port) pair, used as the channel key for outbound channels and
/// for listeners. Inbound channels key by the remote (address, port)
/// observed on accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Binding {
    pub ip: IpAddr,
    pub port: u16,
}

impl Binding {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Binding { ip, port }
    }
}

impl From<SocketAddr> for Binding {
    fn from(addr: SocketAddr) -> Self {
        Binding {
            ip: addr.ip(),
            port: addr.port(),
        }
    }
}

impl From<Binding> for SocketAddr {
    fn from(binding: Binding) -> Self {
        SocketAddr::new(binding.ip, binding.port)
    }
}

impl std::fmt::Display for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}
