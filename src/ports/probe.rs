use std::net::{Ipv4Addr, TcpListener};

/// Answers whether a loopback TCP port is already in use on this host.
pub trait PortProbe: Send + Sync {
    fn is_bound(&self, port: u16) -> bool;
}

/// Probes by trying to bind `127.0.0.1:<port>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalPortProbe;

impl PortProbe for LocalPortProbe {
    fn is_bound(&self, port: u16) -> bool {
        TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_err()
    }
}
