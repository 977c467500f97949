pub(crate) mod frame;
pub(crate) mod server;

use std::net::SocketAddr;

use crate::types::UnitId;

/// Collaborator interface through which the Ethernet driver reports the state
/// of the physical link to the connection pool.
///
/// When the link is reported down for 5 seconds or longer, the pool starts
/// force-closing connections as they are visited; they are re-established
/// once the link returns.
pub trait LinkMonitor: Send {
    /// current state of the physical link
    fn is_up(&mut self) -> bool;
}

/// Default [`LinkMonitor`] that always reports the link as up
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysUp;

impl LinkMonitor for AlwaysUp {
    fn is_up(&mut self) -> bool {
        true
    }
}

/// Configuration of a TCP server
pub struct TcpServerConfig {
    /// local address and port to listen on
    pub addr: SocketAddr,
    /// number of connection slots served round-robin
    pub max_connections: usize,
    /// if present, frames for unit ids outside this list are silently dropped
    pub unit_ids: Option<Vec<UnitId>>,
    /// reports the state of the physical link
    pub link: Box<dyn LinkMonitor>,
}

impl TcpServerConfig {
    /// default number of connection slots
    pub const DEFAULT_MAX_CONNECTIONS: usize = 7;

    /// configuration with the default pool size, no unit id filter, and a
    /// link that is always up
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            unit_ids: None,
            link: Box::new(AlwaysUp),
        }
    }

    /// set the number of connection slots
    pub fn max_connections(mut self, count: usize) -> Self {
        self.max_connections = count;
        self
    }

    /// only accept frames addressed to these unit ids
    pub fn unit_filter(mut self, unit_ids: Vec<UnitId>) -> Self {
        self.unit_ids = Some(unit_ids);
        self
    }

    /// install a link monitor
    pub fn link_monitor(mut self, link: Box<dyn LinkMonitor>) -> Self {
        self.link = link;
        self
    }
}
