use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::time::{Duration, Instant};

use crate::common::frame::{Frame, FrameDestination, FramedReader};
use crate::common::phys::PhysLayer;
use crate::decode::{DecodeLevel, PhysDecodeLevel};
use crate::error::RequestError;
use crate::tcp::{LinkMonitor, TcpServerConfig};
use crate::types::UnitId;

/// how long the link may be reported down before connections are force-closed
pub(crate) const LINK_DOWN_CLOSE_DELAY: Duration = Duration::from_secs(5);

enum Slot {
    /// free; the next visit performs a bounded accept
    Listening,
    Connected(Connection),
}

struct Connection {
    phys: PhysLayer,
    reader: FramedReader,
    peer: SocketAddr,
}

/// Owns the listener and a fixed pool of connection slots served round-robin.
///
/// Each `poll` call advances a cursor and inspects exactly one slot, so the
/// per-call latency is bounded regardless of the pool size. The slot that
/// produced the in-flight request is retained so the reply reaches the same
/// peer.
pub(crate) struct ConnectionPool {
    listener: TcpListener,
    slots: Vec<Slot>,
    cursor: usize,
    current: Option<usize>,
    unit_ids: Option<Vec<UnitId>>,
    link: Box<dyn LinkMonitor>,
    /// last instant at which the link was reported up
    link_up_at: Instant,
}

impl ConnectionPool {
    pub(crate) async fn bind(config: TcpServerConfig) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(config.addr).await?;
        let count = config.max_connections.max(1);
        Ok(Self {
            listener,
            slots: (0..count).map(|_| Slot::Listening).collect(),
            cursor: 0,
            current: None,
            unit_ids: config.unit_ids,
            link: config.link,
            link_up_at: Instant::now(),
        })
    }

    pub(crate) fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Inspect a single slot and return a complete frame if one is available
    /// within the timeout. All transport-level noise (timeouts, empty reads,
    /// I/O errors, foreign unit ids) yields `None`.
    pub(crate) async fn poll(&mut self, timeout: Duration, decode: DecodeLevel) -> Option<Frame> {
        let index = self.cursor;
        self.cursor = (self.cursor + 1) % self.slots.len();
        self.current = None;

        if !self.link.is_up() {
            // connections survive a short link loss; a persistent one closes
            // the inspected slot so the peer can re-establish it cleanly later
            if self.link_up_at.elapsed() >= LINK_DOWN_CLOSE_DELAY {
                if let Slot::Connected(conn) = &self.slots[index] {
                    tracing::warn!(
                        "link down for {:?}, closing connection from {}",
                        LINK_DOWN_CLOSE_DELAY,
                        conn.peer
                    );
                    self.slots[index] = Slot::Listening;
                }
            }
            return None;
        }
        self.link_up_at = Instant::now();

        let deadline = Instant::now() + timeout;

        if let Slot::Listening = self.slots[index] {
            match tokio::time::timeout_at(deadline, self.listener.accept()).await {
                Err(_elapsed) => return None,
                Ok(Err(err)) => {
                    tracing::debug!("error accepting connection: {}", err);
                    return None;
                }
                Ok(Ok((socket, peer))) => {
                    tracing::info!("accepted connection from {}", peer);
                    self.slots[index] = Slot::Connected(Connection {
                        phys: PhysLayer::new_tcp(socket),
                        reader: FramedReader::tcp(),
                        peer,
                    });
                }
            }
        }

        let (peer, result) = match &mut self.slots[index] {
            Slot::Connected(conn) => {
                let peer = conn.peer;
                let result = tokio::time::timeout_at(
                    deadline,
                    conn.reader.next_frame(&mut conn.phys, decode),
                )
                .await;
                (peer, result)
            }
            Slot::Listening => return None,
        };

        match result {
            // partial data stays buffered in the slot until the next visit
            Err(_elapsed) => None,
            Ok(Err(err)) => {
                match err {
                    RequestError::Io(std::io::ErrorKind::UnexpectedEof) => {
                        tracing::info!("connection from {} closed by peer", peer)
                    }
                    _ => tracing::debug!("closing connection from {}: {}", peer, err),
                }
                // the slot is recycled and will listen again on a later visit
                self.slots[index] = Slot::Listening;
                None
            }
            Ok(Ok(frame)) => {
                if let Some(allowed) = &self.unit_ids {
                    let unit_id = match frame.header.destination {
                        FrameDestination::UnitId(x) => x,
                        FrameDestination::Broadcast => UnitId::broadcast(),
                    };
                    if !allowed.contains(&unit_id) {
                        tracing::debug!("discarding frame for foreign unit id {}", unit_id);
                        return None;
                    }
                }
                self.current = Some(index);
                Some(frame)
            }
        }
    }

    /// Write a response to the slot that produced the in-flight request. Write
    /// failures recycle the slot; other peers are unaffected.
    pub(crate) async fn reply(&mut self, bytes: &[u8], decode: PhysDecodeLevel) {
        let index = match self.current.take() {
            Some(x) => x,
            None => return,
        };
        let result = match &mut self.slots[index] {
            Slot::Connected(conn) => {
                let peer = conn.peer;
                conn.phys.write(bytes, decode).await.map_err(|err| (peer, err))
            }
            Slot::Listening => return,
        };
        if let Err((peer, err)) = result {
            tracing::debug!("error writing to {}: {}", peer, err);
            self.slots[index] = Slot::Listening;
        }
    }

    #[cfg(test)]
    fn is_connected(&self, index: usize) -> bool {
        matches!(self.slots[index], Slot::Connected(_))
    }
}
