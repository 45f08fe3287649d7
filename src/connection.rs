use tokio::sync::mpsc;

use crate::protocol::ServerMessage;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

/// Id source for accepted connections, owned by the accept loop.
#[derive(Debug, Default)]
pub struct ConnectionIds {
    last: u64,
}

impl ConnectionIds {
    pub fn next_id(&mut self) -> ConnectionId {
        self.last += 1;
        ConnectionId(self.last)
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Message(ServerMessage),
    Close,
}

/// Sending half of one client's duplex channel. The socket task on the
/// other end writes whatever arrives here.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, tx: mpsc::UnboundedSender<Outgoing>) -> Self {
        Self { id, tx }
    }

    /// A handle plus the receiver the writer task drains.
    pub fn channel(id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(id, tx), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Sends are best effort; a closed peer just drops the message.
    pub fn send(&self, msg: ServerMessage) {
        let _ = self.tx.send(Outgoing::Message(msg));
    }

    pub fn close(&self) {
        let _ = self.tx.send(Outgoing::Close);
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}
