//! Each room runs as its own task. The task owns the [`Room`] and all of its
//! timers; the rest of the server talks to it through a [`RoomHandle`].

use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep_until;
use tracing::debug;

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::protocol::ClientMessage;
use crate::room::Room;

#[derive(Debug)]
pub enum RoomCommand {
    Connect {
        conn: ConnectionHandle,
        hello: ClientMessage,
        reply: oneshot::Sender<bool>,
    },
    Message {
        conn_id: ConnectionId,
        msg: ClientMessage,
    },
    Closed {
        conn_id: ConnectionId,
    },
    Destroy,
}

#[derive(Debug, Clone)]
pub struct RoomHandle {
    code: String,
    tx: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Offers `hello` to the room. Resolves to whether the connection was
    /// bound; a room that has gone away counts as a refusal.
    pub async fn connect(&self, conn: ConnectionHandle, hello: ClientMessage) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(RoomCommand::Connect { conn, hello, reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub fn send(&self, conn_id: ConnectionId, msg: ClientMessage) {
        let _ = self.tx.send(RoomCommand::Message { conn_id, msg });
    }

    pub fn closed(&self, conn_id: ConnectionId) {
        let _ = self.tx.send(RoomCommand::Closed { conn_id });
    }

    pub fn destroy(&self) {
        let _ = self.tx.send(RoomCommand::Destroy);
    }
}

/// Current time on the tokio clock, which tests can pause and advance.
pub fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

pub fn spawn_room(room: Room) -> (RoomHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = RoomHandle {
        code: room.code().to_string(),
        tx,
    };
    let task = tokio::spawn(run_room(room, rx));
    (handle, task)
}

async fn run_room(mut room: Room, mut rx: mpsc::UnboundedReceiver<RoomCommand>) {
    while !room.is_destroyed() {
        let deadline = room.next_deadline();
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(RoomCommand::Connect { conn, hello, reply }) => {
                    let bound = room.connect(conn, hello, now());
                    let _ = reply.send(bound);
                }
                Some(RoomCommand::Message { conn_id, msg }) => room.receive(conn_id, msg, now()),
                Some(RoomCommand::Closed { conn_id }) => room.closed(conn_id, now()),
                Some(RoomCommand::Destroy) | None => room.destroy(),
            },
            _ = wait_until(deadline) => room.poll(now()),
        }
    }
    debug!(room = %room.code(), "room task finished");
}
