//! Communication channels for sending and receiving messages between
//! parties.
//!
//! The [`Channel`] trait is the fundamental transport abstraction: a
//! party-indexed, bidirectional byte pipe. Protocol code never touches it
//! directly — it talks to the typed sub-channels handed out by
//! [`crate::mux::Mux`] — so transports can be swapped (network sockets,
//! in-memory channels, a pub/sub broker) without changing protocol code.
//! The only property a transport must provide is FIFO delivery per ordered
//! pair of parties.
//!
//! [`SimpleChannel`] is an in-memory implementation over tokio mpsc queues,
//! used by tests and simulations.

use std::fmt;

use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::Mutex;
use tracing::trace;

/// Errors related to sending / receiving / (de-)serializing messages.
#[derive(Debug)]
pub struct Error {
    /// The protocol phase during which the error occurred.
    pub phase: String,
    /// The specific error that was raised.
    pub reason: ErrorKind,
}

/// The specific error that occurred when trying to send / receive a message.
#[derive(Debug)]
pub enum ErrorKind {
    /// The (serialized) message could not be received over the channel.
    RecvError(String),
    /// The (serialized) message could not be sent over the channel.
    SendError(String),
    /// The message could not be (de-)serialized.
    SerdeError(String),
    /// The message is a Vec, but not of the expected length.
    InvalidLength,
    /// A frame did not carry a well-formed sub-channel header.
    InvalidFrame,
    /// The transport was closed before the message arrived.
    Closed,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Error { phase, reason } = self;
        match reason {
            ErrorKind::RecvError(e) => write!(f, "Could not receive {phase}: {e}"),
            ErrorKind::SendError(e) => write!(f, "Could not send {phase}: {e}"),
            ErrorKind::SerdeError(e) => write!(f, "Could not (de-)serialize {phase}: {e}"),
            ErrorKind::InvalidLength => write!(f, "Unexpected length for {phase}"),
            ErrorKind::InvalidFrame => write!(f, "Malformed frame header for {phase}"),
            ErrorKind::Closed => write!(f, "Transport closed while waiting for {phase}"),
        }
    }
}

impl Error {
    pub(crate) fn new(phase: &str, reason: ErrorKind) -> Self {
        Self {
            phase: phase.to_string(),
            reason,
        }
    }
}

/// A communication channel used to send/receive messages to/from another
/// party.
///
/// Implementations determine how bytes are physically moved; the runtime
/// only assumes that messages between the same ordered pair of parties
/// arrive exactly once, intact and in order.
pub trait Channel {
    /// The error that can occur sending messages over the channel.
    type SendError: fmt::Debug;
    /// The error that can occur receiving messages over the channel.
    type RecvError: fmt::Debug;

    /// Sends a message to the party with the given index.
    // We allow the async_fn_in_trait lint because we don't need to place
    // additional bounds on the returned future.
    #[allow(async_fn_in_trait)]
    async fn send_bytes_to(&self, party: usize, msg: Vec<u8>) -> Result<(), Self::SendError>;

    /// Awaits the next message from the party with the given index.
    #[allow(async_fn_in_trait)]
    async fn recv_bytes_from(&self, party: usize) -> Result<Vec<u8>, Self::RecvError>;
}

/// A simple asynchronous in-memory channel over tokio mpsc queues.
#[derive(Debug)]
pub struct SimpleChannel {
    s: Vec<Option<Sender<Vec<u8>>>>,
    r: Vec<Option<Mutex<Receiver<Vec<u8>>>>>,
}

impl SimpleChannel {
    /// Creates channels for N parties to communicate with each other.
    pub fn channels(parties: usize) -> Vec<Self> {
        let buffer_capacity = 1024;
        let mut channels: Vec<Self> = (0..parties)
            .map(|_| SimpleChannel {
                s: (0..parties).map(|_| None).collect(),
                r: (0..parties).map(|_| None).collect(),
            })
            .collect();
        for a in 0..parties {
            for b in 0..parties {
                if a == b {
                    continue;
                }
                let (send_a_to_b, recv_a_to_b) = channel(buffer_capacity);
                channels[a].s[b] = Some(send_a_to_b);
                channels[b].r[a] = Some(Mutex::new(recv_a_to_b));
            }
        }
        channels
    }
}

/// The error raised by `recv` calls of a [`SimpleChannel`].
#[derive(Debug)]
pub enum SimpleRecvError {
    /// The channel has been closed.
    Closed,
    /// No message was received before the timeout.
    TimeoutElapsed,
}

impl Channel for SimpleChannel {
    type SendError = tokio::sync::mpsc::error::SendError<Vec<u8>>;
    type RecvError = SimpleRecvError;

    async fn send_bytes_to(
        &self,
        p: usize,
        msg: Vec<u8>,
    ) -> Result<(), tokio::sync::mpsc::error::SendError<Vec<u8>>> {
        trace!(to = p, bytes = msg.len(), "sending msg");
        self.s[p]
            .as_ref()
            .unwrap_or_else(|| panic!("No sender for party {p}"))
            .send(msg)
            .await
    }

    async fn recv_bytes_from(&self, p: usize) -> Result<Vec<u8>, SimpleRecvError> {
        let mut r = self.r[p]
            .as_ref()
            .unwrap_or_else(|| panic!("No receiver for party {p}"))
            .lock()
            .await;
        let timeout = std::time::Duration::from_secs(10 * 60);
        match tokio::time::timeout(timeout, r.recv()).await {
            Ok(Some(msg)) => {
                trace!(from = p, bytes = msg.len(), "received msg");
                Ok(msg)
            }
            Ok(None) => Err(SimpleRecvError::Closed),
            Err(_) => Err(SimpleRecvError::TimeoutElapsed),
        }
    }
}
