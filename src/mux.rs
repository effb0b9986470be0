//! Sub-channel multiplexing over a single framed transport per peer.
//!
//! A session exchanges many logically independent message streams with every
//! peer: garbled tables and keys per circuit block, oblivious-transfer setup
//! and extension traffic, commodity-server corrections. Instead of binding
//! one transport channel per stream, every frame carries a small
//! `(block, lane)` header and [`Mux`] routes inbound frames into per-stream
//! FIFO queues. Protocol code only ever sees typed [`SubChannel`]s; the
//! demultiplexer is invisible to the virtual machines.
//!
//! Ordering: frames of one sub-channel are FIFO; nothing is guaranteed
//! across sub-channels, and no protocol in this crate assumes otherwise.
//! The router stops at the first transport error, which closes every
//! sub-channel of the session and cancels it.

use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::try_join_all;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::trace;

use crate::channel::{Channel, Error, ErrorKind};

/// The logical sub-channels exchanged between a pair of parties per block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Lane {
    /// Garbled tables and wire keys (generator to evaluator), or the share
    /// and masked-value traffic of the GMW engine.
    Gate = 0,
    /// Replies flowing against the gate stream, e.g. revealed keys.
    Reply = 1,
    /// Commodity-server requests, seeds and corrections.
    Triple = 2,
    /// Base-OT group parameter setup.
    OtParam = 3,
    /// Base-OT receiver public keys.
    OtPk = 4,
    /// Base-OT ciphertexts.
    OtCipher = 5,
    /// OT extension matrices and ciphertext pairs.
    OtExt = 6,
}

impl Lane {
    const ALL: [Lane; 7] = [
        Lane::Gate,
        Lane::Reply,
        Lane::Triple,
        Lane::OtParam,
        Lane::OtPk,
        Lane::OtCipher,
        Lane::OtExt,
    ];

    fn from_u8(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|lane| *lane as u8 == tag)
    }
}

const HEADER_LEN: usize = 5;

type Route = (usize, u32, Lane);

/// Demultiplexer for all protocol traffic of one session.
///
/// Constructed once per party and session; [`Mux::subchannel`] hands out
/// each `(peer, block, lane)` stream exactly once, and [`Mux::run`] must be
/// polled concurrently with the session for inbound frames to be routed.
pub struct Mux<'c, C> {
    channel: &'c C,
    party: usize,
    endpoints: usize,
    routes: HashMap<Route, UnboundedSender<Vec<u8>>>,
    inboxes: Mutex<HashMap<Route, UnboundedReceiver<Vec<u8>>>>,
}

impl<'c, C: Channel> Mux<'c, C> {
    /// Creates the sub-channel queues for a session of `blocks` blocks
    /// between `endpoints` transport endpoints (compute parties plus any
    /// dealer), of which this party is `party`.
    pub fn new(channel: &'c C, party: usize, endpoints: usize, blocks: usize) -> Self {
        let mut routes = HashMap::new();
        let mut inboxes = HashMap::new();
        for peer in (0..endpoints).filter(|p| *p != party) {
            for block in 0..blocks as u32 {
                for lane in Lane::ALL {
                    let (tx, rx) = unbounded_channel();
                    routes.insert((peer, block, lane), tx);
                    inboxes.insert((peer, block, lane), rx);
                }
            }
        }
        Self {
            channel,
            party,
            endpoints,
            routes,
            inboxes: Mutex::new(inboxes),
        }
    }

    /// Takes ownership of the sub-channel to `peer` for `(block, lane)`.
    ///
    /// # Panics
    /// If the sub-channel was already handed out or does not exist.
    pub fn subchannel(&self, peer: usize, block: u32, lane: Lane) -> SubChannel<'c, C> {
        let rx = self
            .inboxes
            .lock()
            .expect("mux inbox lock poisoned")
            .remove(&(peer, block, lane))
            .unwrap_or_else(|| panic!("subchannel ({peer}, {block}, {lane:?}) handed out twice"));
        SubChannel {
            channel: self.channel,
            peer,
            block,
            lane,
            rx,
        }
    }

    /// Routes inbound frames until the transport fails or closes.
    ///
    /// This future never completes successfully; it is raced against the
    /// session future, and its error is the session-fatal cancellation
    /// signal of the whole session.
    pub async fn run(&self) -> Error {
        let peers = (0..self.endpoints).filter(|p| *p != self.party);
        match try_join_all(peers.map(|p| self.route_peer(p))).await {
            Ok(_) => Error::new("routing", ErrorKind::Closed),
            Err(e) => e,
        }
    }

    async fn route_peer(&self, peer: usize) -> Result<(), Error> {
        loop {
            let frame = self
                .channel
                .recv_bytes_from(peer)
                .await
                .map_err(|e| Error::new("routing", ErrorKind::RecvError(format!("{e:?}"))))?;
            if frame.len() < HEADER_LEN {
                return Err(Error::new("routing", ErrorKind::InvalidFrame));
            }
            let block = u32::from_le_bytes(frame[0..4].try_into().expect("4 header bytes"));
            let Some(lane) = Lane::from_u8(frame[4]) else {
                return Err(Error::new("routing", ErrorKind::InvalidFrame));
            };
            trace!(peer, block, ?lane, bytes = frame.len(), "routing frame");
            let Some(tx) = self.routes.get(&(peer, block, lane)) else {
                return Err(Error::new("routing", ErrorKind::InvalidFrame));
            };
            if tx.send(frame[HEADER_LEN..].to_vec()).is_err() {
                // Traffic for a stream this session already finished with:
                // a protocol violation, not a recoverable condition.
                return Err(Error::new("routing", ErrorKind::InvalidFrame));
            }
        }
    }
}

/// One FIFO message stream to and from a single peer.
///
/// Sends are tagged with the stream's `(block, lane)` header and go straight
/// to the transport; receives are fed by the session's [`Mux`].
pub struct SubChannel<'c, C> {
    channel: &'c C,
    peer: usize,
    block: u32,
    lane: Lane,
    rx: UnboundedReceiver<Vec<u8>>,
}

impl<C: Channel> SubChannel<'_, C> {
    /// The peer this stream is connected to.
    pub fn peer(&self) -> usize {
        self.peer
    }

    /// Serializes and sends a message on this stream.
    pub async fn send<S: Serialize>(&self, phase: &str, msg: &[S]) -> Result<(), Error> {
        let mut frame = Vec::with_capacity(HEADER_LEN + 8);
        frame.extend_from_slice(&self.block.to_le_bytes());
        frame.push(self.lane as u8);
        bincode::serialize_into(&mut frame, msg)
            .map_err(|e| Error::new(phase, ErrorKind::SerdeError(format!("{e:?}"))))?;
        self.channel
            .send_bytes_to(self.peer, frame)
            .await
            .map_err(|e| Error::new(phase, ErrorKind::SendError(format!("{e:?}"))))
    }

    /// Receives and deserializes the next message on this stream.
    pub async fn recv<T: DeserializeOwned>(&mut self, phase: &str) -> Result<Vec<T>, Error> {
        let payload = self
            .rx
            .recv()
            .await
            .ok_or_else(|| Error::new(phase, ErrorKind::Closed))?;
        bincode::deserialize(&payload)
            .map_err(|e| Error::new(phase, ErrorKind::SerdeError(format!("{e:?}"))))
    }

    /// Receives a message of an exact expected length.
    pub async fn recv_n<T: DeserializeOwned>(
        &mut self,
        phase: &str,
        len: usize,
    ) -> Result<Vec<T>, Error> {
        let v = self.recv(phase).await?;
        if v.len() == len {
            Ok(v)
        } else {
            Err(Error::new(phase, ErrorKind::InvalidLength))
        }
    }

    /// Receives a message consisting of exactly one element.
    pub async fn recv_one<T: DeserializeOwned>(&mut self, phase: &str) -> Result<T, Error> {
        Ok(self
            .recv_n(phase, 1)
            .await?
            .pop()
            .expect("recv_n checked the length"))
    }
}
