//! The commodity correlated-randomness service (cf. Beaver,
//! "Commodity-Based Cryptography", STOC 1997).
//!
//! A semi-trusted server knows every party's PRG seed, which it distributed
//! at session setup. Whenever the parties need a batch of multiplication
//! triples or mask triples, each party expands its own seeded stream
//! locally; the server mirrors all streams, computes the XOR-aggregate and
//! sends a single *correction* to the designated party (party 0) that turns
//! the aggregate into a valid triple batch. The server never talks to the
//! parties during the online phase apart from these corrections, and no
//! pairwise oblivious transfer is needed for AND gates.
//!
//! A multiplication triple is a shared `(a, b, c)` with `c = a AND b` after
//! XOR-reconstruction; records are packed 32 triples wide so one record
//! covers 32 parallel AND gates. A mask triple is a shared `(a, B, C)` with
//! bit `a`, `L`-byte strings `B`, `C` and `C = B` if `a` else `C = 0`.

use std::fmt;

use futures::future::try_join_all;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, Level};

use crate::bits::{and_bytes, get_bit, xor_bytes, xor_inplace};
use crate::block::Block;
use crate::channel::{self, Channel};
use crate::crypto::AesRng;
use crate::mux::{Lane, Mux, SubChannel};

/// Triple records handed out per correction request.
pub const TRIPLES_PER_BATCH: usize = 64;

/// Bytes per packed triple component (32 triples per record).
pub(crate) const TRIPLE_BYTES: usize = 4;

/// A multiplication triple record covering 32 parallel AND gates.
///
/// This party's XOR share of `(a, b, c)`; across all parties,
/// bit `j` satisfies `c_j = a_j AND b_j`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triple {
    /// Share of the left random factor.
    pub a: u32,
    /// Share of the right random factor.
    pub b: u32,
    /// Share of the product.
    pub c: u32,
}

/// This party's XOR share of a mask triple `(a, B, C)` with `C = a * B`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskTriple {
    /// Share of the selector bit.
    pub a: bool,
    /// Share of the random byte string.
    pub b: Vec<u8>,
    /// Share of the masked byte string.
    pub c: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Request {
    Triples,
    MaskTriples { count: u32, width: u32 },
    Goodbye,
}

/// Errors raised by the commodity server or its clients.
#[derive(Debug)]
pub enum Error {
    /// A message could not be sent or received.
    Channel(channel::Error),
    /// The parties disagreed on what the next batch should be.
    RequestMismatch(String, String),
    /// A mask-triple batch shape that the service cannot produce.
    InvalidBatch {
        /// Requested number of triples (must be a positive multiple of 8).
        count: usize,
        /// Requested byte width (must be positive).
        width: usize,
    },
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Channel(e) => write!(f, "Commodity channel error: {e}"),
            Error::RequestMismatch(a, b) => {
                write!(f, "Parties sent diverging commodity requests: {a} vs {b}")
            }
            Error::InvalidBatch { count, width } => {
                write!(f, "Invalid mask triple batch: {count} triples of {width} bytes")
            }
        }
    }
}

impl From<channel::Error> for Error {
    fn from(e: channel::Error) -> Self {
        Self::Channel(e)
    }
}

/// Runs the commodity server for a session of `parties` compute parties and
/// `blocks` circuit blocks.
///
/// The server occupies transport endpoint `parties`. It seeds every party,
/// then serves each block's correction requests independently until all
/// parties have retired the block. Every party sends each batch request (the
/// server insists they agree, a cheap desynchronization tripwire), but only
/// the designated party receives the correction.
#[instrument(level = Level::DEBUG, skip(channel), err)]
pub async fn serve<C: Channel>(channel: &C, parties: usize, blocks: usize) -> Result<(), Error> {
    let mux = Mux::new(channel, parties, parties + 1, blocks);
    let work = async {
        let mut rng = AesRng::new();
        let mut block_states = Vec::with_capacity(blocks);
        for block in 0..blocks as u32 {
            let mut subs = Vec::with_capacity(parties);
            let mut streams = Vec::with_capacity(parties);
            for p in 0..parties {
                let sub = mux.subchannel(p, block, Lane::Triple);
                let seed: Block = rng.gen();
                sub.send("commodity seed", &[seed]).await?;
                streams.push(AesRng::from_seed(seed));
                subs.push(sub);
            }
            block_states.push((subs, streams));
        }
        debug!(parties, blocks, "commodity server seeded all parties");
        try_join_all(
            block_states
                .into_iter()
                .map(|(subs, streams)| serve_block(subs, streams)),
        )
        .await?;
        Ok(())
    };
    tokio::select! {
        r = work => r,
        e = mux.run() => Err(Error::Channel(e)),
    }
}

async fn serve_block<C: Channel>(
    mut subs: Vec<SubChannel<'_, C>>,
    mut streams: Vec<AesRng>,
) -> Result<(), Error> {
    loop {
        let mut request = None;
        for sub in subs.iter_mut() {
            let req: Request = sub.recv_one("commodity request").await?;
            match request {
                None => request = Some(req),
                Some(first) if first != req => {
                    return Err(Error::RequestMismatch(format!("{first:?}"), format!("{req:?}")))
                }
                Some(_) => {}
            }
        }
        match request.expect("a session has at least one party") {
            Request::Goodbye => return Ok(()),
            Request::Triples => {
                let len = TRIPLES_PER_BATCH * TRIPLE_BYTES;
                let (a, b, c) = aggregate(&mut streams, len, len);
                // desired = c XOR correction, so correction = desired XOR c
                let correction = xor_bytes(&and_bytes(&a, &b), &c);
                debug!("commodity server corrects a triple batch");
                subs[0].send("triple correction", &correction).await?;
            }
            Request::MaskTriples { count, width } => {
                let (count, width) = (count as usize, width as usize);
                if count == 0 || count % 8 != 0 || width == 0 {
                    return Err(Error::InvalidBatch { count, width });
                }
                let (a, b, c) = aggregate(&mut streams, count / 8, count * width);
                let mut correction = vec![0u8; count * width];
                for j in 0..count {
                    let seg = j * width..(j + 1) * width;
                    if get_bit(&a, j) {
                        // B is the desired output
                        correction[seg.clone()]
                            .copy_from_slice(&xor_bytes(&b[seg.clone()], &c[seg]));
                    } else {
                        // all 0 is the desired output
                        correction[seg.clone()].copy_from_slice(&c[seg]);
                    }
                }
                debug!(count, width, "commodity server corrects a mask triple batch");
                subs[0].send("mask triple correction", &correction).await?;
            }
        }
    }
}

/// XOR-aggregates the next `(a, b, c)` draw of every party's stream.
fn aggregate(streams: &mut [AesRng], a_len: usize, bc_len: usize) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let mut a = vec![0u8; a_len];
    let mut b = vec![0u8; bc_len];
    let mut c = vec![0u8; bc_len];
    let mut buf = vec![0u8; a_len.max(bc_len)];
    for stream in streams {
        stream.fill_bytes(&mut buf[..a_len]);
        xor_inplace(&mut a, &buf[..a_len]);
        stream.fill_bytes(&mut buf[..bc_len]);
        xor_inplace(&mut b, &buf[..bc_len]);
        stream.fill_bytes(&mut buf[..bc_len]);
        xor_inplace(&mut c, &buf[..bc_len]);
    }
    (a, b, c)
}

/// A party's client handle to the commodity server for one circuit block.
///
/// Pops single-bit multiplication triples in ascending bit order from
/// 32-wide records; a fresh batch is requested whenever the current one is
/// exhausted. Every party must consume triples in the same order, which the
/// deterministic circuit traversal guarantees.
pub struct TripleStream<'c, C: Channel> {
    sub: SubChannel<'c, C>,
    stream: AesRng,
    designated: bool,
    batch: Vec<Triple>,
    next: usize,
}

impl<'c, C: Channel> TripleStream<'c, C> {
    /// Awaits the server's seed on the block's triple sub-channel.
    pub async fn setup(mut sub: SubChannel<'c, C>, designated: bool) -> Result<Self, Error> {
        let seed: Block = sub.recv_one("commodity seed").await?;
        Ok(Self {
            sub,
            stream: AesRng::from_seed(seed),
            designated,
            batch: vec![],
            next: 0,
        })
    }

    /// Pops the next single-bit triple `(a, b, c)`.
    pub async fn next_triple(&mut self) -> Result<(bool, bool, bool), Error> {
        if self.next == self.batch.len() * 32 {
            self.refill().await?;
        }
        let record = &self.batch[self.next / 32];
        let i = self.next % 32;
        self.next += 1;
        Ok((
            (record.a >> i) & 1 == 1,
            (record.b >> i) & 1 == 1,
            (record.c >> i) & 1 == 1,
        ))
    }

    async fn refill(&mut self) -> Result<(), Error> {
        self.sub.send("commodity request", &[Request::Triples]).await?;
        let len = TRIPLES_PER_BATCH * TRIPLE_BYTES;
        let (a, b, mut c) = self.expand(len, len);
        if self.designated {
            let correction: Vec<u8> = self.sub.recv_n("triple correction", len).await?;
            xor_inplace(&mut c, &correction);
        }
        self.batch = (0..TRIPLES_PER_BATCH)
            .map(|j| {
                let seg = j * TRIPLE_BYTES..(j + 1) * TRIPLE_BYTES;
                Triple {
                    a: u32::from_le_bytes(a[seg.clone()].try_into().expect("4-byte record")),
                    b: u32::from_le_bytes(b[seg.clone()].try_into().expect("4-byte record")),
                    c: u32::from_le_bytes(c[seg].try_into().expect("4-byte record")),
                }
            })
            .collect();
        self.next = 0;
        debug!(triples = TRIPLES_PER_BATCH * 32, "refilled triple batch");
        Ok(())
    }

    /// Requests a batch of `count` mask triples of `width` bytes each.
    ///
    /// `count` must be a positive multiple of 8.
    pub async fn mask_triples(
        &mut self,
        count: usize,
        width: usize,
    ) -> Result<Vec<MaskTriple>, Error> {
        if count == 0 || count % 8 != 0 || width == 0 {
            return Err(Error::InvalidBatch { count, width });
        }
        let request = Request::MaskTriples {
            count: count as u32,
            width: width as u32,
        };
        self.sub.send("commodity request", &[request]).await?;
        let (a, b, mut c) = self.expand(count / 8, count * width);
        if self.designated {
            let correction: Vec<u8> = self
                .sub
                .recv_n("mask triple correction", count * width)
                .await?;
            xor_inplace(&mut c, &correction);
        }
        Ok((0..count)
            .map(|j| {
                let seg = j * width..(j + 1) * width;
                MaskTriple {
                    a: get_bit(&a, j),
                    b: b[seg.clone()].to_vec(),
                    c: c[seg].to_vec(),
                }
            })
            .collect())
    }

    /// Tells the server this block will make no further requests.
    pub async fn goodbye(&self) -> Result<(), Error> {
        self.sub.send("commodity request", &[Request::Goodbye]).await?;
        Ok(())
    }

    /// Draws the next `(a, b, c)` shares from the seeded stream, in the same
    /// order the server mirrors them.
    fn expand(&mut self, a_len: usize, bc_len: usize) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let mut a = vec![0u8; a_len];
        let mut b = vec![0u8; bc_len];
        let mut c = vec![0u8; bc_len];
        self.stream.fill_bytes(&mut a);
        self.stream.fill_bytes(&mut b);
        self.stream.fill_bytes(&mut c);
        (a, b, c)
    }
}
