//! Oblivious transfer: Naor–Pinkas base OTs seeding an IKNP-style extension.
//!
//! A small, fixed number of public-key base OTs ([`naor_pinkas`]) is executed
//! once per sub-channel bundle; afterwards the extension ([`extension`])
//! realises arbitrarily many 1-of-2 string OTs with nothing but symmetric
//! primitives and XORs. Matching `send`/`receive` calls at the two peers
//! consume OTs in FIFO order; reordering would break the correspondence
//! between selector bits and messages and is treated as session-fatal.

pub(crate) mod extension;
pub(crate) mod naor_pinkas;

use std::fmt;

use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};

use crate::block::Block;
use crate::channel;

/// Errors raised by the OT layer.
#[derive(Debug)]
pub enum Error {
    /// A message could not be sent or received.
    Channel(channel::Error),
    /// A received group element was not a valid curve point.
    InvalidPoint,
    /// An extension matrix row had the wrong width.
    MatrixShape,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Channel(e) => write!(f, "OT channel error: {e}"),
            Error::InvalidPoint => f.write_str("OT message is not a valid curve point"),
            Error::MatrixShape => f.write_str("OT extension matrix has the wrong shape"),
        }
    }
}

impl From<channel::Error> for Error {
    fn from(e: channel::Error) -> Self {
        Self::Channel(e)
    }
}

/// Derives a key block from a curve point, domain-separated by the tweak.
pub(crate) fn hash_point(tweak: u128, pt: &RistrettoPoint) -> Block {
    let h = blake3::keyed_hash(pt.compress().as_bytes(), &tweak.to_le_bytes());
    Block::new(h.as_bytes()[..16].try_into().expect("16 of 32 hash bytes"))
}

pub(crate) fn decompress_point(bytes: [u8; 32]) -> Result<RistrettoPoint, Error> {
    CompressedRistretto(bytes)
        .decompress()
        .ok_or(Error::InvalidPoint)
}
