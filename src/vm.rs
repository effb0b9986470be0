//! The gate-level virtual-machine interface driven by circuit front ends.
//!
//! A circuit is written once against the [`Vm`] trait and can then be run by
//! any of the engine back ends: the garbled-circuit [`crate::yao::Generator`]
//! and [`crate::yao::Evaluator`], or the N-party [`crate::gmw::Party`]. Wire
//! representations are opaque and deliberately not shared across back ends.
//!
//! A [`Circuit`] bundles the number of independent blocks (parallel
//! sub-circuits) with the entry point that drives one block's VM; the engine
//! entry points create one VM per block over the shared peer transport and
//! drive all blocks concurrently.

use std::fmt;

use futures::future::try_join_all;

use crate::channel::{self, Channel};
use crate::mux::Mux;
use crate::{commodity, ot};

/// A fatal session error.
///
/// No variant is ever retried: an MPC state machine is not safely resumable
/// mid-session, so every error tears the session down.
#[derive(Debug)]
pub enum Error {
    /// A message could not be sent, received or decoded.
    Channel(channel::Error),
    /// The oblivious-transfer layer failed.
    Ot(ot::Error),
    /// The commodity correlated-randomness service failed.
    Commodity(commodity::Error),
    /// Two wire vectors passed to a gate differ in length.
    WireLengthMismatch {
        /// The operation that was invoked.
        op: &'static str,
        /// Length of the left operand.
        left: usize,
        /// Length of the right operand.
        right: usize,
    },
    /// A gate operation was invoked on zero wires.
    EmptyWireRequest {
        /// The operation that was invoked.
        op: &'static str,
    },
    /// A share request exceeded the 64-bit value width.
    ShareTooWide {
        /// The requested number of bits.
        bits: usize,
    },
    /// A party index outside of the session was referenced.
    UnknownParty {
        /// The referenced party.
        party: usize,
        /// Number of parties in the session.
        parties: usize,
    },
    /// A revealed key matched neither of the wire's two labels.
    RevealedKeyMismatch,
    /// A decrypted reveal-table slot did not contain a 0/1 literal.
    InvalidRevealByte(u8),
    /// A garbled table arrived with the wrong number of ciphertext slots.
    GarbledTableShape {
        /// Expected number of slots.
        expected: usize,
        /// Received number of slots.
        actual: usize,
    },
    /// The circuit handle declared zero blocks.
    NoBlocks,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Channel(e) => write!(f, "Channel error: {e}"),
            Error::Ot(e) => write!(f, "OT error: {e}"),
            Error::Commodity(e) => write!(f, "Commodity error: {e}"),
            Error::WireLengthMismatch { op, left, right } => {
                write!(f, "Wire mismatch in {op}: {left} vs {right} wires")
            }
            Error::EmptyWireRequest { op } => write!(f, "{op} invoked on zero wires"),
            Error::ShareTooWide { bits } => write!(f, "Cannot share {bits} bits of a 64-bit value"),
            Error::UnknownParty { party, parties } => {
                write!(f, "Party {party} does not exist in a {parties}-party session")
            }
            Error::RevealedKeyMismatch => {
                f.write_str("Revealed key matches neither wire label")
            }
            Error::InvalidRevealByte(b) => {
                write!(f, "Reveal table decrypted to {b:#04x} instead of a 0/1 literal")
            }
            Error::GarbledTableShape { expected, actual } => {
                write!(f, "Garbled table has {actual} slots, expected {expected}")
            }
            Error::NoBlocks => f.write_str("Circuit handle declares zero blocks"),
        }
    }
}

impl From<channel::Error> for Error {
    fn from(e: channel::Error) -> Self {
        Self::Channel(e)
    }
}

impl From<ot::Error> for Error {
    fn from(e: ot::Error) -> Self {
        Self::Ot(e)
    }
}

impl From<commodity::Error> for Error {
    fn from(e: commodity::Error) -> Self {
        Self::Commodity(e)
    }
}

/// The gate instruction set of one circuit block.
///
/// Inputs of binary gates are wire vectors of equal length and the output
/// vector has the same length. Gates that need communication are async and
/// suspend on their sub-channels; `xor`, `not` and `constant` are pure local
/// computation in every back end.
#[allow(async_fn_in_trait)]
pub trait Vm {
    /// The back end's wire representation.
    type Wire: Clone + fmt::Debug;

    /// This party's index within the session.
    fn party(&self) -> usize;

    /// Number of compute parties in the session.
    fn parties(&self) -> usize;

    /// A wire carrying the public constant `bit`.
    fn constant(&mut self, bit: bool) -> Self::Wire;

    /// Bitwise XOR. Free: no communication in any back end.
    fn xor(&mut self, a: &[Self::Wire], b: &[Self::Wire]) -> Result<Vec<Self::Wire>, Error>;

    /// Bitwise NOT, derived from XOR with the constant-1 wire.
    fn not(&mut self, a: &[Self::Wire]) -> Result<Vec<Self::Wire>, Error> {
        let ones = vec![self.constant(true); a.len()];
        self.xor(a, &ones)
    }

    /// Bitwise AND.
    async fn and(
        &mut self,
        a: &[Self::Wire],
        b: &[Self::Wire],
    ) -> Result<Vec<Self::Wire>, Error>;

    /// Bitwise OR. The default derivation `(a ^ b) ^ (a & b)` costs one AND;
    /// back ends with a native OR gate override it.
    async fn or(&mut self, a: &[Self::Wire], b: &[Self::Wire]) -> Result<Vec<Self::Wire>, Error> {
        let x = self.xor(a, b)?;
        let y = self.and(a, b).await?;
        self.xor(&x, &y)
    }

    /// Secret-shares the low `bits` bits of party `from`'s `value`.
    ///
    /// Every party calls this with the same `from` and `bits`; `value` is
    /// only read by the party that owns the input. `bits` must be in 1..=64.
    async fn share(
        &mut self,
        from: usize,
        value: u64,
        bits: usize,
    ) -> Result<Vec<Self::Wire>, Error>;

    /// Wires carrying uniformly random secret bits unknown to any party.
    async fn random(&mut self, bits: usize) -> Result<Vec<Self::Wire>, Error>;

    /// Reveals the wires' logical values to party `to` only.
    ///
    /// Returns `Some(bits)` at `to` and `None` everywhere else.
    async fn reveal_to(
        &mut self,
        to: usize,
        a: &[Self::Wire],
    ) -> Result<Option<Vec<bool>>, Error>;

    /// Reveals the wires' logical values to every party.
    async fn reveal(&mut self, a: &[Self::Wire]) -> Result<Vec<bool>, Error>;
}

/// A circuit handle supplied by the front end.
///
/// `blocks` independent sub-circuits make up the computation; each is driven
/// by one call to [`Circuit::run`] with its own VM. The blocks of a session
/// only interact through the shared peer transport, so the engines run them
/// concurrently. A party's private inputs live inside the `Circuit`
/// implementation and flow into the computation via [`Vm::share`].
pub trait Circuit {
    /// The number of independent blocks; must be at least 1.
    fn blocks(&self) -> usize {
        1
    }

    /// Drives one block of the circuit.
    #[allow(async_fn_in_trait)]
    async fn run<V: Vm>(&self, block: usize, vm: &mut V) -> Result<Vec<bool>, Error>;
}

pub(crate) fn check_pair(op: &'static str, left: usize, right: usize) -> Result<(), Error> {
    if left != right {
        Err(Error::WireLengthMismatch { op, left, right })
    } else {
        Ok(())
    }
}

pub(crate) fn check_width(op: &'static str, bits: usize) -> Result<(), Error> {
    if bits == 0 {
        Err(Error::EmptyWireRequest { op })
    } else {
        Ok(())
    }
}

pub(crate) fn check_share_width(bits: usize) -> Result<(), Error> {
    check_width("share", bits)?;
    if bits > 64 {
        Err(Error::ShareTooWide { bits })
    } else {
        Ok(())
    }
}

/// Drives all block VMs of a session concurrently.
pub(crate) async fn run_blocks<Ct: Circuit, V: Vm>(
    circuit: &Ct,
    vms: &mut [V],
) -> Result<Vec<Vec<bool>>, Error> {
    try_join_all(
        vms.iter_mut()
            .enumerate()
            .map(|(block, vm)| circuit.run(block, vm)),
    )
    .await
}

/// Races a session future against the inbound frame router; the first error
/// (including a transport failure) cancels everything, which is the
/// session-fatal cascade: no operation is ever retried.
pub(crate) async fn race_routing<C: Channel, T>(
    mux: &Mux<'_, C>,
    session: impl std::future::Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    tokio::select! {
        r = session => r,
        e = mux.run() => Err(Error::Channel(e)),
    }
}
