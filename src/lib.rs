//! An MPC runtime core for jointly evaluating Boolean circuits on private
//! inputs, secure against honest-but-curious adversaries.
//!
//! Two protocol engines share a common gate-level virtual-machine interface:
//!
//! * [`yao`] — two-party garbled circuits: one party garbles every non-linear
//!   gate into an encrypted truth table, the other evaluates the tables with
//!   keys obtained via oblivious transfer.
//! * [`gmw`] — N-party GMW over XOR shares, with AND gates consuming
//!   precomputed multiplication triples from a commodity server.
//!
//! Both engines run over the [`channel::Channel`] transport abstraction; all
//! protocol traffic of a session is carried by a single framed stream per
//! peer and demultiplexed by [`mux::Mux`] into FIFO sub-channels. Circuit
//! front ends drive the engines through the [`Vm`] trait and a [`Circuit`]
//! handle; see [`yao::garble`], [`yao::evaluate`] and [`gmw::run_party`].
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod bits;
pub mod block;
pub mod channel;
pub mod commodity;
pub mod gmw;
pub mod mux;
pub mod ot;
pub mod vm;
pub mod yao;

mod crypto;

pub use block::Block;
pub use vm::{Circuit, Error, Vm};
