//! The Naor–Pinkas base oblivious transfer (cf.
//! <https://dl.acm.org/doi/10.5555/365411.365502>) over the Ristretto prime
//! order group from the `curve25519-dalek` library.
//!
//! The sender publishes a random group element `C` during setup. For choice
//! bit `s` the receiver picks a random `x` and sends `PK_0` with
//! `PK_s = x * G` and `PK_{1-s} = C - PK_s`, so it knows the discrete log of
//! exactly one of the two keys while the sender sees a uniformly random
//! point either way. The sender replies with `R = r * G` and the two
//! messages encrypted under hashes of `r * PK_0` and `r * PK_1`; only the
//! chosen one can be unmasked with `x * R`. Keys are domain-separated by a
//! rolling per-OT tweak so batches cannot be replayed into each other.

use curve25519_dalek::constants::RISTRETTO_BASEPOINT_TABLE;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use rand::{CryptoRng, Rng};
use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::channel::Channel;
use crate::mux::SubChannel;
use crate::ot::{decompress_point, hash_point, Error};

/// The sender's second message: `R` and one ciphertext pair per OT.
#[derive(Debug, Serialize, Deserialize)]
struct CipherBatch {
    r: [u8; 32],
    cts: Vec<(Block, Block)>,
}

fn tweak(counter: u128, i: usize, bit: bool) -> u128 {
    2 * (counter + i as u128) + bit as u128
}

/// Base OT sender.
pub(crate) struct Sender {
    c: RistrettoPoint,
    counter: u128,
}

impl Sender {
    /// Publishes the group parameter on the setup sub-channel.
    pub(crate) async fn init<C: Channel, RNG: Rng + CryptoRng>(
        param: &SubChannel<'_, C>,
        rng: &mut RNG,
    ) -> Result<Self, Error> {
        let c = RistrettoPoint::random(rng);
        param
            .send("base OT params", &[c.compress().to_bytes()])
            .await?;
        Ok(Self { c, counter: 0 })
    }

    /// Offers one message pair per OT; the peer obtains exactly one of each.
    pub(crate) async fn send<C: Channel, RNG: Rng + CryptoRng>(
        &mut self,
        pk: &mut SubChannel<'_, C>,
        cipher: &SubChannel<'_, C>,
        inputs: &[(Block, Block)],
        rng: &mut RNG,
    ) -> Result<(), Error> {
        let pks: Vec<[u8; 32]> = pk.recv_n("base OT pk", inputs.len()).await?;
        let r = Scalar::random(rng);
        let big_r = &r * RISTRETTO_BASEPOINT_TABLE;
        let rc = r * self.c;
        let mut cts = Vec::with_capacity(inputs.len());
        for (i, ((m0, m1), pk0_bytes)) in inputs.iter().zip(pks).enumerate() {
            let r_pk0 = r * decompress_point(pk0_bytes)?;
            // r * PK_1 = r * (C - PK_0)
            let k0 = hash_point(tweak(self.counter, i, false), &r_pk0);
            let k1 = hash_point(tweak(self.counter, i, true), &(rc - r_pk0));
            cts.push((k0 ^ *m0, k1 ^ *m1));
        }
        self.counter += inputs.len() as u128;
        let batch = CipherBatch {
            r: big_r.compress().to_bytes(),
            cts,
        };
        cipher.send("base OT ciphertexts", &[batch]).await?;
        Ok(())
    }
}

/// Base OT receiver.
pub(crate) struct Receiver {
    c: RistrettoPoint,
    counter: u128,
}

impl Receiver {
    /// Awaits the sender's group parameter.
    pub(crate) async fn init<C: Channel>(param: &mut SubChannel<'_, C>) -> Result<Self, Error> {
        let c_bytes: [u8; 32] = param.recv_one("base OT params").await?;
        Ok(Self {
            c: decompress_point(c_bytes)?,
            counter: 0,
        })
    }

    /// Obtains one message per OT, according to the selector bits.
    pub(crate) async fn receive<C: Channel, RNG: Rng + CryptoRng>(
        &mut self,
        pk: &SubChannel<'_, C>,
        cipher: &mut SubChannel<'_, C>,
        selectors: &[bool],
        rng: &mut RNG,
    ) -> Result<Vec<Block>, Error> {
        let mut xs = Vec::with_capacity(selectors.len());
        let mut pks = Vec::with_capacity(selectors.len());
        for s in selectors {
            let x = Scalar::random(rng);
            let pk_s = &x * RISTRETTO_BASEPOINT_TABLE;
            let pk0 = if *s { self.c - pk_s } else { pk_s };
            xs.push(x);
            pks.push(pk0.compress().to_bytes());
        }
        pk.send("base OT pk", &pks).await?;

        let batch: CipherBatch = cipher.recv_one("base OT ciphertexts").await?;
        if batch.cts.len() != selectors.len() {
            return Err(Error::MatrixShape);
        }
        let big_r = decompress_point(batch.r)?;
        let mut out = Vec::with_capacity(selectors.len());
        for (i, (s, x)) in selectors.iter().zip(xs).enumerate() {
            let k = hash_point(tweak(self.counter, i, *s), &(x * big_r));
            let (c0, c1) = batch.cts[i];
            out.push(k ^ if *s { c1 } else { c0 });
        }
        self.counter += selectors.len() as u128;
        Ok(out)
    }
}
