//! IKNP-style oblivious transfer extension (cf.
//! <https://iacr.org/archive/crypto2003/27290145/27290145.pdf>), in the
//! semi-honest variant of ALSZ (<https://eprint.iacr.org/2016/602>,
//! Protocol 4).
//!
//! 128 base OTs with swapped roles seed one AES-CTR pad per matrix row.
//! Afterwards, every batch of `m` OTs only exchanges the receiver's masked
//! bit matrix and `m` hashed ciphertext pairs; the base phase never runs
//! again for the lifetime of the sub-channel bundle.

use rand::{CryptoRng, Rng, RngCore, SeedableRng};

use crate::bits::{boolvec_to_u8vec, transpose, u8vec_to_boolvec, xor_inplace};
use crate::block::Block;
use crate::channel::Channel;
use crate::crypto::{AesRng, FIXED_KEY_HASH};
use crate::mux::SubChannel;
use crate::ot::{naor_pinkas, Error};

/// Number of base OTs, equal to the bit width of a [`Block`].
const BASE_OTS: usize = 128;

struct SenderState {
    s: Vec<bool>,
    s_block: Block,
    rngs: Vec<AesRng>,
}

/// OT extension sender.
///
/// Owns the four OT sub-channels to its peer; the base phase runs lazily on
/// the first `send`.
pub(crate) struct Sender<'c, C: Channel> {
    param: SubChannel<'c, C>,
    pk: SubChannel<'c, C>,
    cipher: SubChannel<'c, C>,
    ext: SubChannel<'c, C>,
    state: Option<SenderState>,
    consumed: u128,
}

impl<'c, C: Channel> Sender<'c, C> {
    pub(crate) fn new(
        param: SubChannel<'c, C>,
        pk: SubChannel<'c, C>,
        cipher: SubChannel<'c, C>,
        ext: SubChannel<'c, C>,
    ) -> Self {
        Self {
            param,
            pk,
            cipher,
            ext,
            state: None,
            consumed: 0,
        }
    }

    /// Acts as base-OT receiver with a random choice vector `s`, obtaining
    /// one of each seed pair offered by the extension receiver.
    async fn setup<RNG: Rng + CryptoRng>(&mut self, rng: &mut RNG) -> Result<(), Error> {
        let mut s_bytes = [0u8; BASE_OTS / 8];
        rng.fill_bytes(&mut s_bytes);
        let s = u8vec_to_boolvec(&s_bytes);
        let mut base = naor_pinkas::Receiver::init(&mut self.param).await?;
        let seeds = base.receive(&self.pk, &mut self.cipher, &s, rng).await?;
        self.state = Some(SenderState {
            s,
            s_block: Block::new(s_bytes),
            rngs: seeds.into_iter().map(AesRng::from_seed).collect(),
        });
        Ok(())
    }

    /// Offers one message pair per OT, consumed in FIFO order by the peer's
    /// matching `receive` calls.
    pub(crate) async fn send<RNG: Rng + CryptoRng>(
        &mut self,
        inputs: &[(Block, Block)],
        rng: &mut RNG,
    ) -> Result<(), Error> {
        if inputs.is_empty() {
            return Ok(());
        }
        if self.state.is_none() {
            self.setup(rng).await?;
        }
        let m = inputs.len();
        let ncols = m.div_ceil(8) * 8;
        let us: Vec<Vec<u8>> = self.ext.recv_n("OT extension u", BASE_OTS).await?;
        let st = self.state.as_mut().expect("base phase ran above");
        let mut qs = vec![0u8; BASE_OTS * ncols / 8];
        for (j, (bit, prg)) in st.s.iter().zip(st.rngs.iter_mut()).enumerate() {
            let row = &mut qs[j * ncols / 8..(j + 1) * ncols / 8];
            prg.fill_bytes(row);
            if us[j].len() != row.len() {
                return Err(Error::MatrixShape);
            }
            if *bit {
                xor_inplace(row, &us[j]);
            }
        }
        let qt = transpose(&qs, BASE_OTS, ncols);
        let mut ys = Vec::with_capacity(m);
        for (j, (m0, m1)) in inputs.iter().enumerate() {
            let q = Block::new(qt[j * 16..(j + 1) * 16].try_into().expect("16-byte column"));
            let tweak = Block::from(self.consumed + j as u128);
            let y0 = FIXED_KEY_HASH.cr_hash(tweak, q) ^ *m0;
            let y1 = FIXED_KEY_HASH.cr_hash(tweak, q ^ st.s_block) ^ *m1;
            ys.push((y0, y1));
        }
        self.ext.send("OT extension y", &ys).await?;
        self.consumed += m as u128;
        Ok(())
    }
}

/// OT extension receiver.
pub(crate) struct Receiver<'c, C: Channel> {
    param: SubChannel<'c, C>,
    pk: SubChannel<'c, C>,
    cipher: SubChannel<'c, C>,
    ext: SubChannel<'c, C>,
    rngs: Option<Vec<(AesRng, AesRng)>>,
    consumed: u128,
}

impl<'c, C: Channel> Receiver<'c, C> {
    pub(crate) fn new(
        param: SubChannel<'c, C>,
        pk: SubChannel<'c, C>,
        cipher: SubChannel<'c, C>,
        ext: SubChannel<'c, C>,
    ) -> Self {
        Self {
            param,
            pk,
            cipher,
            ext,
            rngs: None,
            consumed: 0,
        }
    }

    /// Acts as base-OT sender, offering a fresh seed pair per matrix row.
    async fn setup<RNG: Rng + CryptoRng>(&mut self, rng: &mut RNG) -> Result<(), Error> {
        let mut base = naor_pinkas::Sender::init(&self.param, rng).await?;
        let seeds: Vec<(Block, Block)> = (0..BASE_OTS).map(|_| (rng.gen(), rng.gen())).collect();
        base.send(&mut self.pk, &self.cipher, &seeds, rng).await?;
        self.rngs = Some(
            seeds
                .into_iter()
                .map(|(k0, k1)| (AesRng::from_seed(k0), AesRng::from_seed(k1)))
                .collect(),
        );
        Ok(())
    }

    /// Obtains one message per selector bit from the peer's matching `send`.
    pub(crate) async fn receive<RNG: Rng + CryptoRng>(
        &mut self,
        selectors: &[bool],
        rng: &mut RNG,
    ) -> Result<Vec<Block>, Error> {
        if selectors.is_empty() {
            return Ok(vec![]);
        }
        if self.rngs.is_none() {
            self.setup(rng).await?;
        }
        let m = selectors.len();
        let ncols = m.div_ceil(8) * 8;
        let mut r = boolvec_to_u8vec(selectors);
        r.resize(ncols / 8, 0);
        let rngs = self.rngs.as_mut().expect("base phase ran above");
        let mut ts = vec![0u8; BASE_OTS * ncols / 8];
        let mut us = Vec::with_capacity(BASE_OTS);
        for (j, (prg0, prg1)) in rngs.iter_mut().enumerate() {
            let t = &mut ts[j * ncols / 8..(j + 1) * ncols / 8];
            prg0.fill_bytes(t);
            let mut u = vec![0u8; ncols / 8];
            prg1.fill_bytes(&mut u);
            xor_inplace(&mut u, t);
            xor_inplace(&mut u, &r);
            us.push(u);
        }
        self.ext.send("OT extension u", &us).await?;

        let tt = transpose(&ts, BASE_OTS, ncols);
        let ys: Vec<(Block, Block)> = self.ext.recv_n("OT extension y", m).await?;
        let mut out = Vec::with_capacity(m);
        for (j, s) in selectors.iter().enumerate() {
            let t = Block::new(tt[j * 16..(j + 1) * 16].try_into().expect("16-byte column"));
            let tweak = Block::from(self.consumed + j as u128);
            let y = if *s { ys[j].1 } else { ys[j].0 };
            out.push(y ^ FIXED_KEY_HASH.cr_hash(tweak, t));
        }
        self.consumed += m as u128;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;
    use crate::channel::SimpleChannel;
    use crate::mux::{Lane, Mux};

    fn ot_lanes<'c, C: Channel>(
        mux: &Mux<'c, C>,
        peer: usize,
    ) -> (
        SubChannel<'c, C>,
        SubChannel<'c, C>,
        SubChannel<'c, C>,
        SubChannel<'c, C>,
    ) {
        (
            mux.subchannel(peer, 0, Lane::OtParam),
            mux.subchannel(peer, 0, Lane::OtPk),
            mux.subchannel(peer, 0, Lane::OtCipher),
            mux.subchannel(peer, 0, Lane::OtExt),
        )
    }

    async fn transfer(
        batches: Vec<(Vec<(Block, Block)>, Vec<bool>)>,
    ) -> Result<Vec<Vec<Block>>, Error> {
        let mut channels = SimpleChannel::channels(2);
        let ch1 = channels.pop().unwrap();
        let ch0 = channels.pop().unwrap();
        let send_batches = batches.clone();
        let send = async {
            let mux = Mux::new(&ch0, 0, 2, 1);
            let (param, pk, cipher, ext) = ot_lanes(&mux, 1);
            let mut sender = Sender::new(param, pk, cipher, ext);
            let mut rng = ChaCha20Rng::seed_from_u64(7);
            let work = async {
                for (pairs, _) in &send_batches {
                    sender.send(pairs, &mut rng).await?;
                }
                Ok(())
            };
            tokio::select! {
                r = work => r,
                e = mux.run() => Err(Error::Channel(e)),
            }
        };
        let recv = async {
            let mux = Mux::new(&ch1, 1, 2, 1);
            let (param, pk, cipher, ext) = ot_lanes(&mux, 0);
            let mut receiver = Receiver::new(param, pk, cipher, ext);
            let mut rng = ChaCha20Rng::seed_from_u64(11);
            let work = async {
                let mut received = vec![];
                for (_, selectors) in &batches {
                    received.push(receiver.receive(selectors, &mut rng).await?);
                }
                Ok(received)
            };
            tokio::select! {
                r = work => r,
                e = mux.run() => Err(Error::Channel(e)),
            }
        };
        let ((), received) = futures::try_join!(send, recv)?;
        Ok(received)
    }

    #[tokio::test]
    async fn extension_transfers_chosen_messages() {
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let pairs: Vec<(Block, Block)> = (0..347).map(|_| (rng.gen(), rng.gen())).collect();
        let selectors: Vec<bool> = (0..347).map(|_| rng.gen()).collect();
        let received = transfer(vec![(pairs.clone(), selectors.clone())])
            .await
            .unwrap();
        for (((m0, m1), s), got) in pairs.iter().zip(&selectors).zip(&received[0]) {
            let expected = if *s { m1 } else { m0 };
            let other = if *s { m0 } else { m1 };
            assert_eq!(got, expected);
            assert_ne!(got, other, "receiver must not learn the other message");
        }
    }

    #[tokio::test]
    async fn batches_are_consumed_in_fifo_order() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let batches: Vec<(Vec<(Block, Block)>, Vec<bool>)> = (0..3)
            .map(|_| {
                let pairs: Vec<(Block, Block)> = (0..17).map(|_| (rng.gen(), rng.gen())).collect();
                let selectors: Vec<bool> = (0..17).map(|_| rng.gen()).collect();
                (pairs, selectors)
            })
            .collect();
        let received = transfer(batches.clone()).await.unwrap();
        for ((pairs, selectors), got) in batches.iter().zip(received) {
            let expected: Vec<Block> = pairs
                .iter()
                .zip(selectors)
                .map(|((m0, m1), s)| if *s { *m1 } else { *m0 })
                .collect();
            assert_eq!(got, expected);
        }
    }
}
