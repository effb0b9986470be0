//! The N-party GMW engine (cf. Goldreich-Micali-Wigderson, STOC 1987) over
//! XOR shares.
//!
//! Every party holds one bit per wire; the wire's logical value is the XOR
//! of all parties' shares, so any proper subset of shares reveals nothing.
//! XOR and NOT are local, AND consumes one precomputed multiplication
//! triple from the commodity service and costs one round of two bits with
//! every peer, reveals broadcast shares. Triples are consumed in circuit
//! order, identical at every party; any divergence desynchronizes the
//! session irrecoverably, which is why the commodity server insists on
//! unanimous batch requests.

use std::collections::HashMap;

use rand::Rng;
use tracing::debug;

use crate::bits::{boolvec_to_u8vec, get_bit, xor_bytes, xor_inplace};
use crate::channel::Channel;
use crate::commodity::{MaskTriple, TripleStream};
use crate::crypto::AesRng;
use crate::mux::{Lane, Mux, SubChannel};
use crate::vm::{
    check_pair, check_share_width, check_width, race_routing, run_blocks, Circuit, Error, Vm,
};

/// This party's XOR share of one wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Share(pub(crate) bool);

/// One party's share of the output of a Beaver multiplication.
///
/// `d = a ^ x` and `e = b ^ y` are the publicly reconstructed masked
/// inputs; `(x, y, z)` is this party's triple share. Only the first party
/// adds the public `d AND e` term, all shares together XOR to `a AND b`.
fn beaver_output(d: bool, e: bool, x: bool, y: bool, z: bool, first: bool) -> bool {
    (first & d & e) ^ (d & y) ^ (e & x) ^ z
}

/// A GMW party's VM for one circuit block.
pub struct Party<'c, C: Channel> {
    party: usize,
    parties: usize,
    peers: Vec<Option<SubChannel<'c, C>>>,
    triples: TripleStream<'c, C>,
    masks: HashMap<usize, Vec<MaskTriple>>,
    rng: AesRng,
}

impl<'c, C: Channel> Party<'c, C> {
    /// Creates the block VM and awaits the commodity server's PRG seed.
    pub(crate) async fn new(
        mux: &Mux<'c, C>,
        party: usize,
        parties: usize,
        block: u32,
        rng: AesRng,
    ) -> Result<Self, Error> {
        let peers = (0..parties)
            .map(|p| (p != party).then(|| mux.subchannel(p, block, Lane::Gate)))
            .collect();
        let dealer = mux.subchannel(parties, block, Lane::Triple);
        let triples = TripleStream::setup(dealer, party == 0).await?;
        Ok(Self {
            party,
            parties,
            peers,
            triples,
            masks: HashMap::new(),
            rng,
        })
    }

    pub(crate) fn triples(&self) -> &TripleStream<'c, C> {
        &self.triples
    }

    /// Sends `payload` to every peer, then gathers each peer's payload of
    /// the same length, in ascending party order.
    async fn exchange(&mut self, phase: &str, payload: &[u8]) -> Result<Vec<Vec<u8>>, Error> {
        for sub in self.peers.iter().flatten() {
            sub.send(phase, payload).await?;
        }
        let mut received = Vec::with_capacity(self.parties - 1);
        for sub in self.peers.iter_mut().flatten() {
            received.push(sub.recv_n::<u8>(phase, payload.len()).await?);
        }
        Ok(received)
    }

    /// Multiplies the shared selector bit `a` into a secret-shared byte
    /// string: given this party's share `b` of some string `B`, returns its
    /// share of `a * B` (`B` if the shared bit is 1, zero otherwise).
    ///
    /// Consumes one mask triple of matching width; leftovers of the
    /// requested batch are cached, so every party drains batches in the
    /// same deterministic order.
    pub async fn mask(&mut self, a: &Share, b: &[u8]) -> Result<Vec<u8>, Error> {
        let width = b.len();
        check_width("mask", width)?;
        let cached = self.masks.get_mut(&width).and_then(|batch| batch.pop());
        let triple = match cached {
            Some(triple) => triple,
            None => {
                let mut batch = self.triples.mask_triples(8, width).await?;
                batch.reverse();
                let first = batch.pop().expect("batch of 8 mask triples");
                self.masks.insert(width, batch);
                first
            }
        };
        let mut d = a.0 ^ triple.a;
        let mut e = xor_bytes(b, &triple.b);
        let mut payload = vec![d as u8];
        payload.extend_from_slice(&e);
        for other in self.exchange("mask shares", &payload).await? {
            d ^= other[0] != 0;
            xor_inplace(&mut e, &other[1..]);
        }
        let mut out = triple.c;
        if d {
            xor_inplace(&mut out, &triple.b);
        }
        if triple.a {
            xor_inplace(&mut out, &e);
        }
        if self.party == 0 && d {
            xor_inplace(&mut out, &e);
        }
        Ok(out)
    }
}

impl<C: Channel> Vm for Party<'_, C> {
    type Wire = Share;

    fn party(&self) -> usize {
        self.party
    }

    fn parties(&self) -> usize {
        self.parties
    }

    fn constant(&mut self, bit: bool) -> Share {
        // Party 0 carries public constants; everyone else shares zero.
        Share(bit && self.party == 0)
    }

    fn xor(&mut self, a: &[Share], b: &[Share]) -> Result<Vec<Share>, Error> {
        check_pair("xor", a.len(), b.len())?;
        Ok(a.iter().zip(b).map(|(a, b)| Share(a.0 ^ b.0)).collect())
    }

    async fn and(&mut self, a: &[Share], b: &[Share]) -> Result<Vec<Share>, Error> {
        check_pair("and", a.len(), b.len())?;
        let n = a.len();
        if n == 0 {
            return Ok(vec![]);
        }
        let mut xs = Vec::with_capacity(n);
        let mut ys = Vec::with_capacity(n);
        let mut zs = Vec::with_capacity(n);
        for _ in 0..n {
            let (x, y, z) = self.triples.next_triple().await?;
            xs.push(x);
            ys.push(y);
            zs.push(z);
        }
        let d: Vec<bool> = a.iter().zip(&xs).map(|(a, x)| a.0 ^ x).collect();
        let e: Vec<bool> = b.iter().zip(&ys).map(|(b, y)| b.0 ^ y).collect();
        let nbytes = n.div_ceil(8);
        let mut d = boolvec_to_u8vec(&d);
        let mut e = boolvec_to_u8vec(&e);
        let mut payload = Vec::with_capacity(2 * nbytes);
        payload.extend_from_slice(&d);
        payload.extend_from_slice(&e);
        for other in self.exchange("masked and inputs", &payload).await? {
            xor_inplace(&mut d, &other[..nbytes]);
            xor_inplace(&mut e, &other[nbytes..]);
        }
        Ok((0..n)
            .map(|i| {
                let (d, e) = (get_bit(&d, i), get_bit(&e, i));
                Share(beaver_output(d, e, xs[i], ys[i], zs[i], self.party == 0))
            })
            .collect())
    }

    async fn share(&mut self, from: usize, value: u64, bits: usize) -> Result<Vec<Share>, Error> {
        check_share_width(bits)?;
        if from >= self.parties {
            return Err(Error::UnknownParty {
                party: from,
                parties: self.parties,
            });
        }
        let nbytes = bits.div_ceil(8);
        let own = if from == self.party {
            // Additive sharing: hand every peer a random share, keep the
            // XOR of the value with all of them.
            let value_bits: Vec<bool> = (0..bits).map(|i| (value >> i) & 1 == 1).collect();
            let mut own = boolvec_to_u8vec(&value_bits);
            for sub in self.peers.iter().flatten() {
                let mut share = vec![0u8; nbytes];
                self.rng.fill(&mut share[..]);
                sub.send("input shares", &share).await?;
                xor_inplace(&mut own, &share);
            }
            own
        } else {
            self.peers[from]
                .as_mut()
                .expect("peer sub-channel exists for every other party")
                .recv_n("input shares", nbytes)
                .await?
        };
        Ok((0..bits).map(|i| Share(get_bit(&own, i))).collect())
    }

    async fn random(&mut self, bits: usize) -> Result<Vec<Share>, Error> {
        check_width("random", bits)?;
        // A local random share per party makes the aggregate uniform.
        Ok((0..bits).map(|_| Share(self.rng.gen())).collect())
    }

    async fn reveal_to(&mut self, to: usize, a: &[Share]) -> Result<Option<Vec<bool>>, Error> {
        if to >= self.parties {
            return Err(Error::UnknownParty {
                party: to,
                parties: self.parties,
            });
        }
        let shares: Vec<bool> = a.iter().map(|s| s.0).collect();
        let mut packed = boolvec_to_u8vec(&shares);
        if to == self.party {
            for sub in self.peers.iter_mut().flatten() {
                let other: Vec<u8> = sub.recv_n("revealed shares", packed.len()).await?;
                xor_inplace(&mut packed, &other);
            }
            debug!(wires = a.len(), "revealed wires to this party");
            Ok(Some((0..a.len()).map(|i| get_bit(&packed, i)).collect()))
        } else {
            self.peers[to]
                .as_ref()
                .expect("peer sub-channel exists for every other party")
                .send("revealed shares", &packed)
                .await?;
            Ok(None)
        }
    }

    async fn reveal(&mut self, a: &[Share]) -> Result<Vec<bool>, Error> {
        if a.is_empty() {
            return Ok(vec![]);
        }
        let shares: Vec<bool> = a.iter().map(|s| s.0).collect();
        let mut packed = boolvec_to_u8vec(&shares);
        let payload = packed.clone();
        for other in self.exchange("revealed shares", &payload).await? {
            xor_inplace(&mut packed, &other);
        }
        Ok((0..a.len()).map(|i| get_bit(&packed, i)).collect())
    }
}

/// Runs one GMW party of an N-party session.
///
/// The commodity server must be running at transport endpoint `parties`
/// (see [`crate::commodity::serve`]). Returns the bits revealed to this
/// party, one vector per block.
pub async fn run_party<C: Channel, Ct: Circuit>(
    channel: &C,
    party: usize,
    parties: usize,
    circuit: &Ct,
) -> Result<Vec<Vec<bool>>, Error> {
    if parties < 2 || party >= parties {
        return Err(Error::UnknownParty { party, parties });
    }
    let blocks = circuit.blocks();
    if blocks == 0 {
        return Err(Error::NoBlocks);
    }
    debug!(party, parties, blocks, "starting GMW session");
    let mux = Mux::new(channel, party, parties + 1, blocks);
    let mut root = AesRng::new();
    let session = async {
        let mut vms = Vec::with_capacity(blocks);
        for block in 0..blocks as u32 {
            vms.push(Party::new(&mux, party, parties, block, root.fork()).await?);
        }
        let outputs = run_blocks(circuit, &mut vms).await?;
        for vm in &vms {
            vm.triples().goodbye().await?;
        }
        Ok(outputs)
    };
    race_routing(&mux, session).await
}

#[cfg(test)]
mod tests {
    use futures::future::try_join_all;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;
    use crate::channel::SimpleChannel;
    use crate::commodity;

    #[test]
    fn beaver_identity_reconstructs_and() {
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        for a in [false, true] {
            for b in [false, true] {
                for x in [false, true] {
                    for y in [false, true] {
                        let z = x & y;
                        for _ in 0..8 {
                            // Random two-party share split of every value.
                            let (a0, x0, y0, z0): (bool, bool, bool, bool) =
                                (rng.gen(), rng.gen(), rng.gen(), rng.gen());
                            let b0: bool = rng.gen();
                            let (a1, b1, x1, y1, z1) =
                                (a ^ a0, b ^ b0, x ^ x0, y ^ y0, z ^ z0);
                            let d = a ^ x;
                            let e = b ^ y;
                            let out = beaver_output(d, e, x0, y0, z0, true)
                                ^ beaver_output(d, e, x1, y1, z1, false);
                            assert_eq!(out, a & b, "a={a} b={b} x={x} y={y}");
                        }
                    }
                }
            }
        }
    }

    /// Drives one party's share of a mask-triple multiplication, with the
    /// shared selector owned by party 0.
    async fn mask_party(
        channel: &SimpleChannel,
        party: usize,
        parties: usize,
        selector: bool,
        b_share: Vec<u8>,
    ) -> Result<Vec<u8>, Error> {
        let mux = Mux::new(channel, party, parties + 1, 1);
        let session = async {
            let mut vm = Party::new(
                &mux,
                party,
                parties,
                0,
                AesRng::from_seed(rand::random()),
            )
            .await?;
            let a = Share(selector && party == 0);
            let out = vm.mask(&a, &b_share).await?;
            vm.triples().goodbye().await?;
            Ok(out)
        };
        race_routing(&mux, session).await
    }

    #[tokio::test]
    async fn mask_multiplies_shared_bit_into_shared_bytes() {
        let parties = 3;
        for selector in [false, true] {
            let mut rng = ChaCha20Rng::seed_from_u64(17);
            let shares: Vec<Vec<u8>> = (0..parties).map(|_| (0..4).map(|_| rng.gen()).collect()).collect();
            let secret: Vec<u8> = shares
                .iter()
                .fold(vec![0u8; 4], |acc, s| xor_bytes(&acc, s));
            let mut channels = SimpleChannel::channels(parties + 1);
            let dealer_channel = channels.pop().unwrap();
            let dealer = commodity::serve(&dealer_channel, parties, 1);
            let work = try_join_all(
                channels
                    .iter()
                    .zip(shares)
                    .enumerate()
                    .map(|(p, (ch, b))| mask_party(ch, p, parties, selector, b)),
            );
            let (outs, ()) = futures::try_join!(work, async {
                dealer.await.map_err(Error::Commodity)
            })
            .unwrap();
            let combined = outs.iter().fold(vec![0u8; 4], |acc, s| xor_bytes(&acc, s));
            if selector {
                assert_eq!(combined, secret);
            } else {
                assert_eq!(combined, vec![0u8; 4]);
            }
        }
    }
}
