//! The garbled-circuit generator virtual machine.

use rand::Rng;
use tracing::debug;

use crate::block::Block;
use crate::channel::Channel;
use crate::crypto::AesRng;
use crate::mux::{Lane, Mux, SubChannel};
use crate::ot::extension;
use crate::vm::{
    check_pair, check_share_width, check_width, race_routing, run_blocks, Circuit, Error, Vm,
};
use crate::yao::{
    fresh_wire, garble_gate, resolve_key, reveal_table, GarbledTable, Label, SessionContext, Wire,
    AND_TRUTH, EVALUATOR, GENERATOR, OR_TRUTH,
};

/// The generator's VM for one circuit block.
///
/// Owns the block's sub-channels to the evaluator and the OT sender; shares
/// the session's garbling context (delta and constant wires) with the other
/// blocks.
pub struct Generator<'c, C: Channel> {
    ctx: &'c SessionContext,
    gate: SubChannel<'c, C>,
    reply: SubChannel<'c, C>,
    ot: extension::Sender<'c, C>,
    rng: AesRng,
}

impl<'c, C: Channel> Generator<'c, C> {
    /// Creates the block VM and announces the constant wires' representative
    /// keys, deterministically first on the block's gate stream.
    pub(crate) async fn new(
        ctx: &'c SessionContext,
        mux: &Mux<'c, C>,
        block: u32,
        rng: AesRng,
    ) -> Result<Self, Error> {
        let gate = mux.subchannel(EVALUATOR, block, Lane::Gate);
        gate.send("constants", &[ctx.const0.zero, ctx.const1.one])
            .await?;
        Ok(Self {
            ctx,
            gate,
            reply: mux.subchannel(EVALUATOR, block, Lane::Reply),
            ot: extension::Sender::new(
                mux.subchannel(EVALUATOR, block, Lane::OtParam),
                mux.subchannel(EVALUATOR, block, Lane::OtPk),
                mux.subchannel(EVALUATOR, block, Lane::OtCipher),
                mux.subchannel(EVALUATOR, block, Lane::OtExt),
            ),
            rng,
        })
    }

    /// Garbles one table per wire pair and streams the batch in gate order.
    async fn garble_gates(
        &mut self,
        op: &'static str,
        a: &[Wire],
        b: &[Wire],
        truth: [bool; 4],
    ) -> Result<Vec<Wire>, Error> {
        check_pair(op, a.len(), b.len())?;
        let mut out = Vec::with_capacity(a.len());
        let mut tables = Vec::with_capacity(a.len());
        for (a, b) in a.iter().zip(b) {
            let w = fresh_wire(&mut self.rng, self.ctx.delta);
            tables.push(garble_gate(a, b, &w, truth));
            out.push(w);
        }
        self.gate.send("garbled tables", &tables).await?;
        Ok(out)
    }
}

impl<C: Channel> Vm for Generator<'_, C> {
    type Wire = Wire;

    fn party(&self) -> usize {
        GENERATOR
    }

    fn parties(&self) -> usize {
        2
    }

    fn constant(&mut self, bit: bool) -> Wire {
        if bit {
            self.ctx.const1
        } else {
            self.ctx.const0
        }
    }

    fn xor(&mut self, a: &[Wire], b: &[Wire]) -> Result<Vec<Wire>, Error> {
        check_pair("xor", a.len(), b.len())?;
        Ok(a.iter()
            .zip(b)
            .map(|(a, b)| {
                let zero = a.zero ^ b.zero;
                Wire {
                    zero,
                    one: zero ^ self.ctx.delta,
                }
            })
            .collect())
    }

    async fn and(&mut self, a: &[Wire], b: &[Wire]) -> Result<Vec<Wire>, Error> {
        self.garble_gates("and", a, b, AND_TRUTH).await
    }

    async fn or(&mut self, a: &[Wire], b: &[Wire]) -> Result<Vec<Wire>, Error> {
        self.garble_gates("or", a, b, OR_TRUTH).await
    }

    async fn share(&mut self, from: usize, value: u64, bits: usize) -> Result<Vec<Wire>, Error> {
        check_share_width(bits)?;
        let wires: Vec<Wire> = (0..bits)
            .map(|_| fresh_wire(&mut self.rng, self.ctx.delta))
            .collect();
        match from {
            GENERATOR => {
                // The generator's own input: reveal it in key form only.
                let keys: Vec<Label> = wires
                    .iter()
                    .enumerate()
                    .map(|(i, w)| w.label((value >> i) & 1 == 1))
                    .collect();
                self.gate.send("input keys", &keys).await?;
            }
            EVALUATOR => {
                // The evaluator picks labels by its private bits via OT; the
                // generator learns nothing about the selectors.
                let pairs: Vec<(Block, Block)> =
                    wires.iter().map(|w| (w.zero.0, w.one.0)).collect();
                self.ot.send(&pairs, &mut self.rng).await?;
            }
            party => return Err(Error::UnknownParty { party, parties: 2 }),
        }
        Ok(wires)
    }

    async fn random(&mut self, bits: usize) -> Result<Vec<Wire>, Error> {
        check_width("random", bits)?;
        let wires: Vec<Wire> = (0..bits)
            .map(|_| fresh_wire(&mut self.rng, self.ctx.delta))
            .collect();
        // A random swap per wire: the evaluator's selector then picks a
        // uniformly random logical value unknown to the generator.
        let pairs: Vec<(Block, Block)> = wires
            .iter()
            .map(|w| {
                if self.rng.gen() {
                    (w.one.0, w.zero.0)
                } else {
                    (w.zero.0, w.one.0)
                }
            })
            .collect();
        self.ot.send(&pairs, &mut self.rng).await?;
        Ok(wires)
    }

    async fn reveal_to(&mut self, to: usize, a: &[Wire]) -> Result<Option<Vec<bool>>, Error> {
        match to {
            GENERATOR => {
                let keys: Vec<Label> = self.reply.recv_n("revealed keys", a.len()).await?;
                let bits = a
                    .iter()
                    .zip(keys)
                    .map(|(w, k)| resolve_key(w, k))
                    .collect::<Result<Vec<bool>, Error>>()?;
                debug!(wires = a.len(), "revealed wires to generator");
                Ok(Some(bits))
            }
            EVALUATOR => {
                let tables: Vec<GarbledTable> = a
                    .iter()
                    .map(|w| reveal_table(&mut self.rng, self.ctx.delta, w))
                    .collect();
                self.gate.send("reveal tables", &tables).await?;
                Ok(None)
            }
            party => Err(Error::UnknownParty { party, parties: 2 }),
        }
    }

    async fn reveal(&mut self, a: &[Wire]) -> Result<Vec<bool>, Error> {
        let bits = self
            .reveal_to(GENERATOR, a)
            .await?
            .expect("generator receives its own reveal");
        self.reveal_to(EVALUATOR, a).await?;
        Ok(bits)
    }
}

/// Runs the generator's side of a two-party garbled-circuit session.
///
/// Returns the bits revealed to the generator, one vector per block.
pub async fn garble<C: Channel, Ct: Circuit>(
    channel: &C,
    circuit: &Ct,
) -> Result<Vec<Vec<bool>>, Error> {
    garble_seeded(channel, circuit, AesRng::new()).await
}

pub(crate) async fn garble_seeded<C: Channel, Ct: Circuit>(
    channel: &C,
    circuit: &Ct,
    mut root: AesRng,
) -> Result<Vec<Vec<bool>>, Error> {
    let blocks = circuit.blocks();
    if blocks == 0 {
        return Err(Error::NoBlocks);
    }
    debug!(blocks, "starting garbled-circuit generator session");
    let mux = Mux::new(channel, GENERATOR, 2, blocks);
    let ctx = SessionContext::generate(&mut root);
    let session = async {
        let mut vms = Vec::with_capacity(blocks);
        for block in 0..blocks as u32 {
            vms.push(Generator::new(&ctx, &mux, block, root.fork()).await?);
        }
        run_blocks(circuit, &mut vms).await
    };
    race_routing(&mux, session).await
}
