//! The garbled-circuit evaluator virtual machine.

use rand::Rng;
use tracing::debug;

use crate::channel::Channel;
use crate::crypto::AesRng;
use crate::mux::{Lane, Mux, SubChannel};
use crate::ot::extension;
use crate::vm::{
    check_pair, check_share_width, check_width, race_routing, run_blocks, Circuit, Error, Vm,
};
use crate::yao::{eval_gate, read_reveal_table, GarbledTable, Label, EVALUATOR, GENERATOR};

/// The evaluator's VM for one circuit block.
///
/// Holds exactly one key per wire; every non-linear gate consumes one table
/// from the generator's gate stream.
pub struct Evaluator<'c, C: Channel> {
    gate: SubChannel<'c, C>,
    reply: SubChannel<'c, C>,
    ot: extension::Receiver<'c, C>,
    const0: Label,
    const1: Label,
    rng: AesRng,
}

impl<'c, C: Channel> Evaluator<'c, C> {
    /// Creates the block VM, receiving the constant wires' keys the
    /// generator announces first on the gate stream.
    pub(crate) async fn new(mux: &Mux<'c, C>, block: u32, rng: AesRng) -> Result<Self, Error> {
        let mut gate = mux.subchannel(GENERATOR, block, Lane::Gate);
        let consts: Vec<Label> = gate.recv_n("constants", 2).await?;
        Ok(Self {
            gate,
            reply: mux.subchannel(GENERATOR, block, Lane::Reply),
            ot: extension::Receiver::new(
                mux.subchannel(GENERATOR, block, Lane::OtParam),
                mux.subchannel(GENERATOR, block, Lane::OtPk),
                mux.subchannel(GENERATOR, block, Lane::OtCipher),
                mux.subchannel(GENERATOR, block, Lane::OtExt),
            ),
            const0: consts[0],
            const1: consts[1],
            rng,
        })
    }

    /// Consumes one gate table per wire pair, decrypting exactly the slot
    /// selected by the held keys' point-and-permute bits.
    async fn eval_gates(
        &mut self,
        op: &'static str,
        a: &[Label],
        b: &[Label],
    ) -> Result<Vec<Label>, Error> {
        check_pair(op, a.len(), b.len())?;
        let tables: Vec<GarbledTable> = self.gate.recv_n("garbled tables", a.len()).await?;
        a.iter()
            .zip(b)
            .zip(tables)
            .map(|((ka, kb), table)| eval_gate(&table, *ka, *kb))
            .collect()
    }
}

impl<C: Channel> Vm for Evaluator<'_, C> {
    type Wire = Label;

    fn party(&self) -> usize {
        EVALUATOR
    }

    fn parties(&self) -> usize {
        2
    }

    fn constant(&mut self, bit: bool) -> Label {
        if bit {
            self.const1
        } else {
            self.const0
        }
    }

    fn xor(&mut self, a: &[Label], b: &[Label]) -> Result<Vec<Label>, Error> {
        check_pair("xor", a.len(), b.len())?;
        Ok(a.iter().zip(b).map(|(a, b)| *a ^ *b).collect())
    }

    async fn and(&mut self, a: &[Label], b: &[Label]) -> Result<Vec<Label>, Error> {
        self.eval_gates("and", a, b).await
    }

    async fn or(&mut self, a: &[Label], b: &[Label]) -> Result<Vec<Label>, Error> {
        self.eval_gates("or", a, b).await
    }

    async fn share(&mut self, from: usize, value: u64, bits: usize) -> Result<Vec<Label>, Error> {
        check_share_width(bits)?;
        match from {
            GENERATOR => Ok(self.gate.recv_n("input keys", bits).await?),
            EVALUATOR => {
                // Our own private bits select the labels via OT; the
                // generator cannot tell which ones we took.
                let selectors: Vec<bool> = (0..bits).map(|i| (value >> i) & 1 == 1).collect();
                let blocks = self.ot.receive(&selectors, &mut self.rng).await?;
                Ok(blocks.into_iter().map(Label).collect())
            }
            party => Err(Error::UnknownParty { party, parties: 2 }),
        }
    }

    async fn random(&mut self, bits: usize) -> Result<Vec<Label>, Error> {
        check_width("random", bits)?;
        let selectors: Vec<bool> = (0..bits).map(|_| self.rng.gen()).collect();
        let blocks = self.ot.receive(&selectors, &mut self.rng).await?;
        Ok(blocks.into_iter().map(Label).collect())
    }

    async fn reveal_to(&mut self, to: usize, a: &[Label]) -> Result<Option<Vec<bool>>, Error> {
        match to {
            GENERATOR => {
                self.reply.send("revealed keys", a).await?;
                Ok(None)
            }
            EVALUATOR => {
                let tables: Vec<GarbledTable> =
                    self.gate.recv_n("reveal tables", a.len()).await?;
                let bits = a
                    .iter()
                    .zip(tables)
                    .map(|(k, table)| read_reveal_table(&table, *k))
                    .collect::<Result<Vec<bool>, Error>>()?;
                debug!(wires = a.len(), "revealed wires to evaluator");
                Ok(Some(bits))
            }
            party => Err(Error::UnknownParty { party, parties: 2 }),
        }
    }

    async fn reveal(&mut self, a: &[Label]) -> Result<Vec<bool>, Error> {
        self.reveal_to(GENERATOR, a).await?;
        Ok(self
            .reveal_to(EVALUATOR, a)
            .await?
            .expect("evaluator receives its own reveal"))
    }
}

/// Runs the evaluator's side of a two-party garbled-circuit session.
///
/// Returns the bits revealed to the evaluator, one vector per block.
pub async fn evaluate<C: Channel, Ct: Circuit>(
    channel: &C,
    circuit: &Ct,
) -> Result<Vec<Vec<bool>>, Error> {
    let blocks = circuit.blocks();
    if blocks == 0 {
        return Err(Error::NoBlocks);
    }
    debug!(blocks, "starting garbled-circuit evaluator session");
    let mux = Mux::new(channel, EVALUATOR, 2, blocks);
    let mut root = AesRng::new();
    let session = async {
        let mut vms = Vec::with_capacity(blocks);
        for block in 0..blocks as u32 {
            vms.push(Evaluator::new(&mux, block, root.fork()).await?);
        }
        run_blocks(circuit, &mut vms).await
    };
    race_routing(&mux, session).await
}
