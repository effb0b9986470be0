//! Shared helpers for the integration tests: in-memory session simulation
//! and a small gate-level circuit library, including the Vickrey
//! second-price auction reference circuit.
#![allow(dead_code)]

use futures::future::try_join_all;
use gatefold::channel::SimpleChannel;
use gatefold::{commodity, gmw, yao, Circuit, Error, Vm};

/// Runs a two-party garbled-circuit session over in-memory channels.
pub async fn simulate_yao<Ct: Circuit>(
    generator: &Ct,
    evaluator: &Ct,
) -> Result<(Vec<Vec<bool>>, Vec<Vec<bool>>), Error> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut channels = SimpleChannel::channels(2);
    let eval_channel = channels.pop().unwrap();
    let gen_channel = channels.pop().unwrap();
    futures::try_join!(
        yao::garble(&gen_channel, generator),
        yao::evaluate(&eval_channel, evaluator),
    )
}

/// Runs an N-party GMW session (plus commodity server) over in-memory
/// channels, one circuit handle per party.
pub async fn simulate_gmw<Ct: Circuit>(circuits: &[Ct]) -> Result<Vec<Vec<Vec<bool>>>, Error> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let parties = circuits.len();
    let mut channels = SimpleChannel::channels(parties + 1);
    let dealer_channel = channels.pop().unwrap();
    let dealer = async {
        commodity::serve(&dealer_channel, parties, circuits[0].blocks())
            .await
            .map_err(Error::from)
    };
    let work = try_join_all(
        channels
            .iter()
            .zip(circuits)
            .enumerate()
            .map(|(p, (channel, circuit))| gmw::run_party(channel, p, parties, circuit)),
    );
    let (outputs, ()) = futures::try_join!(work, dealer)?;
    Ok(outputs)
}

/// Decodes little-endian bits into an integer.
pub fn u64_from_bits(bits: &[bool]) -> u64 {
    bits.iter()
        .enumerate()
        .fold(0, |acc, (i, b)| acc | (*b as u64) << i)
}

/// Wires carrying the public constant `value`, little-endian.
pub fn const_bits<V: Vm>(vm: &mut V, value: u64, bits: usize) -> Vec<V::Wire> {
    (0..bits).map(|i| vm.constant((value >> i) & 1 == 1)).collect()
}

/// `if c { a } else { b }`, wire-parallel: `b ^ (c & (a ^ b))`.
pub async fn mux<V: Vm>(
    vm: &mut V,
    c: &V::Wire,
    a: &[V::Wire],
    b: &[V::Wire],
) -> Result<Vec<V::Wire>, Error> {
    let cs = vec![c.clone(); a.len()];
    let a_xor_b = vm.xor(a, b)?;
    let sel = vm.and(&cs, &a_xor_b).await?;
    vm.xor(b, &sel)
}

/// Ripple comparator: a single wire carrying `a > b` for little-endian
/// equal-width operands.
pub async fn gt<V: Vm>(vm: &mut V, a: &[V::Wire], b: &[V::Wire]) -> Result<V::Wire, Error> {
    assert_eq!(a.len(), b.len());
    let mut result = vm.constant(false);
    for (a, b) in a.iter().zip(b) {
        // From the least significant bit up: where the bits differ, a's bit
        // decides; otherwise the lower bits carry through.
        let ne = vm.xor(&[a.clone()], &[b.clone()])?;
        result = mux(vm, &ne[0], &[a.clone()], &[result]).await?.remove(0);
    }
    Ok(result)
}

/// The Vickrey (second-price) auction: every party submits an 8-bit bid;
/// the index of the highest bidder and the second-highest bid are revealed
/// to everyone.
pub struct Vickrey {
    /// This party's private bid.
    pub bid: u64,
}

impl Circuit for Vickrey {
    async fn run<V: Vm>(&self, _block: usize, vm: &mut V) -> Result<Vec<bool>, Error> {
        let parties = vm.parties();
        let mut bids = Vec::with_capacity(parties);
        for p in 0..parties {
            bids.push(vm.share(p, self.bid, 8).await?);
        }
        let mut best = bids[0].clone();
        let mut second = const_bits(vm, 0, 8);
        let mut winner = const_bits(vm, 0, 2);
        for (p, bid) in bids.iter().enumerate().skip(1) {
            let beats_best = gt(vm, bid, &best).await?;
            let beats_second = gt(vm, bid, &second).await?;
            // If this bid dethrones the leader, the old leader becomes the
            // price; otherwise the bid only competes for second place.
            let candidate = mux(vm, &beats_second, bid, &second).await?;
            second = mux(vm, &beats_best, &best, &candidate).await?;
            best = mux(vm, &beats_best, bid, &best).await?;
            let index = const_bits(vm, p as u64, 2);
            winner = mux(vm, &beats_best, &index, &winner).await?;
        }
        let mut out = winner;
        out.extend(second);
        vm.reveal(&out).await
    }
}
