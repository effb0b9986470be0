mod common;

use common::{simulate_gmw, u64_from_bits, Vickrey};
use gatefold::{Circuit, Error, Vm};

/// One input bit per party through every gate type.
struct Gates {
    input: u64,
}

impl Circuit for Gates {
    async fn run<V: Vm>(&self, _block: usize, vm: &mut V) -> Result<Vec<bool>, Error> {
        let mut inputs = Vec::with_capacity(vm.parties());
        for p in 0..vm.parties() {
            inputs.push(vm.share(p, self.input, 1).await?.remove(0));
        }
        let (a, b, c) = (inputs[0].clone(), inputs[1].clone(), inputs[2].clone());
        let ab = vm.and(&[a.clone()], &[b.clone()]).await?;
        let bc_or = vm.or(&[b.clone()], &[c.clone()]).await?;
        let mixed = vm.xor(&ab, &bc_or)?;
        let negated = vm.not(&[c])?;
        let mut out = ab.clone();
        out.extend(bc_or);
        out.extend(mixed);
        out.extend(negated);
        vm.reveal(&out).await
    }
}

#[tokio::test]
async fn three_party_gates_match_plain_evaluation() -> Result<(), Error> {
    for input in 0..8u64 {
        let (a, b, c) = (input & 1 != 0, input & 2 != 0, input & 4 != 0);
        let circuits: Vec<Gates> = (0..3)
            .map(|p| Gates {
                input: (input >> p) & 1,
            })
            .collect();
        let outputs = simulate_gmw(&circuits).await?;
        let expected = vec![a & b, b | c, (a & b) ^ (b | c), !c];
        for (party, output) in outputs.iter().enumerate() {
            assert_eq!(output, &vec![expected.clone()], "party {party}, input {input:03b}");
        }
    }
    Ok(())
}

/// Every party shares a value, everything is revealed to everyone.
struct Echo {
    value: u64,
    bits: usize,
}

impl Circuit for Echo {
    async fn run<V: Vm>(&self, _block: usize, vm: &mut V) -> Result<Vec<bool>, Error> {
        let mut wires = Vec::new();
        for p in 0..vm.parties() {
            wires.extend(vm.share(p, self.value, self.bits).await?);
        }
        vm.reveal(&wires).await
    }
}

#[tokio::test]
async fn share_then_reveal_is_the_identity() -> Result<(), Error> {
    for parties in 2..=4 {
        let values: Vec<u64> = (0..parties as u64).map(|p| 0xa5 ^ (p * 77)).collect();
        let circuits: Vec<Echo> = values
            .iter()
            .map(|v| Echo { value: *v, bits: 8 })
            .collect();
        let outputs = simulate_gmw(&circuits).await?;
        for output in outputs {
            let bits = &output[0];
            for (p, v) in values.iter().enumerate() {
                assert_eq!(
                    u64_from_bits(&bits[p * 8..(p + 1) * 8]),
                    v & 0xff,
                    "{parties} parties, input of party {p}"
                );
            }
        }
    }
    Ok(())
}

#[tokio::test]
async fn vickrey_auction_reveals_winner_and_second_price() -> Result<(), Error> {
    let circuits: Vec<Vickrey> = [5, 9, 7].into_iter().map(|bid| Vickrey { bid }).collect();
    let outputs = simulate_gmw(&circuits).await?;
    for (party, output) in outputs.iter().enumerate() {
        let bits = &output[0];
        assert_eq!(u64_from_bits(&bits[..2]), 1, "winner at party {party}");
        assert_eq!(u64_from_bits(&bits[2..]), 7, "price at party {party}");
    }
    Ok(())
}

/// A random bit vector, revealed to check the aggregate is well-formed.
struct RandomReveal;

impl Circuit for RandomReveal {
    async fn run<V: Vm>(&self, _block: usize, vm: &mut V) -> Result<Vec<bool>, Error> {
        let r = vm.random(128).await?;
        vm.reveal(&r).await
    }
}

#[tokio::test]
async fn random_wires_agree_across_parties() -> Result<(), Error> {
    let circuits = [RandomReveal, RandomReveal, RandomReveal];
    let outputs = simulate_gmw(&circuits).await?;
    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[1], outputs[2]);
    // 128 aggregated coin flips collapsing to all-equal bits would mean the
    // shares are not mixing at all.
    let bits = &outputs[0][0];
    assert!(bits.contains(&true) && bits.contains(&false));
    Ok(())
}

/// Reveals one party's comparison result to a single chosen party.
struct Targeted {
    value: u64,
    output_party: usize,
}

impl Circuit for Targeted {
    async fn run<V: Vm>(&self, _block: usize, vm: &mut V) -> Result<Vec<bool>, Error> {
        let a = vm.share(0, self.value, 4).await?;
        let b = vm.share(1, self.value, 4).await?;
        let gt = common::gt(vm, &a, &b).await?;
        Ok(vm
            .reveal_to(self.output_party, &[gt])
            .await?
            .unwrap_or_default())
    }
}

#[tokio::test]
async fn targeted_reveal_reaches_only_one_party() -> Result<(), Error> {
    let circuits: Vec<Targeted> = [12, 3, 0]
        .into_iter()
        .map(|value| Targeted {
            value,
            output_party: 2,
        })
        .collect();
    let outputs = simulate_gmw(&circuits).await?;
    assert_eq!(outputs[0], vec![Vec::<bool>::new()]);
    assert_eq!(outputs[1], vec![Vec::<bool>::new()]);
    assert_eq!(outputs[2], vec![vec![true]]);
    Ok(())
}
