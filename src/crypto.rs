//! Symmetric building blocks: the slot cipher used to garble gate tables, an
//! AES-CTR PRG and a fixed-key correlation-robust hash.

use std::sync::LazyLock;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use rand::{CryptoRng, Rng, RngCore, SeedableRng};

use crate::block::Block;

/// Encrypts a single block under a block-sized key (AES-128-ECB).
///
/// Length-preserving and deterministic; the inverse of [`decrypt`]. Slots of
/// a garbled table are unauthenticated, the point-and-permute selector is
/// what narrows the slot space.
pub(crate) fn encrypt(key: &Block, m: Block) -> Block {
    let aes = Aes128::new(GenericArray::from_slice(key.as_bytes()));
    let mut block = GenericArray::clone_from_slice(m.as_bytes());
    aes.encrypt_block(&mut block);
    Block::new(block.into())
}

/// Decrypts a single block under a block-sized key.
pub(crate) fn decrypt(key: &Block, c: Block) -> Block {
    let aes = Aes128::new(GenericArray::from_slice(key.as_bytes()));
    let mut block = GenericArray::clone_from_slice(c.as_bytes());
    aes.decrypt_block(&mut block);
    Block::new(block.into())
}

/// An AES-128-CTR PRG.
///
/// Deterministically expands a [`Block`] seed into a byte stream; two
/// instances created from the same seed produce identical output, which is
/// what the commodity server relies on to mirror its clients' randomness.
#[derive(Clone)]
pub(crate) struct AesRng {
    aes: Aes128,
    state: u128,
    buf: [u8; 16],
    used: usize,
}

impl AesRng {
    /// Creates a generator from fresh entropy.
    pub(crate) fn new() -> Self {
        Self::from_seed(rand::random())
    }

    /// Creates a new generator seeded from this one.
    pub(crate) fn fork(&mut self) -> Self {
        let seed: Block = self.gen();
        Self::from_seed(seed)
    }

    fn refill(&mut self) {
        let mut block = GenericArray::clone_from_slice(&self.state.to_le_bytes());
        self.aes.encrypt_block(&mut block);
        self.buf = block.into();
        self.state += 1;
        self.used = 0;
    }
}

impl SeedableRng for AesRng {
    type Seed = Block;

    fn from_seed(seed: Block) -> Self {
        Self {
            aes: Aes128::new(GenericArray::from_slice(seed.as_bytes())),
            state: 0,
            buf: [0; 16],
            used: 16,
        }
    }
}

impl RngCore for AesRng {
    fn next_u32(&mut self) -> u32 {
        let mut bytes = [0u8; 4];
        self.fill_bytes(&mut bytes);
        u32::from_le_bytes(bytes)
    }

    fn next_u64(&mut self) -> u64 {
        let mut bytes = [0u8; 8];
        self.fill_bytes(&mut bytes);
        u64::from_le_bytes(bytes)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        let mut filled = 0;
        while filled < dest.len() {
            if self.used == 16 {
                self.refill();
            }
            let n = (16 - self.used).min(dest.len() - filled);
            dest[filled..filled + n].copy_from_slice(&self.buf[self.used..self.used + n]);
            self.used += n;
            filled += n;
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl CryptoRng for AesRng {}

/// Correlation-robust hash `H(t, x) = pi(x ^ t) ^ x ^ t` with a fixed AES
/// key, as used by the OT extension. Only secure against semi-honest
/// adversaries, which is the adversary model of the whole runtime.
pub(crate) struct AesHash {
    aes: Aes128,
}

impl AesHash {
    fn new(key: &Block) -> Self {
        Self {
            aes: Aes128::new(GenericArray::from_slice(key.as_bytes())),
        }
    }

    pub(crate) fn cr_hash(&self, tweak: Block, x: Block) -> Block {
        let t = x ^ tweak;
        let mut block = GenericArray::clone_from_slice(t.as_bytes());
        self.aes.encrypt_block(&mut block);
        Block::new(block.into()) ^ t
    }
}

/// The fixed-key hash instance. The key was chosen randomly; any key works.
pub(crate) static FIXED_KEY_HASH: LazyLock<AesHash> = LazyLock::new(|| {
    AesHash::new(&Block::from(193502124791825095790518994062991136444u128))
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt() {
        let key: Block = rand::random();
        let m: Block = rand::random();
        let c = encrypt(&key, m);
        assert_ne!(c, m);
        assert_eq!(decrypt(&key, c), m);
    }

    #[test]
    fn prg_is_deterministic() {
        let seed: Block = rand::random();
        let mut a = AesRng::from_seed(seed);
        let mut b = AesRng::from_seed(seed);
        let mut buf_a = [0u8; 100];
        a.fill_bytes(&mut buf_a);
        // Different read granularity must not change the stream.
        let mut buf_b = [0u8; 100];
        for chunk in buf_b.chunks_mut(7) {
            b.fill_bytes(chunk);
        }
        assert_eq!(buf_a, buf_b);
    }

    #[test]
    fn prg_streams_diverge_across_seeds() {
        let mut a = AesRng::from_seed(Block::ZERO);
        let mut b = AesRng::from_seed(Block::ONE);
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn cr_hash_depends_on_tweak() {
        let x: Block = rand::random();
        let h0 = FIXED_KEY_HASH.cr_hash(Block::from(0u128), x);
        let h1 = FIXED_KEY_HASH.cr_hash(Block::from(1u128), x);
        assert_ne!(h0, h1);
    }
}
