//! A 128-bit [`Block`], the unit of wire keys, ciphertext slots and PRG
//! seeds.
//!
//! The block width is the symmetric security parameter of the whole runtime
//! (K = 16 bytes, matching AES-128). The least significant bit of byte 0 is
//! the point-and-permute selector bit of garbled-circuit keys.

use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitXor, BitXorAssign};

use rand::distributions::{Distribution, Standard};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A 16-byte block.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Block([u8; 16]);

impl Block {
    /// All bits set to 0.
    pub const ZERO: Self = Self([0; 16]);
    /// Lsb set to 1, all other bits 0.
    pub const ONE: Self = Self::new(1u128.to_le_bytes());
    /// Number of bytes in a block.
    pub const BYTES: usize = 16;

    /// Creates a block from its bytes.
    #[inline]
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// The bytes of the block.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// The least significant bit (the point-and-permute selector of a key).
    #[inline]
    pub fn lsb(&self) -> bool {
        self.0[0] & 1 == 1
    }

    /// Overwrites the least significant bit.
    #[inline]
    pub(crate) fn set_lsb(&mut self, bit: bool) {
        self.0[0] = (self.0[0] & !1) | bit as u8;
    }

    /// Overwrites byte 0, used by reveal tables to tag plaintext literals.
    #[inline]
    pub(crate) fn set_low_byte(&mut self, byte: u8) {
        self.0[0] = byte;
    }

    /// Byte 0 of the block.
    #[inline]
    pub(crate) fn low_byte(&self) -> u8 {
        self.0[0]
    }

    #[inline]
    fn to_u128(self) -> u128 {
        u128::from_le_bytes(self.0)
    }
}

impl From<[u8; 16]> for Block {
    #[inline]
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl From<u128> for Block {
    #[inline]
    fn from(x: u128) -> Self {
        Self(x.to_le_bytes())
    }
}

impl From<Block> for u128 {
    #[inline]
    fn from(b: Block) -> Self {
        b.to_u128()
    }
}

impl AsRef<[u8]> for Block {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl AsMut<[u8]> for Block {
    #[inline]
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl BitXor for Block {
    type Output = Self;

    #[inline]
    fn bitxor(self, rhs: Self) -> Self {
        Self::from(self.to_u128() ^ rhs.to_u128())
    }
}

impl BitXorAssign for Block {
    #[inline]
    fn bitxor_assign(&mut self, rhs: Self) {
        *self = *self ^ rhs;
    }
}

impl BitAnd for Block {
    type Output = Self;

    #[inline]
    fn bitand(self, rhs: Self) -> Self {
        Self::from(self.to_u128() & rhs.to_u128())
    }
}

impl BitAndAssign for Block {
    #[inline]
    fn bitand_assign(&mut self, rhs: Self) {
        *self = *self & rhs;
    }
}

impl Distribution<Block> for Standard {
    #[inline]
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Block {
        Block(rng.gen())
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter().rev() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
