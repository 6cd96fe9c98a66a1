//! 2048-bit big-number arithmetic and RSA PKCS#1 v1.5 (encrypt-only),
//! the public-key primitive the TLS handshake uses to wrap the
//! pre-master secret. There is no signature verification here: this
//! kernel only acts as a TLS client against a pinned certificate, so
//! the only operation it needs is "encrypt under the peer's public
//! key."

use alloc::vec::Vec;

use super::{CryptoError, CryptoResult};

/// Number of 32-bit words in a 2048-bit big number.
pub const BN_WORDS: usize = 64;

/// Fixed-width unsigned big number, little-endian word order
/// (`words[0]` is the least significant word).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BigNum {
    pub words: [u32; BN_WORDS],
}

impl BigNum {
    pub const ZERO: BigNum = BigNum { words: [0; BN_WORDS] };

    pub fn from_u32(value: u32) -> Self {
        let mut bn = Self::ZERO;
        bn.words[0] = value;
        bn
    }

    /// Big-endian byte decode, most significant byte first. `bytes` must
    /// be at most `BN_WORDS * 4` long.
    pub fn from_be_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() > BN_WORDS * 4 {
            return Err(CryptoError::InvalidKey);
        }
        let mut bn = Self::ZERO;
        let mut padded = [0u8; BN_WORDS * 4];
        padded[BN_WORDS * 4 - bytes.len()..].copy_from_slice(bytes);
        for i in 0..BN_WORDS {
            let off = (BN_WORDS - 1 - i) * 4;
            bn.words[i] = u32::from_be_bytes([
                padded[off],
                padded[off + 1],
                padded[off + 2],
                padded[off + 3],
            ]);
        }
        Ok(bn)
    }

    pub fn to_be_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BN_WORDS * 4);
        for i in (0..BN_WORDS).rev() {
            out.extend_from_slice(&self.words[i].to_be_bytes());
        }
        out
    }

    fn is_zero(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Number of significant bits (0 for the zero value).
    fn bit_length(&self) -> usize {
        for i in (0..BN_WORDS).rev() {
            if self.words[i] != 0 {
                return i * 32 + (32 - self.words[i].leading_zeros() as usize);
            }
        }
        0
    }

    fn get_bit(&self, bit: usize) -> bool {
        let word = bit / 32;
        let off = bit % 32;
        word < BN_WORDS && (self.words[word] >> off) & 1 != 0
    }

    /// `self + other`, wrapping on overflow (RSA values stay within the
    /// modulus, so this is only reachable if a caller has a bug).
    pub fn add(&self, other: &BigNum) -> BigNum {
        let mut result = BigNum::ZERO;
        let mut carry: u64 = 0;
        for i in 0..BN_WORDS {
            let sum = self.words[i] as u64 + other.words[i] as u64 + carry;
            result.words[i] = sum as u32;
            carry = sum >> 32;
        }
        result
    }

    /// `self - other`, assuming `self >= other`.
    pub fn sub(&self, other: &BigNum) -> BigNum {
        let mut result = BigNum::ZERO;
        let mut borrow: i64 = 0;
        for i in 0..BN_WORDS {
            let diff = self.words[i] as i64 - other.words[i] as i64 - borrow;
            if diff < 0 {
                result.words[i] = (diff + (1i64 << 32)) as u32;
                borrow = 1;
            } else {
                result.words[i] = diff as u32;
                borrow = 0;
            }
        }
        result
    }

    fn cmp(&self, other: &BigNum) -> core::cmp::Ordering {
        for i in (0..BN_WORDS).rev() {
            if self.words[i] != other.words[i] {
                return self.words[i].cmp(&other.words[i]);
            }
        }
        core::cmp::Ordering::Equal
    }

    fn ge(&self, other: &BigNum) -> bool {
        matches!(self.cmp(other), core::cmp::Ordering::Greater | core::cmp::Ordering::Equal)
    }

    /// `self mod modulus` via repeated shift-and-subtract. Not
    /// constant-time; fine for a client-side public-key-only encrypt
    /// path operating on the peer's public modulus.
    pub fn modulo(&self, modulus: &BigNum) -> BigNum {
        if modulus.is_zero() {
            return BigNum::ZERO;
        }
        let mut remainder = *self;
        let shift = self.bit_length().saturating_sub(modulus.bit_length());
        let mut shifted = modulus.shl(shift);
        let mut bits_left = shift;
        loop {
            if remainder.ge(&shifted) {
                remainder = remainder.sub(&shifted);
            }
            if bits_left == 0 {
                break;
            }
            shifted = shifted.shr(1);
            bits_left -= 1;
        }
        remainder
    }

    fn shl(&self, bits: usize) -> BigNum {
        let mut result = BigNum::ZERO;
        let word_shift = bits / 32;
        let bit_shift = bits % 32;
        for i in (0..BN_WORDS).rev() {
            if i < word_shift {
                continue;
            }
            let src = i - word_shift;
            let mut value = (self.words[src] as u64) << bit_shift;
            if bit_shift > 0 && src > 0 {
                value |= (self.words[src - 1] as u64) >> (32 - bit_shift);
            }
            result.words[i] = value as u32;
        }
        result
    }

    fn shr(&self, bits: usize) -> BigNum {
        let mut result = BigNum::ZERO;
        let word_shift = bits / 32;
        let bit_shift = bits % 32;
        for i in 0..BN_WORDS {
            let src = i + word_shift;
            if src >= BN_WORDS {
                continue;
            }
            let mut value = (self.words[src] as u64) >> bit_shift;
            if bit_shift > 0 && src + 1 < BN_WORDS {
                value |= (self.words[src + 1] as u64) << (32 - bit_shift);
            }
            result.words[i] = value as u32;
        }
        result
    }

    /// `(self * other) mod modulus` via schoolbook multiplication into a
    /// double-width accumulator, then repeated-subtract reduction.
    pub fn mulmod(&self, other: &BigNum, modulus: &BigNum) -> BigNum {
        let mut wide = [0u32; BN_WORDS * 2];
        for i in 0..BN_WORDS {
            if self.words[i] == 0 {
                continue;
            }
            let mut carry: u64 = 0;
            for j in 0..BN_WORDS {
                let product = self.words[i] as u64 * other.words[j] as u64
                    + wide[i + j] as u64
                    + carry;
                wide[i + j] = product as u32;
                carry = product >> 32;
            }
            let mut k = i + BN_WORDS;
            while carry != 0 {
                let sum = wide[k] as u64 + carry;
                wide[k] = sum as u32;
                carry = sum >> 32;
                k += 1;
            }
        }

        // Fold the double-width product down one word at a time, reducing
        // modulo `modulus` after each fold so the accumulator never needs
        // to be wider than BN_WORDS.
        let mut acc = BigNum::ZERO;
        for i in (0..BN_WORDS * 2).rev() {
            acc = acc.shl(32);
            acc.words[0] = wide[i];
            acc = acc.modulo(modulus);
        }
        acc
    }

    /// `(self ^ exponent) mod modulus` via left-to-right
    /// square-and-multiply (equivalently, double-and-add in the
    /// multiplicative group).
    pub fn modexp(&self, exponent: &BigNum, modulus: &BigNum) -> BigNum {
        if modulus.cmp(&BigNum::from_u32(1)) == core::cmp::Ordering::Equal {
            return BigNum::ZERO;
        }
        let bits = exponent.bit_length();
        if bits == 0 {
            return BigNum::from_u32(1).modulo(modulus);
        }
        let mut result = BigNum::from_u32(1);
        let base = self.modulo(modulus);
        for bit in (0..bits).rev() {
            result = result.mulmod(&result, modulus);
            if exponent.get_bit(bit) {
                result = result.mulmod(&base, modulus);
            }
        }
        result
    }
}

/// RSA public key: modulus `n` and public exponent `e` (conventionally
/// 65537).
#[derive(Debug, Clone, Copy)]
pub struct RsaPublicKey {
    pub n: BigNum,
    pub e: BigNum,
}

impl RsaPublicKey {
    pub fn new(n: BigNum, e: BigNum) -> Self {
        Self { n, e }
    }

    /// Byte length of the modulus (256 for a 2048-bit key).
    pub fn modulus_len(&self) -> usize {
        self.n.bit_length().div_ceil(8)
    }

    /// PKCS#1 v1.5 encryption (RFC 8017 §7.2.1), block type 0x02:
    /// `EM = 0x00 || 0x02 || PS || 0x00 || M`, `PS` random non-zero
    /// padding filling the message out to `modulus_len() - 3` bytes.
    /// `message` must be at least 11 bytes shorter than the modulus.
    pub fn encrypt_pkcs1(&self, message: &[u8], random_nonzero: &[u8]) -> CryptoResult<Vec<u8>> {
        let k = self.modulus_len();
        if message.len() + 11 > k {
            return Err(CryptoError::EncryptionFailed);
        }
        let ps_len = k - message.len() - 3;
        if random_nonzero.len() < ps_len {
            return Err(CryptoError::InsufficientEntropy);
        }

        let mut em = Vec::with_capacity(k);
        em.push(0x00);
        em.push(0x02);
        for &b in &random_nonzero[..ps_len] {
            em.push(if b == 0 { 0x01 } else { b });
        }
        em.push(0x00);
        em.extend_from_slice(message);

        let m = BigNum::from_be_bytes(&em)?;
        let c = m.modexp(&self.e, &self.n);
        let mut bytes = c.to_be_bytes();
        if bytes.len() > k {
            bytes.drain(0..bytes.len() - k);
        }
        Ok(bytes)
    }
}

/// Common public exponent used in practice (65537 = 0x10001).
pub fn public_exponent_65537() -> BigNum {
    BigNum::from_u32(0x10001)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modexp_small_values() {
        // 2^10 mod 1000 = 1024 mod 1000 = 24
        let base = BigNum::from_u32(2);
        let exp = BigNum::from_u32(10);
        let modulus = BigNum::from_u32(1000);
        let result = base.modexp(&exp, &modulus);
        assert_eq!(result.words[0], 24);
        assert!(result.words[1..].iter().all(|&w| w == 0));
    }

    #[test]
    fn modexp_identity_exponent_one() {
        let base = BigNum::from_u32(42);
        let exp = BigNum::from_u32(1);
        let modulus = BigNum::from_u32(1000);
        assert_eq!(base.modexp(&exp, &modulus).words[0], 42);
    }

    #[test]
    fn add_sub_round_trip() {
        let a = BigNum::from_u32(123_456);
        let b = BigNum::from_u32(654_321);
        let sum = a.add(&b);
        assert_eq!(sum.sub(&b).words[0], a.words[0]);
    }

    #[test]
    fn pkcs1_rejects_message_too_long_for_modulus() {
        // A deliberately tiny "RSA" key, just to exercise the padding size
        // check; 61*53 is far too small for real PKCS#1 framing.
        let n = BigNum::from_u32(3_233);
        let e = BigNum::from_u32(17);
        let key = RsaPublicKey::new(n, e);
        assert_eq!(key.modulus_len(), 2);
        let padding = [0xAAu8; 32];
        assert!(key.encrypt_pkcs1(b"x", &padding).is_err());
    }
}
