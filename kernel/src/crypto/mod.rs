//! Cryptographic primitives backing the TLS client: SHA-256,
//! HMAC-SHA-256 and the TLS 1.2 PRF, AES-128-CBC, 2048-bit bignum
//! arithmetic and RSA PKCS#1 v1.5 encryption, and a CSPRNG seeded from
//! TSC/PIT/RTC. Nothing here is general-purpose key management; it is
//! exactly the set of operations the handshake and record layer call.

pub mod asymmetric;
pub mod constant_time;
pub mod hash;
pub mod random;
pub mod symmetric;

pub use asymmetric::{BigNum, RsaPublicKey};
pub use hash::{hmac_sha256, sha256, tls_prf, Hash256};
pub use random::{get_random, SecureRandom};
pub use symmetric::Aes128Cbc;

use crate::error::KernelError;

/// Initialize cryptographic subsystem
pub fn init() -> Result<(), KernelError> {
    crate::println!("[CRYPTO] Initializing cryptographic subsystem...");

    random::init().map_err(|_| KernelError::InvalidState {
        expected: "initialized",
        actual: "failed_to_init_random",
    })?;

    crate::println!("[CRYPTO] Cryptographic subsystem initialized");
    Ok(())
}

/// Crypto operation result
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Cryptographic errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    InvalidKeySize,
    InvalidNonceSize,
    InvalidTagSize,
    EncryptionFailed,
    DecryptionFailed,
    SignatureFailed,
    VerificationFailed,
    KeyGenerationFailed,
    InvalidKey,
    InsufficientEntropy,
}

/// Validate crypto primitives against known test vectors at boot, so a
/// broken build fails loudly instead of silently shipping wrong crypto.
pub fn validate() -> bool {
    let sha_expected: [u8; 32] = [
        0xba, 0x78, 0x16, 0xbf, 0x8f, 0x01, 0xcf, 0xea, 0x41, 0x41, 0x40, 0xde, 0x5d, 0xae, 0x22,
        0x23, 0xb0, 0x03, 0x61, 0xa3, 0x96, 0x17, 0x7a, 0x9c, 0xb4, 0x10, 0xff, 0x61, 0xf2, 0x00,
        0x15, 0xad,
    ];
    if hash::sha256(b"abc").as_bytes() != &sha_expected {
        return false;
    }

    let hmac_expected: [u8; 32] = [
        0xb6, 0x13, 0x67, 0x9a, 0x08, 0x14, 0xd9, 0xec, 0x77, 0x2f, 0x95, 0xd7, 0x78, 0xc3, 0x5f,
        0xc5, 0xff, 0x16, 0x97, 0xc4, 0x93, 0x71, 0x56, 0x53, 0xc6, 0xc7, 0x12, 0x14, 0x42, 0x92,
        0xc5, 0xad,
    ];
    if hash::hmac_sha256(b"", b"").as_bytes() != &hmac_expected {
        return false;
    }

    let modexp_ok = asymmetric::BigNum::from_u32(2)
        .modexp(&asymmetric::BigNum::from_u32(10), &asymmetric::BigNum::from_u32(1000))
        .words[0]
        == 24;
    if !modexp_ok {
        return false;
    }

    // FIPS-197 Appendix B AES-128 ECB vector.
    let key: [u8; 16] = [
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
        0x0f,
    ];
    let mut block: [u8; 16] = [
        0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee,
        0xff,
    ];
    let schedule = symmetric::AesKeySchedule::new(&key);
    symmetric::encrypt_block(&schedule, &mut block);
    let aes_expected: [u8; 16] = [
        0x69, 0xc4, 0xe0, 0xd8, 0x6a, 0x7b, 0x04, 0x30, 0xd8, 0xcd, 0xb7, 0x80, 0x70, 0xb4, 0xc5,
        0x5a,
    ];
    block == aes_expected
}

impl core::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            CryptoError::InvalidKeySize => write!(f, "Invalid key size"),
            CryptoError::InvalidNonceSize => write!(f, "Invalid nonce size"),
            CryptoError::InvalidTagSize => write!(f, "Invalid authentication tag size"),
            CryptoError::EncryptionFailed => write!(f, "Encryption failed"),
            CryptoError::DecryptionFailed => write!(f, "Decryption failed"),
            CryptoError::SignatureFailed => write!(f, "Signature generation failed"),
            CryptoError::VerificationFailed => write!(f, "Signature verification failed"),
            CryptoError::KeyGenerationFailed => write!(f, "Key generation failed"),
            CryptoError::InvalidKey => write!(f, "Invalid cryptographic key"),
            CryptoError::InsufficientEntropy => write!(f, "Insufficient entropy"),
        }
    }
}
