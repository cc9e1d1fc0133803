//! Deterministic randomness computation and fulfillment attestation.
//!
//! The random value is a pure function of (seed, secret): identical inputs
//! always produce identical output, so a submission can be retried without
//! ever presenting a different answer for the same request.

use ethers::signers::LocalWallet;
use ethers::types::{Signature, H256, U256};
use ethers::utils::{hash_message, keccak256};
use sha2::{Digest, Sha256};

use crate::error::OracleError;

/// Upper bound (exclusive) of the random output: 10^18.
fn output_modulus() -> U256 {
    U256::exp10(18)
}

/// Compute the deterministic random value for a request.
///
/// ```text
/// random = sha256(dec(seed) || "0x" || hex(secret)) mod 10^18
/// ```
///
/// `dec(seed)` is the decimal rendering of the seed and `hex(secret)` the
/// lowercase hex rendering of the 32-byte secret. The string encodings are
/// part of the on-chain verifier's expectation and must not change.
pub fn generate_random(seed: U256, secret: &[u8; 32]) -> U256 {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_string().as_bytes());
    hasher.update(b"0x");
    hasher.update(hex::encode(secret).as_bytes());
    let digest = hasher.finalize();

    U256::from_big_endian(&digest) % output_modulus()
}

/// Canonical message digest binding a fulfillment to its request:
/// `keccak256(uint256(requestId) || uint256(seed) || uint256(random))`,
/// each operand big-endian packed to 32 bytes.
pub fn fulfillment_digest(request_id: U256, seed: U256, random: U256) -> H256 {
    let mut packed = [0u8; 96];
    request_id.to_big_endian(&mut packed[0..32]);
    seed.to_big_endian(&mut packed[32..64]);
    random.to_big_endian(&mut packed[64..96]);
    H256::from(keccak256(packed))
}

/// Sign the fulfillment digest with the generation's wallet.
///
/// The digest is wrapped in the EIP-191 personal-message envelope before
/// signing, matching the verifier's `signMessage` expectation. ECDSA nonces
/// follow RFC 6979, so the signature itself is deterministic for a fixed
/// (message, secret) pair.
pub fn attest(
    request_id: U256,
    seed: U256,
    random: U256,
    wallet: &LocalWallet,
) -> Result<Signature, OracleError> {
    let digest = fulfillment_digest(request_id, seed, random);
    wallet
        .sign_hash(hash_message(digest.as_bytes()))
        .map_err(|e| OracleError::Attestation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::signers::Signer;

    fn test_secret() -> [u8; 32] {
        let mut s = [0u8; 32];
        s[31] = 7;
        s
    }

    fn test_wallet() -> LocalWallet {
        use ethers::core::k256::ecdsa::SigningKey;
        LocalWallet::from(SigningKey::from_slice(&test_secret()).unwrap())
    }

    #[test]
    fn deterministic_for_same_inputs() {
        let secret = test_secret();
        let r1 = generate_random(U256::from(30u64), &secret);
        let r2 = generate_random(U256::from(30u64), &secret);
        assert_eq!(r1, r2);
    }

    #[test]
    fn output_stays_below_modulus() {
        let secret = test_secret();
        for seed in 0u64..50 {
            let random = generate_random(U256::from(seed), &secret);
            assert!(random < U256::exp10(18));
        }
    }

    #[test]
    fn different_seeds_produce_different_output() {
        let secret = test_secret();
        let r1 = generate_random(U256::from(30u64), &secret);
        let r2 = generate_random(U256::from(31u64), &secret);
        assert_ne!(r1, r2);
    }

    #[test]
    fn different_secrets_produce_different_output() {
        let mut other = test_secret();
        other[31] = 8;
        let r1 = generate_random(U256::from(30u64), &test_secret());
        let r2 = generate_random(U256::from(30u64), &other);
        assert_ne!(r1, r2);
    }

    #[test]
    fn digest_hashes_over_decimal_seed_and_hex_secret() {
        // The digest input is the literal string concatenation used by the
        // on-chain verifier's reference formula.
        let secret = test_secret();
        let preimage = format!("{}0x{}", U256::from(30u64), hex::encode(secret));

        let mut hasher = Sha256::new();
        hasher.update(preimage.as_bytes());
        let expected = U256::from_big_endian(&hasher.finalize()) % U256::exp10(18);

        assert_eq!(generate_random(U256::from(30u64), &secret), expected);
    }

    #[test]
    fn fulfillment_digest_is_order_sensitive() {
        let a = fulfillment_digest(U256::from(1u64), U256::from(2u64), U256::from(3u64));
        let b = fulfillment_digest(U256::from(3u64), U256::from(2u64), U256::from(1u64));
        assert_ne!(a, b);
    }

    #[test]
    fn signature_recovers_to_the_signing_wallet() {
        let wallet = test_wallet();
        let request_id = U256::from(42u64);
        let seed = U256::from(30u64);
        let random = generate_random(seed, &test_secret());

        let signature = attest(request_id, seed, random, &wallet).unwrap();

        let digest = fulfillment_digest(request_id, seed, random);
        let recovered = signature.recover(digest.as_bytes().to_vec()).unwrap();
        assert_eq!(recovered, wallet.address());
    }

    #[test]
    fn attestation_is_stable_across_calls() {
        let wallet = test_wallet();
        let seed = U256::from(30u64);
        let random = generate_random(seed, &test_secret());

        let s1 = attest(U256::one(), seed, random, &wallet).unwrap();
        let s2 = attest(U256::one(), seed, random, &wallet).unwrap();
        assert_eq!(s1, s2);
    }
}
