//! Claim authorization tokens.
//!
//! A proof is `base64(HMAC-SHA256(secret, "{wallet}:{amount}"))`. Proofs are
//! not stored anywhere: verification recomputes the MAC. They do not expire;
//! rotating the secret invalidates all of them at once.

use base64::prelude::*;
use hmac::{Hmac, Mac};
use sha2::Sha256;

#[derive(Clone)]
pub struct ProofService {
    hmac: Hmac<Sha256>,
}

impl std::fmt::Debug for ProofService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProofService").finish_non_exhaustive()
    }
}

impl ProofService {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            hmac: Hmac::new_from_slice(secret).expect("HMAC accepts keys of any length"),
        }
    }

    fn mac(&self, wallet: &str, amount: u64) -> Hmac<Sha256> {
        let mut hmac = self.hmac.clone();
        hmac.update(wallet.as_bytes());
        hmac.update(b":");
        hmac.update(amount.to_string().as_bytes());
        hmac
    }

    pub fn issue(&self, wallet: &str, amount: u64) -> String {
        BASE64_STANDARD.encode(self.mac(wallet, amount).finalize().into_bytes())
    }

    /// Constant-time check of `proof` against the expected MAC.
    pub fn verify(&self, wallet: &str, amount: u64, proof: &str) -> bool {
        let Ok(bytes) = BASE64_STANDARD.decode(proof.trim()) else {
            return false;
        };
        self.mac(wallet, amount).verify_slice(&bytes).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WALLET: &str = "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin";

    #[test]
    fn test_issue_verify() {
        let p = ProofService::new(b"dev-secret");
        for amount in [0u64, 1, 25, 19, 510_000_000, u64::MAX] {
            let proof = p.issue(WALLET, amount);
            assert!(p.verify(WALLET, amount, &proof));
        }
    }

    #[test]
    fn test_matches_hmac_sha256() {
        let p = ProofService::new(b"key");
        let mut expected = Hmac::<Sha256>::new_from_slice(b"key").unwrap();
        expected.update(format!("{WALLET}:25").as_bytes());
        let expected = BASE64_STANDARD.encode(expected.finalize().into_bytes());
        assert_eq!(p.issue(WALLET, 25), expected);
    }

    #[test]
    fn test_bit_flips() {
        let p = ProofService::new(&rand::random::<[u8; 32]>());
        let proof = p.issue(WALLET, 25);
        let bytes = BASE64_STANDARD.decode(&proof).unwrap();
        for i in 0..bytes.len() * 8 {
            let mut mutated = bytes.clone();
            mutated[i / 8] ^= 1 << (i % 8);
            assert!(!p.verify(WALLET, 25, &BASE64_STANDARD.encode(&mutated)));
        }

        for i in 0..WALLET.len() * 8 {
            let mut wallet = WALLET.as_bytes().to_vec();
            wallet[i / 8] ^= 1 << (i % 8);
            // flipped bytes may not be valid utf-8
            if let Ok(wallet) = String::from_utf8(wallet) {
                assert!(!p.verify(&wallet, 25, &proof));
            }
        }

        for bit in 0..64 {
            let amount = 25u64 ^ (1 << bit);
            assert!(!p.verify(WALLET, amount, &proof));
        }
    }

    #[test]
    fn test_rejects_garbage() {
        let p = ProofService::new(b"dev-secret");
        assert!(!p.verify(WALLET, 25, ""));
        assert!(!p.verify(WALLET, 25, "not base64!"));
        assert!(!p.verify(WALLET, 25, &BASE64_STANDARD.encode([0u8; 16])));
    }

    #[test]
    fn test_secret_rotation() {
        let old = ProofService::new(b"old");
        let new = ProofService::new(b"new");
        let proof = old.issue(WALLET, 25);
        assert!(!new.verify(WALLET, 25, &proof));
        assert!(new.verify(WALLET, 25, &new.issue(WALLET, 25)));
    }
}
