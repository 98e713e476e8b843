use chrono::{Duration, Utc};
use rand::rngs::OsRng;
use rand::Rng;
use subtle::ConstantTimeEq;

use crate::models::TwoFactorChallenge;
use crate::utils::sha256_hex;

/// A freshly generated one-time code together with the challenge record
/// that goes onto the account. The plaintext code leaves the process
/// only through the notification channel.
pub struct IssuedCode {
    pub code: String,
    pub challenge: TwoFactorChallenge,
}

/// Generates numeric one-time codes from the OS entropy source.
#[derive(Clone)]
pub struct CodeGenerator {
    code_length: usize,
    ttl: Duration,
}

impl CodeGenerator {
    pub fn new(code_length: usize, ttl_seconds: i64) -> Self {
        Self {
            code_length,
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    pub fn generate(&self) -> IssuedCode {
        let mut rng = OsRng;
        let code: String = (0..self.code_length)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect();
        let challenge = TwoFactorChallenge {
            code_hash: sha256_hex(&code),
            expires_utc: Utc::now() + self.ttl,
        };
        IssuedCode { code, challenge }
    }
}

/// Compares a submitted code against the stored digest in constant
/// time. Hashing first keeps the comparison length-independent of the
/// submission.
pub fn code_matches(submitted: &str, stored_hash: &str) -> bool {
    let submitted_hash = sha256_hex(submitted);
    submitted_hash.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}
