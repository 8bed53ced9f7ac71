//! Access code generation, hashing and verification.
//!
//! Stored hashes are self-describing:
//! `pbkdf2$<digest>$<iterations>$<base64 salt>$<base64 derived key>`, so the
//! parameters can change without migrating existing rows.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::access::{AccessGrant, AccessType};
use crate::store::GrantRepository;

pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Collisions beyond this many draws indicate a deeper problem (exhausted
/// code space, broken RNG) and fail issuance instead of looping.
pub const MAX_GENERATION_ATTEMPTS: u32 = 10;

const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;
const MAX_KEY_LEN: usize = 128;
const SEPARATOR: char = '$';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DigestKind {
    Sha256,
    Sha512,
}

impl DigestKind {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "sha256" => Some(DigestKind::Sha256),
            "sha512" => Some(DigestKind::Sha512),
            _ => None,
        }
    }

    fn derive(self, code: &str, salt: &[u8], iterations: u32, out: &mut [u8]) {
        match self {
            DigestKind::Sha256 => pbkdf2_hmac::<Sha256>(code.as_bytes(), salt, iterations, out),
            DigestKind::Sha512 => pbkdf2_hmac::<Sha512>(code.as_bytes(), salt, iterations, out),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccessCodeCodec {
    iterations: u32,
}

impl Default for AccessCodeCodec {
    fn default() -> Self {
        Self::new(DEFAULT_ITERATIONS)
    }
}

impl AccessCodeCodec {
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: iterations.max(1),
        }
    }

    /// Draw a uniformly random code of the right length that no active grant
    /// of `property_id` already uses. Codes are only ever matched within a
    /// property, so other properties are not consulted.
    pub async fn generate(
        &self,
        access_type: AccessType,
        property_id: Uuid,
        repo: &dyn GrantRepository,
    ) -> AppResult<String> {
        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            let code = random_code(access_type.code_digits());
            if !repo.exists_grant_with_code(property_id, &code).await? {
                return Ok(code);
            }
            tracing::warn!(attempt, %property_id, access_type = %access_type, "access code collision, redrawing");
        }
        tracing::error!(
            attempts = MAX_GENERATION_ATTEMPTS,
            "access code generation exhausted"
        );
        Err(AppError::CodeGenerationExhausted {
            attempts: MAX_GENERATION_ATTEMPTS,
        })
    }

    pub fn hash(&self, code: &str) -> String {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut key = [0u8; KEY_LEN];
        DigestKind::Sha256.derive(code, &salt, self.iterations, &mut key);
        format!(
            "pbkdf2{sep}sha256{sep}{}{sep}{}{sep}{}",
            self.iterations,
            BASE64.encode(salt),
            BASE64.encode(key),
            sep = SEPARATOR
        )
    }

    /// Check `code` against a stored hash. Malformed hashes never verify.
    pub fn verify(code: &str, hashed: &str) -> bool {
        let parts: Vec<&str> = hashed.split(SEPARATOR).collect();
        let [scheme, digest, iterations, salt, key] = parts.as_slice() else {
            return false;
        };
        if *scheme != "pbkdf2" {
            return false;
        }
        let Some(digest) = DigestKind::parse(digest) else {
            return false;
        };
        let Ok(iterations) = iterations.parse::<u32>() else {
            return false;
        };
        if iterations == 0 {
            return false;
        }
        let (Ok(salt), Ok(expected)) = (BASE64.decode(salt), BASE64.decode(key)) else {
            return false;
        };
        if expected.is_empty() || expected.len() > MAX_KEY_LEN {
            return false;
        }

        let mut derived = vec![0u8; expected.len()];
        digest.derive(code, &salt, iterations, &mut derived);
        derived.ct_eq(&expected).into()
    }

    /// Whether `code` opens `grant`. Rows without a hash predate hashing and
    /// fall back to a constant-time plaintext comparison.
    pub fn matches_grant(code: &str, grant: &AccessGrant) -> bool {
        match (&grant.hashed_code, &grant.code) {
            (Some(hashed), _) => Self::verify(code, hashed),
            (None, Some(plain)) => plain.as_bytes().ct_eq(code.as_bytes()).into(),
            (None, None) => false,
        }
    }
}

fn random_code(digits: u32) -> String {
    let low = 10u64.pow(digits - 1);
    let high = 10u64.pow(digits);
    OsRng.gen_range(low..high).to_string()
}
