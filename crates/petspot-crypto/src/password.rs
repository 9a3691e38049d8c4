use anyhow::{Result, anyhow};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use subtle::ConstantTimeEq;

const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

/// Well-formed hash that matches no password anyone will type. Verified
/// against when a login names an unknown account, so the work done is the
/// same as for a wrong password.
pub const DUMMY_PASSWORD_HASH: &str = "9f1c2e7a4b8d6035c1e0f2a3b4c5d6e7:\
    3a7c1e9b5d2f4a6c8e0b1d3f5a7c9e1b2d4f6a8c0e2b4d6f8a1c3e5b7d9f0a2c";

/// Argon2id hasher producing `salt:hash` strings.
#[derive(Clone, Default)]
pub struct PasswordHasher {
    params: Params,
}

impl PasswordHasher {
    pub fn new(params: Params) -> Self {
        Self { params }
    }

    /// Build a hasher from raw Argon2 cost parameters (memory in KiB).
    pub fn with_cost(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self> {
        let params = Params::new(memory_kib, iterations, parallelism, Some(HASH_LEN))
            .map_err(|e| anyhow!("Invalid Argon2 parameters: {}", e))?;
        Ok(Self::new(params))
    }

    pub fn hash(&self, password: &str) -> Result<String> {
        let mut salt = [0u8; SALT_LEN];
        rand::rng().fill_bytes(&mut salt);

        let digest = self.derive(password, &salt)?;
        Ok(format!("{}:{}", hex::encode(salt), hex::encode(digest)))
    }

    /// Check `password` against a stored `salt:hash`.
    ///
    /// A malformed stored value never matches, but still costs one full
    /// derivation.
    pub fn verify(&self, password: &str, stored: &str) -> bool {
        let (salt, expected, well_formed) = match parse_stored(stored) {
            Some((salt, expected)) => (salt, expected, true),
            None => {
                let (salt, expected) =
                    parse_stored(DUMMY_PASSWORD_HASH).unwrap_or_default();
                (salt, expected, false)
            }
        };

        let Ok(actual) = self.derive(password, &salt) else {
            return false;
        };

        let matches: bool = actual.as_slice().ct_eq(expected.as_slice()).into();
        matches && well_formed
    }

    fn derive(&self, password: &str, salt: &[u8]) -> Result<[u8; HASH_LEN]> {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone());
        let mut out = [0u8; HASH_LEN];
        argon2
            .hash_password_into(password.as_bytes(), salt, &mut out)
            .map_err(|e| anyhow!("Password hashing failed: {}", e))?;
        Ok(out)
    }
}

fn parse_stored(stored: &str) -> Option<(Vec<u8>, Vec<u8>)> {
    let (salt, hash) = stored.split_once(':')?;
    let salt = hex::decode(salt).ok()?;
    let hash = hex::decode(hash).ok()?;
    if salt.len() != SALT_LEN || hash.len() != HASH_LEN {
        return None;
    }
    Some((salt, hash))
}
