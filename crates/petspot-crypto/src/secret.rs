use rand::Rng;
use rand::distr::Alphanumeric;

/// Length of a generated management password, in characters.
pub const MANAGEMENT_PASSWORD_LEN: usize = 16;

/// Generate a fresh management password: 16 characters drawn uniformly
/// from `[A-Za-z0-9]` (about 95 bits) using the thread-local CSPRNG.
/// It is independent of any announcement data.
pub fn generate_management_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(MANAGEMENT_PASSWORD_LEN)
        .map(char::from)
        .collect()
}
