/// PetSpot Crypto Library
///
/// Password hashing for user accounts and announcement management
/// passwords, plus generation of the management passwords themselves.
///
/// Stored hashes use the `salt:hash` form (both hex). The hash is the raw
/// Argon2id output, compared in constant time.

pub mod password;
pub mod secret;

pub use password::{DUMMY_PASSWORD_HASH, PasswordHasher};
pub use secret::generate_management_password;
