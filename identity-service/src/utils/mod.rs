pub mod hash;
pub mod password;

pub use hash::sha256_hex;
pub use password::{Password, PasswordHashString, SecretHasher};
