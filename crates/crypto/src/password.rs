//! Password policy, password-derived keys and challenge hashing.
//!
//! # Key derivation
//!
//! Password keys are derived with Argon2id using the fixed parameters in
//! [`KdfParams::PRODUCTION`]. Derivation is deterministic for a given
//! `(password, salt)` pair, which is what lets a user log in on a new device
//! with nothing but their password and the salt recorded on the ledger.
//! Changing these parameters changes every user's password key.

use argon2::{Algorithm, Argon2, Params, Version};
use tracing::debug;
use unicode_normalization::UnicodeNormalization;
use zeroize::Zeroizing;

use crate::error::{KeyManagerError, KeyManagerResult};
use crate::keys::{sha256_hex, PrivateKey, Salt};

/// Minimum password length, counted in characters after NFKC normalization.
pub const MIN_PASSWORD_LENGTH: usize = 12;

/// Passwords containing any of these (case-insensitive) are rejected.
pub const COMMON_PASSWORDS: [&str; 100] = [
    "123456", "password", "12345678", "qwerty", "123456789", "12345", "1234567", "111111",
    "dragon", "123123", "baseball", "abc123", "football", "monkey", "letmein", "696969",
    "shadow", "master", "666666", "qwertyuiop", "123321", "mustang", "1234567890", "michael",
    "654321", "superman", "1qaz2wsx", "7777777", "121212", "000000", "qazwsx", "123qwe",
    "killer", "trustno1", "jordan", "jennifer", "zxcvbnm", "asdfgh", "hunter", "buster",
    "soccer", "harley", "batman", "andrew", "tigger", "sunshine", "iloveyou", "charlie",
    "robert", "thomas", "hockey", "ranger", "daniel", "starwars", "klaster", "112233",
    "george", "computer", "michelle", "jessica", "pepper", "zxcvbn", "555555", "11111111",
    "131313", "freedom", "777777", "maggie", "159753", "aaaaaa", "ginger", "princess",
    "joshua", "cheese", "amanda", "summer", "ashley", "nicole", "chelsea", "biteme",
    "matthew", "access", "yankees", "987654321", "dallas", "austin", "thunder", "taylor",
    "matrix", "minecraft", "welcome", "admin", "login", "qwerty123", "solo", "passw0rd",
    "whatever", "donald", "flower", "loveme",
];

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub time_cost: u32,
    /// Memory in KiB.
    pub memory_kib: u32,
    pub parallelism: u32,
    pub output_len: usize,
}

impl KdfParams {
    /// The audited production parameters: 40 passes over 64 MiB, one lane,
    /// 32-byte output.
    pub const PRODUCTION: KdfParams = KdfParams {
        time_cost: 40,
        memory_kib: 64 * 1024,
        parallelism: 1,
        output_len: 32,
    };

    /// Cheap parameters for test suites. Never use these for real accounts.
    pub const INSECURE_TESTING: KdfParams = KdfParams {
        time_cost: 1,
        memory_kib: 8,
        parallelism: 1,
        output_len: 32,
    };
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::PRODUCTION
    }
}

/// NFKC normalization applied to every password and username.
pub fn normalize(input: &str) -> String {
    input.nfkc().collect()
}

/// Checks the password rules. Format is checked before the common list.
pub fn validate_password(password: &str) -> KeyManagerResult<()> {
    let password = Zeroizing::new(normalize(password));

    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(KeyManagerError::PasswordFormatInvalid(format!(
            "must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        return Err(KeyManagerError::PasswordFormatInvalid(
            "must contain a lowercase letter".into(),
        ));
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        return Err(KeyManagerError::PasswordFormatInvalid(
            "must contain an uppercase letter".into(),
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(KeyManagerError::PasswordFormatInvalid(
            "must contain a digit".into(),
        ));
    }

    let lowered = Zeroizing::new(password.to_lowercase());
    if COMMON_PASSWORDS
        .iter()
        .any(|common| lowered.contains(common))
    {
        return Err(KeyManagerError::PasswordTooCommon);
    }

    Ok(())
}

/// Derives the password key. Blocking and deliberately slow; async callers
/// should run it on a blocking thread.
pub fn derive_private_key(
    password: &str,
    salt: &Salt,
    params: &KdfParams,
) -> KeyManagerResult<PrivateKey> {
    let argon_params = Params::new(
        params.memory_kib,
        params.time_cost,
        params.parallelism,
        Some(params.output_len),
    )
    .map_err(|e| KeyManagerError::Kdf(format!("invalid Argon2 params: {}", e)))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let password = Zeroizing::new(normalize(password));
    let mut output = Zeroizing::new(vec![0u8; params.output_len]);
    argon2
        .hash_password_into(password.as_bytes(), salt.as_bytes(), &mut output)
        .map_err(|e| KeyManagerError::Kdf(e.to_string()))?;

    debug!(
        time_cost = params.time_cost,
        memory_kib = params.memory_kib,
        "derived password key"
    );
    PrivateKey::from_bytes(&output)
}

/// Hash stored alongside a challenge-protected key: hex SHA-256 of the
/// challenge immediately followed by the hex salt.
pub fn hash_challenge(challenge: &str, salt: &Salt) -> String {
    let mut input = Zeroizing::new(String::with_capacity(challenge.len() + 64));
    input.push_str(challenge);
    input.push_str(&salt.to_hex());
    sha256_hex(input.as_bytes())
}

/// Compares two strings without an early exit on the first difference.
pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
