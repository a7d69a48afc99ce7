//! Password verifiers and the password-sealed recovery secret.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{GuardError, GuardResult};

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;
const SALT_SIZE: usize = 16;

/// Recovery secret alphabet: no 0/O, 1/I/L
const SECRET_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const SECRET_GROUPS: usize = 4;
const SECRET_GROUP_LEN: usize = 5;

/// Hash a password or secret using Argon2id, PHC string format
pub fn hash_secret(secret: &str) -> GuardResult<String> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| GuardError::Platform(format!("failed to hash password: {e}")))
}

/// Verify against a PHC hash produced by [`hash_secret`]
pub fn verify_secret(secret: &str, hash: &str) -> GuardResult<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| GuardError::StorageCorruption(format!("unreadable password hash: {e}")))?;

    Ok(Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok())
}

/// Recovery secret encrypted under a key derived from the parent password
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSecret {
    /// hex, key-derivation salt
    pub salt: String,
    /// hex
    pub nonce: String,
    /// hex, includes the Poly1305 tag
    pub ciphertext: String,
}

fn derive_key(password: &str, salt: &[u8]) -> GuardResult<Zeroizing<[u8; KEY_SIZE]>> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut key[..])
        .map_err(|e| GuardError::Platform(format!("key derivation failed: {e}")))?;
    Ok(key)
}

pub fn seal(secret: &str, password: &str) -> GuardResult<SealedSecret> {
    let mut salt = [0u8; SALT_SIZE];
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(password, &salt)?;
    let cipher = ChaCha20Poly1305::new_from_slice(&key[..])
        .map_err(|e| GuardError::Platform(format!("failed to create cipher: {e}")))?;

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), secret.as_bytes())
        .map_err(|e| GuardError::Platform(format!("encryption failed: {e}")))?;

    Ok(SealedSecret {
        salt: hex::encode(salt),
        nonce: hex::encode(nonce_bytes),
        ciphertext: hex::encode(ciphertext),
    })
}

/// Decrypt with `password`; a wrong password is `IncorrectPassword`
pub fn unseal(sealed: &SealedSecret, password: &str) -> GuardResult<Zeroizing<String>> {
    let corrupt = |what: &str| GuardError::StorageCorruption(format!("sealed secret has invalid {what}"));

    let salt = hex::decode(&sealed.salt).map_err(|_| corrupt("salt"))?;
    let nonce_bytes = hex::decode(&sealed.nonce).map_err(|_| corrupt("nonce"))?;
    let ciphertext = hex::decode(&sealed.ciphertext).map_err(|_| corrupt("ciphertext"))?;
    if nonce_bytes.len() != NONCE_SIZE {
        return Err(corrupt("nonce"));
    }

    let key = derive_key(password, &salt)?;
    let cipher = ChaCha20Poly1305::new_from_slice(&key[..])
        .map_err(|e| GuardError::Platform(format!("failed to create cipher: {e}")))?;

    let plaintext = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
            .map_err(|_| GuardError::IncorrectPassword)?,
    );

    String::from_utf8(plaintext.to_vec())
        .map(Zeroizing::new)
        .map_err(|_| corrupt("plaintext"))
}

/// Fresh recovery secret, e.g. `K7MQ2-XRT9P-4HWNA-ZC3VE`
pub fn generate_recovery_secret() -> Zeroizing<String> {
    let mut rng = rand::rngs::OsRng;
    let groups: Vec<String> = (0..SECRET_GROUPS)
        .map(|_| {
            (0..SECRET_GROUP_LEN)
                .map(|_| SECRET_ALPHABET[rng.gen_range(0..SECRET_ALPHABET.len())] as char)
                .collect()
        })
        .collect();
    Zeroizing::new(groups.join("-"))
}

/// Canonical form of user-typed recovery input: uppercase, regrouped
pub fn normalize_recovery_secret(input: &str) -> Zeroizing<String> {
    let chars: Vec<char> = input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    let groups: Vec<String> = chars
        .chunks(SECRET_GROUP_LEN)
        .map(|chunk| chunk.iter().collect())
        .collect();
    Zeroizing::new(groups.join("-"))
}
