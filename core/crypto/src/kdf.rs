//! Password hashing using Argon2id.
//!
//! Argon2id is a memory-hard password hashing function that provides
//! resistance to both GPU and time-memory trade-off attacks. Hashes are
//! stored in a self-describing string so verification never needs the
//! parameters from anywhere else:
//!
//! ```text
//! $argon2id$v=19$m=65536,t=3,p=2$<base64 salt>$<base64 hash>
//! ```

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::keys::{Salt, KEY_LENGTH};
use strongroom_common::{Error, Result};

const ALGORITHM_ID: &str = "argon2id";

/// Parameters for Argon2id password hashing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Create parameters suitable for interactive use.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// Create parameters suitable for sensitive data.
    ///
    /// Higher security parameters that may take several seconds.
    pub fn sensitive() -> Self {
        Self {
            memory_cost: 262144, // 256 MiB
            time_cost: 4,
            parallelism: 4,
        }
    }

    /// Create moderate parameters for constrained hosts.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }

    /// Cheapest parameters Argon2 accepts. Only for tests.
    pub fn insecure_fast() -> Self {
        Self {
            memory_cost: 8,
            time_cost: 1,
            parallelism: 1,
        }
    }

    fn to_argon2(&self, output_len: usize) -> Result<Params> {
        Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(output_len),
        )
        .map_err(|e| Error::Crypto(format!("Invalid KDF parameters: {}", e)))
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_cost: 65536,
            time_cost: 3,
            parallelism: 2,
        }
    }
}

fn derive(password: &[u8], salt: &[u8], params: Params) -> Result<Zeroizing<Vec<u8>>> {
    let mut out = Zeroizing::new(vec![0u8; params.output_len().unwrap_or(KEY_LENGTH)]);
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(password, salt, &mut out)
        .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;
    Ok(out)
}

/// Hash a password into a self-describing encoded string.
///
/// # Postconditions
/// - A fresh random salt is used on every call
/// - The encoded string carries algorithm, version, parameters, salt and hash
///
/// # Errors
/// - Returns error if the parameters are rejected by Argon2
pub fn hash_password(password: &str, params: &KdfParams) -> Result<String> {
    let salt = Salt::generate();
    let hash = derive(password.as_bytes(), salt.as_bytes(), params.to_argon2(KEY_LENGTH)?)?;

    Ok(format!(
        "${}$v={}$m={},t={},p={}${}${}",
        ALGORITHM_ID,
        Version::V0x13 as u32,
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        STANDARD_NO_PAD.encode(salt.as_bytes()),
        STANDARD_NO_PAD.encode(&hash[..]),
    ))
}

struct EncodedHash {
    params: KdfParams,
    salt: Vec<u8>,
    hash: Vec<u8>,
}

fn parse_params(field: &str) -> Option<KdfParams> {
    let mut memory_cost = None;
    let mut time_cost = None;
    let mut parallelism = None;

    for pair in field.split(',') {
        let (key, value) = pair.split_once('=')?;
        let value: u32 = value.parse().ok()?;
        match key {
            "m" => memory_cost = Some(value),
            "t" => time_cost = Some(value),
            "p" => parallelism = Some(value),
            _ => return None,
        }
    }

    Some(KdfParams {
        memory_cost: memory_cost?,
        time_cost: time_cost?,
        parallelism: parallelism?,
    })
}

fn parse_encoded(encoded: &str) -> Option<EncodedHash> {
    let fields: Vec<&str> = encoded.split('$').collect();
    let [empty, algorithm, version, params, salt, hash] = fields.as_slice() else {
        return None;
    };

    if !empty.is_empty() || *algorithm != ALGORITHM_ID {
        return None;
    }
    if *version != format!("v={}", Version::V0x13 as u32) {
        return None;
    }

    let hash = STANDARD_NO_PAD.decode(hash).ok()?;
    if hash.is_empty() {
        return None;
    }

    Some(EncodedHash {
        params: parse_params(params)?,
        salt: STANDARD_NO_PAD.decode(salt).ok()?,
        hash,
    })
}

/// Verify a password against an encoded hash.
///
/// Re-derives with the parameters and salt embedded in `encoded` and
/// compares in constant time. Anything malformed verifies as `false`.
pub fn verify_password(password: &str, encoded: &str) -> bool {
    let Some(parsed) = parse_encoded(encoded) else {
        return false;
    };
    let Ok(params) = parsed.params.to_argon2(parsed.hash.len()) else {
        return false;
    };
    let Ok(candidate) = derive(password.as_bytes(), &parsed.salt, params) else {
        return false;
    };

    candidate.as_slice().ct_eq(parsed.hash.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> KdfParams {
        KdfParams::insecure_fast()
    }

    #[test]
    fn test_hash_is_not_password() {
        let encoded = hash_password("password123", &fast()).unwrap();
        assert_ne!(encoded, "password123");
        assert!(!encoded.contains("password123"));
    }

    #[test]
    fn test_encoded_format() {
        let encoded = hash_password("password123", &fast()).unwrap();
        let fields: Vec<&str> = encoded.split('$').collect();

        assert_eq!(fields.len(), 6);
        assert_eq!(fields[1], "argon2id");
        assert_eq!(fields[2], "v=19");
        assert_eq!(fields[3], "m=8,t=1,p=1");
        assert_eq!(STANDARD_NO_PAD.decode(fields[4]).unwrap().len(), 16);
        assert_eq!(STANDARD_NO_PAD.decode(fields[5]).unwrap().len(), KEY_LENGTH);
    }

    #[test]
    fn test_verify_password() {
        let encoded = hash_password("secure-password", &fast()).unwrap();

        assert!(verify_password("secure-password", &encoded));
        assert!(!verify_password("wrong-password", &encoded));
        assert!(!verify_password("", &encoded));
    }

    #[test]
    fn test_salt_differs_between_hashes() {
        let a = hash_password("same", &fast()).unwrap();
        let b = hash_password("same", &fast()).unwrap();

        assert_ne!(a, b);
        assert!(verify_password("same", &a));
        assert!(verify_password("same", &b));
    }

    #[test]
    fn test_verify_uses_embedded_params() {
        let params = KdfParams {
            memory_cost: 16,
            time_cost: 2,
            parallelism: 1,
        };
        let encoded = hash_password("password123", &params).unwrap();

        // No parameters are passed in; they come from the string.
        assert!(verify_password("password123", &encoded));
    }

    #[test]
    fn test_malformed_hashes_verify_false() {
        let encoded = hash_password("password123", &fast()).unwrap();
        let wrong_version = encoded.replace("v=19", "v=16");
        let wrong_algorithm = encoded.replace("argon2id", "argon2i");
        let truncated = encoded.rsplit_once('$').unwrap().0.to_string();

        for bad in [
            "",
            "plaintext",
            "$argon2id$v=19$m=8,t=1,p=1$AAAA",
            "$argon2id$v=19$m=x,t=1,p=1$c2FsdHNhbHRzYWx0$aGFzaA",
            "$argon2id$v=19$m=8,t=1,p=1$!!!$aGFzaA",
            wrong_version.as_str(),
            wrong_algorithm.as_str(),
            truncated.as_str(),
        ] {
            assert!(!verify_password("password123", bad), "{bad}");
        }
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = KdfParams {
            memory_cost: 1,
            time_cost: 0,
            parallelism: 0,
        };
        assert!(matches!(
            hash_password("password123", &params),
            Err(Error::Crypto(_))
        ));
    }
}
