//! Access and refresh token handling.
//!
//! Access tokens are compact HS256 JWTs: `header.claims.signature`, each
//! part base64url without padding. Refresh tokens are opaque random strings.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use strongroom_common::{Error, Result, SensitiveBytes, User, UserId};
use strongroom_crypto::random_bytes;

type HmacSha256 = Hmac<Sha256>;

/// Issuer claim stamped into every access token.
pub const ISSUER: &str = "strongroom";

/// Minimum accepted signing secret length in bytes.
pub const MIN_SECRET_LENGTH: usize = 32;

/// Random bytes behind each refresh token.
pub const REFRESH_TOKEN_BYTES: usize = 32;

const ALGORITHM: &str = "HS256";

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub user_id: UserId,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
    pub iss: String,
    pub sub: String,
}

/// Signs and verifies access tokens with a shared HMAC secret.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    secret: SensitiveBytes,
    ttl: Duration,
}

impl TokenIssuer {
    /// Create an issuer.
    ///
    /// # Errors
    /// - `Validation` if the secret is shorter than [`MIN_SECRET_LENGTH`] or
    ///   the TTL is not positive
    pub fn new(secret: &[u8], ttl: Duration) -> Result<Self> {
        if secret.len() < MIN_SECRET_LENGTH {
            return Err(Error::Validation(format!(
                "Token secret must be at least {} bytes",
                MIN_SECRET_LENGTH
            )));
        }
        if ttl <= Duration::zero() {
            return Err(Error::Validation(
                "Access token TTL must be positive".to_string(),
            ));
        }
        Ok(Self {
            secret: SensitiveBytes::new(secret.to_vec()),
            ttl,
        })
    }

    /// Lifetime of issued tokens.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| Error::Crypto(format!("Invalid signing key: {}", e)))
    }

    /// Issue a token for `user` valid from `now` until `now + ttl`.
    ///
    /// Returns the token and its expiry.
    pub fn issue(&self, user: &User, now: DateTime<Utc>) -> Result<(String, DateTime<Utc>)> {
        let expires_at = now + self.ttl;
        let claims = AccessClaims {
            user_id: user.id,
            email: user.email.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            nbf: now.timestamp(),
            iss: ISSUER.to_string(),
            sub: user.id.to_string(),
        };
        let header = Header {
            alg: ALGORITHM.to_string(),
            typ: "JWT".to_string(),
        };

        let header_json = serde_json::to_vec(&header)
            .map_err(|e| Error::Crypto(format!("Failed to encode token header: {}", e)))?;
        let claims_json = serde_json::to_vec(&claims)
            .map_err(|e| Error::Crypto(format!("Failed to encode token claims: {}", e)))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header_json),
            URL_SAFE_NO_PAD.encode(claims_json)
        );
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok((format!("{}.{}", signing_input, signature), expires_at))
    }

    /// Verify signature, algorithm, issuer and validity window.
    ///
    /// # Errors
    /// - `Auth` for any malformed, forged, expired or not-yet-valid token
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims> {
        let invalid = || Error::Auth("invalid token".to_string());

        let mut parts = token.split('.');
        let (header_b64, claims_b64, signature_b64) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(h), Some(c), Some(s), None) => (h, c, s),
                _ => return Err(invalid()),
            };

        let header_json = URL_SAFE_NO_PAD.decode(header_b64).map_err(|_| invalid())?;
        let header: Header = serde_json::from_slice(&header_json).map_err(|_| invalid())?;
        if header.alg != ALGORITHM {
            return Err(Error::Auth(format!(
                "unexpected signing method: {}",
                header.alg
            )));
        }

        let signature = URL_SAFE_NO_PAD.decode(signature_b64).map_err(|_| invalid())?;
        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature).map_err(|_| invalid())?;

        let claims_json = URL_SAFE_NO_PAD.decode(claims_b64).map_err(|_| invalid())?;
        let claims: AccessClaims = serde_json::from_slice(&claims_json).map_err(|_| invalid())?;

        if claims.iss != ISSUER {
            return Err(invalid());
        }
        let now = now.timestamp();
        if claims.exp <= now {
            return Err(Error::Auth("token expired".to_string()));
        }
        if claims.nbf > now {
            return Err(Error::Auth("token not yet valid".to_string()));
        }

        Ok(claims)
    }
}

/// Generate a fresh opaque refresh token.
pub fn generate_refresh_token() -> String {
    URL_SAFE_NO_PAD.encode(random_bytes(REFRESH_TOKEN_BYTES))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(&[7u8; 32], Duration::hours(24)).unwrap()
    }

    #[test]
    fn test_issue_and_verify() {
        let issuer = issuer();
        let user = User::new("a@x.com", "hash");
        let now = Utc::now();

        let (token, expires_at) = issuer.issue(&user, now).unwrap();
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(expires_at, now + Duration::hours(24));

        let claims = issuer.verify(&token, now).unwrap();
        assert_eq!(claims.user_id, user.id);
        assert_eq!(claims.email, "a@x.com");
        assert_eq!(claims.iss, ISSUER);
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.exp - claims.iat, 24 * 3600);
    }

    #[test]
    fn test_short_secret_rejected() {
        let err = TokenIssuer::new(b"short", Duration::hours(1)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_expired_token() {
        let issuer = issuer();
        let user = User::new("a@x.com", "hash");
        let now = Utc::now();
        let (token, _) = issuer.issue(&user, now).unwrap();

        let err = issuer.verify(&token, now + Duration::hours(25)).unwrap_err();
        assert!(matches!(err, Error::Auth(ref m) if m == "token expired"));
    }

    #[test]
    fn test_not_yet_valid_token() {
        let issuer = issuer();
        let user = User::new("a@x.com", "hash");
        let now = Utc::now();
        let (token, _) = issuer.issue(&user, now + Duration::hours(1)).unwrap();

        let err = issuer.verify(&token, now).unwrap_err();
        assert!(matches!(err, Error::Auth(ref m) if m == "token not yet valid"));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let user = User::new("a@x.com", "hash");
        let now = Utc::now();
        let (token, _) = issuer().issue(&user, now).unwrap();

        let other = TokenIssuer::new(&[8u8; 32], Duration::hours(24)).unwrap();
        assert!(matches!(other.verify(&token, now), Err(Error::Auth(_))));
    }

    #[test]
    fn test_tampered_claims_rejected() {
        let issuer = issuer();
        let victim = User::new("victim@x.com", "hash");
        let attacker = User::new("attacker@x.com", "hash");
        let now = Utc::now();

        let (victim_token, _) = issuer.issue(&victim, now).unwrap();
        let (attacker_token, _) = issuer.issue(&attacker, now).unwrap();
        let victim_parts: Vec<&str> = victim_token.split('.').collect();
        let attacker_parts: Vec<&str> = attacker_token.split('.').collect();

        let forged = format!(
            "{}.{}.{}",
            attacker_parts[0], victim_parts[1], attacker_parts[2]
        );
        assert!(matches!(issuer.verify(&forged, now), Err(Error::Auth(_))));
    }

    #[test]
    fn test_other_algorithm_rejected() {
        let issuer = issuer();
        let user = User::new("a@x.com", "hash");
        let now = Utc::now();
        let (token, _) = issuer.issue(&user, now).unwrap();
        let parts: Vec<&str> = token.split('.').collect();

        let none_header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let forged = format!("{}.{}.", none_header, parts[1]);
        let err = issuer.verify(&forged, now).unwrap_err();
        assert!(matches!(err, Error::Auth(ref m) if m.contains("signing method")));
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        let issuer = issuer();
        let now = Utc::now();
        for token in ["", "abc", "a.b", "a.b.c.d", "!!.??.**"] {
            assert!(matches!(issuer.verify(token, now), Err(Error::Auth(_))));
        }
    }

    #[test]
    fn test_refresh_tokens_are_unique_and_url_safe() {
        let a = generate_refresh_token();
        let b = generate_refresh_token();
        assert_ne!(a, b);
        assert_eq!(URL_SAFE_NO_PAD.decode(&a).unwrap().len(), REFRESH_TOKEN_BYTES);
        assert!(!a.contains('=') && !a.contains('+') && !a.contains('/'));
    }
}
