//! Access token signing and verification
//!
//! Access tokens are HS256 JWTs carrying an [`Identity`] plus the standard
//! temporal claims. They are never persisted: validity is decided purely by
//! signature and claim checks.
//!
//! Refresh tokens are not JWTs. [`generate_refresh_value`] produces 256 bits
//! of randomness with no embedded claims; their validity lives in the refresh
//! token store.

use base64::Engine;
use booktrade_core::{AuthConfig, Identity};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Number of random bytes in a refresh token value
pub const REFRESH_TOKEN_BYTES: usize = 32;

/// JWT claims embedded in an access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Token issuer
    pub iss: String,
    /// Subject - user ID
    pub sub: String,
    /// User's login
    pub login: String,
    /// Issued at (Unix epoch seconds)
    pub iat: u64,
    /// Not valid before (Unix epoch seconds)
    pub nbf: u64,
    /// Expiration (Unix epoch seconds)
    pub exp: u64,
}

/// Access token errors
///
/// An `Expired` token can be renewed through refresh; an `Invalid` one cannot.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error("Token has expired")]
    Expired,

    #[error("Invalid token")]
    Invalid,

    #[error("System time error: {0}")]
    SystemTime(#[from] std::time::SystemTimeError),
}

/// A freshly signed access token
#[derive(Debug, Clone)]
pub struct SignedAccessToken {
    pub token: String,
    /// Absolute expiry (Unix epoch seconds)
    pub expires_at: u64,
}

/// Signs and verifies access tokens
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    access_ttl: Duration,
}

impl TokenCodec {
    /// Build a codec from the auth configuration
    ///
    /// Secrets shorter than the recommended minimum are accepted but logged.
    pub fn new(config: &AuthConfig) -> Self {
        for name in config.weak_secrets() {
            tracing::warn!(
                secret = name,
                min_len = booktrade_core::config::MIN_SECRET_LEN,
                "Signing secret is shorter than recommended"
            );
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&config.issuer]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(config.access_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.access_secret.as_bytes()),
            validation,
            issuer: config.issuer.clone(),
            access_ttl: config.access_ttl(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Sign an access token for `identity`
    ///
    /// `iat` and `nbf` are set to now, `exp` to now plus the access TTL.
    ///
    /// # Arguments
    ///
    /// * `identity` - Principal to embed as `sub` and `login`
    ///
    /// # Returns
    ///
    /// * `Ok(SignedAccessToken)` - Encoded JWT and its absolute expiry
    /// * `Err(TokenError)` - If signing fails or the clock is before the epoch
    ///
    /// # Example
    ///
    /// ```no_run
    /// use booktrade_api::auth::TokenCodec;
    /// use booktrade_core::{AuthConfig, Identity};
    /// use uuid::Uuid;
    ///
    /// let codec = TokenCodec::new(&AuthConfig::default());
    /// let identity = Identity::new(Uuid::new_v4(), "bookworm").unwrap();
    /// let signed = codec.issue_access(&identity).unwrap();
    /// println!("{} expires at {}", signed.token, signed.expires_at);
    /// ```
    pub fn issue_access(&self, identity: &Identity) -> Result<SignedAccessToken, TokenError> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        let expires_at = now.saturating_add(self.access_ttl.as_secs());

        let claims = AccessClaims {
            iss: self.issuer.clone(),
            sub: identity.subject_id.to_string(),
            login: identity.login.clone(),
            iat: now,
            nbf: now,
            exp: expires_at,
        };

        let token = self.sign(&claims)?;
        Ok(SignedAccessToken { token, expires_at })
    }

    /// Verify a signed access token and extract its identity
    ///
    /// # Arguments
    ///
    /// * `token` - The compact JWT, without the `Bearer ` prefix
    ///
    /// # Returns
    ///
    /// * `Ok(Identity)` - Signature, issuer and time window all check out
    /// * `Err(TokenError::Expired)` - Correctly signed but past `exp`
    /// * `Err(TokenError::Invalid)` - Any other failure (signature, algorithm,
    ///   issuer, `nbf`, missing or zero-valued claims)
    ///
    /// # Example
    ///
    /// ```no_run
    /// use booktrade_api::auth::{TokenCodec, TokenError};
    /// use booktrade_core::AuthConfig;
    ///
    /// let codec = TokenCodec::new(&AuthConfig::default());
    /// match codec.verify_access("eyJhbGciOiJIUzI1NiIs...") {
    ///     Ok(identity) => println!("Hello {}", identity.login),
    ///     Err(TokenError::Expired) => println!("Refresh and retry"),
    ///     Err(e) => println!("Rejected: {e}"),
    /// }
    /// ```
    pub fn verify_access(&self, token: &str) -> Result<Identity, TokenError> {
        if token.is_empty() {
            return Err(TokenError::Invalid);
        }

        let token_data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })?;

        let claims = token_data.claims;
        let subject_id = Uuid::parse_str(&claims.sub).map_err(|_| TokenError::Invalid)?;

        Identity::new(subject_id, claims.login).map_err(|_| TokenError::Invalid)
    }

    pub(crate) fn sign(&self, claims: &AccessClaims) -> Result<String, TokenError> {
        let token = encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)?;
        Ok(token)
    }
}

/// Generate an opaque refresh token value
///
/// 32 bytes from a cryptographically secure generator, URL-safe base64
/// without padding.
pub fn generate_refresh_value() -> String {
    let mut rng = rand::thread_rng();
    let token_bytes: [u8; REFRESH_TOKEN_BYTES] = rng.gen();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(token_bytes)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;

    pub(crate) fn test_config() -> AuthConfig {
        AuthConfig {
            access_secret: "test-access-secret-0123456789abcdef".to_string(),
            refresh_secret: "test-refresh-secret-0123456789abcdef".to_string(),
            issuer: "booktrade-test".to_string(),
            access_ttl_secs: 900,
            refresh_ttl_secs: 3600,
            sweep_interval_secs: 3600,
        }
    }

    pub(crate) fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    /// Claims for `identity` valid right now, for tests to bend
    pub(crate) fn claims_for(codec: &TokenCodec, identity: &Identity) -> AccessClaims {
        let now = now_secs();
        AccessClaims {
            iss: codec.issuer().to_string(),
            sub: identity.subject_id.to_string(),
            login: identity.login.clone(),
            iat: now,
            nbf: now,
            exp: now + 900,
        }
    }

    fn identity() -> Identity {
        Identity::new(Uuid::new_v4(), "bookworm").unwrap()
    }

    #[test]
    fn test_issue_and_verify() {
        let codec = TokenCodec::new(&test_config());
        let identity = identity();

        let signed = codec.issue_access(&identity).unwrap();
        let verified = codec.verify_access(&signed.token).unwrap();

        assert_eq!(verified, identity);
        assert!(signed.expires_at >= now_secs() + 899);
    }

    #[test]
    fn test_issued_claims() {
        let codec = TokenCodec::new(&test_config());
        let identity = identity();
        let signed = codec.issue_access(&identity).unwrap();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        let claims = decode::<AccessClaims>(
            &signed.token,
            &DecodingKey::from_secret(b"ignored"),
            &validation,
        )
        .unwrap()
        .claims;

        assert_eq!(claims.iss, "booktrade-test");
        assert_eq!(claims.sub, identity.subject_id.to_string());
        assert_eq!(claims.login, "bookworm");
        assert_eq!(claims.iat, claims.nbf);
        assert_eq!(claims.exp, claims.iat + 900);
    }

    #[test]
    fn test_expired_token() {
        let codec = TokenCodec::new(&test_config());
        let mut claims = claims_for(&codec, &identity());
        claims.iat -= 7200;
        claims.nbf -= 7200;
        claims.exp = now_secs() - 3600;

        let token = codec.sign(&claims).unwrap();
        assert!(matches!(codec.verify_access(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn test_long_expired_token_is_still_expired() {
        let codec = TokenCodec::new(&test_config());
        let mut claims = claims_for(&codec, &identity());
        claims.iat = 1;
        claims.nbf = 1;
        claims.exp = 2;

        let token = codec.sign(&claims).unwrap();
        assert!(matches!(codec.verify_access(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn test_not_yet_valid_token() {
        let codec = TokenCodec::new(&test_config());
        let mut claims = claims_for(&codec, &identity());
        claims.nbf = now_secs() + 600;

        let token = codec.sign(&claims).unwrap();
        assert!(matches!(codec.verify_access(&token), Err(TokenError::Invalid)));
    }

    #[test]
    fn test_wrong_issuer() {
        let codec = TokenCodec::new(&test_config());
        let mut claims = claims_for(&codec, &identity());
        claims.iss = "someone-else".to_string();

        let token = codec.sign(&claims).unwrap();
        assert!(matches!(codec.verify_access(&token), Err(TokenError::Invalid)));
    }

    #[test]
    fn test_nil_subject() {
        let codec = TokenCodec::new(&test_config());
        let mut claims = claims_for(&codec, &identity());
        claims.sub = Uuid::nil().to_string();

        let token = codec.sign(&claims).unwrap();
        assert!(matches!(codec.verify_access(&token), Err(TokenError::Invalid)));
    }

    #[test]
    fn test_malformed_subject() {
        let codec = TokenCodec::new(&test_config());
        let mut claims = claims_for(&codec, &identity());
        claims.sub = "42".to_string();

        let token = codec.sign(&claims).unwrap();
        assert!(matches!(codec.verify_access(&token), Err(TokenError::Invalid)));
    }

    #[test]
    fn test_empty_login() {
        let codec = TokenCodec::new(&test_config());
        let mut claims = claims_for(&codec, &identity());
        claims.login = String::new();

        let token = codec.sign(&claims).unwrap();
        assert!(matches!(codec.verify_access(&token), Err(TokenError::Invalid)));
    }

    #[test]
    fn test_missing_login_claim() {
        #[derive(Serialize)]
        struct WithoutLogin {
            iss: String,
            sub: String,
            iat: u64,
            nbf: u64,
            exp: u64,
        }

        let config = test_config();
        let codec = TokenCodec::new(&config);
        let now = now_secs();
        let claims = WithoutLogin {
            iss: config.issuer.clone(),
            sub: Uuid::new_v4().to_string(),
            iat: now,
            nbf: now,
            exp: now + 600,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(config.access_secret.as_bytes()),
        )
        .unwrap();

        assert!(matches!(codec.verify_access(&token), Err(TokenError::Invalid)));
    }

    #[test]
    fn test_wrong_algorithm() {
        let config = test_config();
        let codec = TokenCodec::new(&config);
        let claims = claims_for(&codec, &identity());
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(config.access_secret.as_bytes()),
        )
        .unwrap();

        assert!(matches!(codec.verify_access(&token), Err(TokenError::Invalid)));
    }

    #[test]
    fn test_wrong_secret() {
        let codec1 = TokenCodec::new(&test_config());
        let codec2 = TokenCodec::new(&AuthConfig {
            access_secret: "a-completely-different-secret-value!!".to_string(),
            ..test_config()
        });

        let signed = codec1.issue_access(&identity()).unwrap();
        assert!(matches!(
            codec2.verify_access(&signed.token),
            Err(TokenError::Invalid)
        ));
    }

    #[test]
    fn test_expired_token_with_bad_signature_is_invalid() {
        let codec = TokenCodec::new(&test_config());
        let other = TokenCodec::new(&AuthConfig {
            access_secret: "another-secret-another-secret-xx".to_string(),
            ..test_config()
        });
        let mut claims = claims_for(&codec, &identity());
        claims.exp = now_secs() - 60;

        let token = other.sign(&claims).unwrap();
        assert!(matches!(codec.verify_access(&token), Err(TokenError::Invalid)));
    }

    #[test]
    fn test_garbage_tokens() {
        let codec = TokenCodec::new(&test_config());
        for token in ["", "invalid.token.here", "a.b", "....", "Bearer x"] {
            assert!(
                matches!(codec.verify_access(token), Err(TokenError::Invalid)),
                "token {token:?} should be invalid"
            );
        }
    }

    #[test]
    fn test_refresh_value_shape() {
        let a = generate_refresh_value();
        let b = generate_refresh_value();

        assert_ne!(a, b);
        // 32 bytes -> 43 base64 characters without padding
        assert_eq!(a.len(), 43);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(&a)
            .unwrap();
        assert_eq!(decoded.len(), REFRESH_TOKEN_BYTES);
    }

    fn flip(token: &str, index: usize) -> String {
        let mut bytes = token.as_bytes().to_vec();
        bytes[index] = if bytes[index] == b'A' { b'B' } else { b'A' };
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_tamper_every_position() {
        let codec = TokenCodec::new(&test_config());
        let signed = codec.issue_access(&identity()).unwrap();

        for index in 0..signed.token.len() {
            let tampered = flip(&signed.token, index);
            assert!(
                matches!(codec.verify_access(&tampered), Err(TokenError::Invalid)),
                "tampering byte {index} was not detected"
            );
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_round_trip(bits in any::<u128>(), login in "[a-zA-Z0-9_.@-]{1,64}") {
            prop_assume!(bits != 0);
            let codec = TokenCodec::new(&test_config());
            let identity = Identity::new(Uuid::from_u128(bits), login).unwrap();

            let signed = codec.issue_access(&identity).unwrap();
            prop_assert_eq!(codec.verify_access(&signed.token).unwrap(), identity);
        }

        #[test]
        fn prop_any_flip_is_rejected(index in 0usize..512) {
            let codec = TokenCodec::new(&test_config());
            let signed = codec
                .issue_access(&Identity::new(Uuid::new_v4(), "prop").unwrap())
                .unwrap();
            let index = index % signed.token.len();

            let tampered = flip(&signed.token, index);
            prop_assert!(matches!(codec.verify_access(&tampered), Err(TokenError::Invalid)));
        }
    }
}
