//! Caller Authentication
//!
//! Binds a connection to a root-chain caller. Tokens come from an external
//! wallet-login service and name the caller's address in `sub`; the server
//! only verifies them.
//!
//! Keys and validation rules are built once in [`Authenticator::new`], so a
//! bad PEM is reported at startup instead of on the first login.

use alloy_primitives::Address;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Where tokens are verified against.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Required `iss`, if any.
    pub issuer: Option<String>,
    /// Required `aud`, if any.
    pub audience: Option<String>,
    /// RS256 public key (PEM). Takes precedence over `secret`.
    pub public_key_pem: Option<String>,
    /// HS256 shared secret.
    pub secret: Option<String>,
    /// Accept expired tokens. Local testing only.
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Read `AUTH_*` environment variables.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            issuer: var("AUTH_ISSUER"),
            audience: var("AUTH_AUDIENCE"),
            public_key_pem: var("AUTH_PUBLIC_KEY_PEM"),
            secret: var("AUTH_SECRET"),
            skip_expiry: matches!(var("AUTH_SKIP_EXPIRY").as_deref(), Some("true" | "1")),
        }
    }

    /// Whether a verification key is present. Without one the server runs
    /// in development mode.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }
}

/// Claims read from a caller token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerClaims {
    /// Caller address, hex.
    pub sub: String,
    /// Expiry (Unix seconds), 0 when absent.
    #[serde(default)]
    pub exp: u64,
    /// Issued at (Unix seconds).
    #[serde(default)]
    pub iat: u64,
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience, string or list.
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
}

impl CallerClaims {
    /// Caller address named by `sub`.
    pub fn caller(&self) -> Result<Address, AuthError> {
        if self.sub.is_empty() {
            return Err(AuthError::MissingClaim("sub".into()));
        }
        self.sub
            .parse::<Address>()
            .map_err(|_| AuthError::InvalidSubject(self.sub.clone()))
    }
}

/// Why a token was refused.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No verification key configured.
    #[error("authentication not configured")]
    NotConfigured,
    /// The configured key could not be loaded.
    #[error("bad verification key: {0}")]
    BadKey(String),
    /// Not a well-formed JWT.
    #[error("malformed token")]
    Malformed,
    /// Signature does not verify.
    #[error("invalid signature")]
    InvalidSignature,
    /// Past its `exp`.
    #[error("token expired")]
    Expired,
    /// `iss` mismatch.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// `aud` mismatch.
    #[error("invalid audience")]
    InvalidAudience,
    /// A claim the caller needs is absent.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// `sub` is not an address.
    #[error("subject is not an address: {0}")]
    InvalidSubject(String),
    /// Anything else the JWT library rejects.
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
            ErrorKind::InvalidAudience => AuthError::InvalidAudience,
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                AuthError::Malformed
            }
            _ => AuthError::Decode(err.to_string()),
        }
    }
}

/// Verifies caller tokens against one key.
pub struct Authenticator {
    key: DecodingKey,
    validation: Validation,
    skip_expiry: bool,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("algorithms", &self.validation.algorithms)
            .field("skip_expiry", &self.skip_expiry)
            .finish()
    }
}

impl Authenticator {
    /// Load the key and validation rules from `config`.
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let (key, algorithm) = match (&config.public_key_pem, &config.secret) {
            (Some(pem), _) => (
                DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| AuthError::BadKey(e.to_string()))?,
                Algorithm::RS256,
            ),
            (None, Some(secret)) => (DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256),
            (None, None) => return Err(AuthError::NotConfigured),
        };

        let mut validation = Validation::new(algorithm);
        // `sub` is checked by `CallerClaims::caller`; `exp` is optional.
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = !config.skip_expiry;
        match &config.issuer {
            Some(issuer) => validation.set_issuer(&[issuer]),
            None => validation.iss = None,
        }
        match &config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Ok(Self {
            key,
            validation,
            skip_expiry: config.skip_expiry,
        })
    }

    /// Verify `token` and return its claims.
    pub fn claims(&self, token: &str) -> Result<CallerClaims, AuthError> {
        let claims = decode::<CallerClaims>(token, &self.key, &self.validation)?.claims;

        // The library allows some leeway on `exp`.
        if !self.skip_expiry && claims.exp > 0 {
            let now = chrono::Utc::now().timestamp().max(0) as u64;
            if now > claims.exp {
                return Err(AuthError::Expired);
            }
        }

        Ok(claims)
    }

    /// Verify `token` and return the caller it names.
    pub fn caller(&self, token: &str) -> Result<Address, AuthError> {
        self.claims(token)?.caller()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "root-chain-test-secret-0123456789";
    const CALLER: &str = "0x627306090abaB3A6e1400e9345bC60c78a8BEf57";

    fn sign(claims: &CallerClaims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn authenticate(token: &str, config: &AuthConfig) -> Result<Address, AuthError> {
        Authenticator::new(config)?.caller(token)
    }

    fn claims() -> CallerClaims {
        let now = chrono::Utc::now().timestamp() as u64;
        CallerClaims {
            sub: CALLER.into(),
            exp: now + 3600,
            iat: now,
            iss: Some("wallet-login".into()),
            aud: Some(serde_json::json!("root-chain")),
        }
    }

    fn hs256() -> AuthConfig {
        AuthConfig {
            secret: Some(SECRET.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_token_names_caller() {
        let token = sign(&claims(), SECRET);
        let auth = Authenticator::new(&hs256()).unwrap();

        assert_eq!(auth.claims(&token).unwrap().sub, CALLER);
        assert_eq!(auth.caller(&token).unwrap(), CALLER.parse::<Address>().unwrap());
        assert_eq!(authenticate(&token, &hs256()).unwrap(), CALLER.parse::<Address>().unwrap());
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut c = claims();
        c.exp = 1;
        let token = sign(&c, SECRET);

        assert!(matches!(authenticate(&token, &hs256()), Err(AuthError::Expired)));
    }

    #[test]
    fn test_skip_expiry_accepts_old_token() {
        let mut c = claims();
        c.exp = 1;
        let token = sign(&c, SECRET);
        let config = AuthConfig { skip_expiry: true, ..hs256() };

        assert!(authenticate(&token, &config).is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = sign(&claims(), "some-other-secret-0123456789abcd");
        assert!(matches!(authenticate(&token, &hs256()), Err(AuthError::InvalidSignature)));
    }

    #[test]
    fn test_issuer_and_audience_checked() {
        let token = sign(&claims(), SECRET);

        let config = AuthConfig { issuer: Some("someone-else".into()), ..hs256() };
        assert!(matches!(authenticate(&token, &config), Err(AuthError::InvalidIssuer)));

        let config = AuthConfig { audience: Some("another-chain".into()), ..hs256() };
        assert!(matches!(authenticate(&token, &config), Err(AuthError::InvalidAudience)));

        let config = AuthConfig {
            issuer: Some("wallet-login".into()),
            audience: Some("root-chain".into()),
            ..hs256()
        };
        assert!(authenticate(&token, &config).is_ok());
    }

    #[test]
    fn test_subject_must_be_address() {
        let mut c = claims();
        c.sub = "firebase-user-42".into();
        let token = sign(&c, SECRET);
        let auth = Authenticator::new(&hs256()).unwrap();

        // The token itself verifies; only the caller lookup fails.
        assert!(auth.claims(&token).is_ok());
        assert!(matches!(auth.caller(&token), Err(AuthError::InvalidSubject(_))));

        c.sub = String::new();
        let token = sign(&c, SECRET);
        assert!(matches!(auth.caller(&token), Err(AuthError::MissingClaim(_))));
    }

    #[test]
    fn test_lowercase_subject_parses() {
        let c = CallerClaims { sub: CALLER.to_lowercase(), ..claims() };
        assert_eq!(c.caller().unwrap(), CALLER.parse::<Address>().unwrap());
    }

    #[test]
    fn test_garbage_token_is_malformed() {
        let auth = Authenticator::new(&hs256()).unwrap();
        assert!(matches!(auth.caller("not-a-jwt"), Err(AuthError::Malformed)));
    }

    #[test]
    fn test_unconfigured_and_bad_key() {
        assert!(!AuthConfig::default().is_configured());
        assert!(matches!(Authenticator::new(&AuthConfig::default()), Err(AuthError::NotConfigured)));

        let config = AuthConfig {
            public_key_pem: Some("-----BEGIN PUBLIC KEY-----\nnope\n-----END PUBLIC KEY-----".into()),
            ..Default::default()
        };
        assert!(matches!(Authenticator::new(&config), Err(AuthError::BadKey(_))));
    }
}
