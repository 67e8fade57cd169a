//! JWT session token signing and validation.
//!
//! ## Supported Algorithms
//!
//! - **RS256**: RSA with SHA-256 (default, widely compatible)
//! - **RS384**: RSA with SHA-384
//! - **ES384**: ECDSA with P-384 curve (smaller keys)

use std::fmt;
use std::str::FromStr;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation, decode, encode,
};
use p384::SecretKey as EcSecretKey;
use p384::ecdsa::{SigningKey as EcSigningKey, VerifyingKey as EcVerifyingKey};
use p384::pkcs8::EncodePrivateKey as EcEncodePrivateKey;
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Errors that can occur during JWT operations.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Failed to encode a token.
    #[error("Failed to encode token: {message}")]
    EncodingError { message: String },

    /// Failed to decode a token.
    #[error("Failed to decode token: {message}")]
    DecodingError { message: String },

    /// The token has expired.
    #[error("Token expired")]
    Expired,

    /// The token signature is invalid.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The token claims are invalid.
    #[error("Invalid claims: {message}")]
    InvalidClaims { message: String },

    /// Failed to generate a cryptographic key.
    #[error("Key generation error: {message}")]
    KeyGenerationError { message: String },

    /// Invalid key format or data.
    #[error("Invalid key: {message}")]
    InvalidKey { message: String },
}

impl JwtError {
    #[must_use]
    pub fn encoding_error(message: impl Into<String>) -> Self {
        Self::EncodingError {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn decoding_error(message: impl Into<String>) -> Self {
        Self::DecodingError {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_claims(message: impl Into<String>) -> Self {
        Self::InvalidClaims {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn key_generation_error(message: impl Into<String>) -> Self {
        Self::KeyGenerationError {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Returns `true` if the token itself was rejected (as opposed to a key problem).
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::Expired
                | Self::InvalidSignature
                | Self::InvalidClaims { .. }
                | Self::DecodingError { .. }
        )
    }
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidAudience
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidSubject
            | ErrorKind::ImmatureSignature
            | ErrorKind::MissingRequiredClaim(_) => Self::invalid_claims(err.to_string()),
            ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidKeyFormat => Self::invalid_key(err.to_string()),
            _ => Self::decoding_error(err.to_string()),
        }
    }
}

/// Supported signing algorithms for session tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigningAlgorithm {
    RS256,
    RS384,
    ES384,
}

impl SigningAlgorithm {
    /// Converts to the `jsonwebtoken` Algorithm type.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::RS384 => Algorithm::RS384,
            Self::ES384 => Algorithm::ES384,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::ES384 => "ES384",
        }
    }

    #[must_use]
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RS256 | Self::RS384)
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = JwtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RS256" => Ok(Self::RS256),
            "RS384" => Ok(Self::RS384),
            "ES384" => Ok(Self::ES384),
            other => Err(JwtError::invalid_key(format!(
                "unsupported signing algorithm '{other}'"
            ))),
        }
    }
}

/// Claims of a session token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionClaims {
    /// User ID.
    pub sub: String,

    /// Issued at (Unix timestamp).
    pub iat: i64,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Session ID, shared with the refresh token issued alongside.
    pub sid: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aud: Vec<String>,
}

impl SessionClaims {
    /// Parses the subject as a user ID.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClaims` if `sub` is not a UUID.
    pub fn user_id(&self) -> Result<Uuid, JwtError> {
        Uuid::parse_str(&self.sub).map_err(|_| JwtError::invalid_claims("sub is not a user id"))
    }

    /// Parses the session ID.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClaims` if `sid` is not a UUID.
    pub fn session_id(&self) -> Result<Uuid, JwtError> {
        Uuid::parse_str(&self.sid).map_err(|_| JwtError::invalid_claims("sid is not a session id"))
    }
}

/// JSON Web Key Set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

/// Public JSON Web Key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: String,
    #[serde(rename = "use")]
    pub use_: String,
    pub alg: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

/// A signing key pair for session tokens.
pub struct SigningKeyPair {
    pub kid: String,
    pub algorithm: SigningAlgorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    public_key_data: PublicKeyData,
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

enum PublicKeyData {
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Ec { x: Vec<u8>, y: Vec<u8> },
}

impl SigningKeyPair {
    /// Generates a new 2048-bit RSA key pair.
    ///
    /// # Errors
    /// Returns an error if key generation fails or algorithm is not RSA-based.
    pub fn generate_rsa(algorithm: SigningAlgorithm) -> Result<Self, JwtError> {
        if !algorithm.is_rsa() {
            return Err(JwtError::invalid_key(format!(
                "Algorithm {algorithm} is not RSA-based"
            )));
        }

        let private_key = RsaPrivateKey::new(&mut OsRng, 2048)
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;
        let public_key = private_key.to_public_key();

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;
        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;

        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;

        Ok(Self {
            kid: Uuid::new_v4().to_string(),
            algorithm,
            encoding_key,
            decoding_key,
            public_key_data: PublicKeyData::Rsa {
                n: public_key.n().to_bytes_be(),
                e: public_key.e().to_bytes_be(),
            },
        })
    }

    /// Generates a new P-384 key pair for ES384.
    ///
    /// # Errors
    /// Returns an error if key generation fails.
    pub fn generate_ec() -> Result<Self, JwtError> {
        let secret_key = EcSecretKey::random(&mut OsRng);
        let signing_key = EcSigningKey::from(&secret_key);
        let (x, y) = ec_coordinates(signing_key.verifying_key())?;

        // jsonwebtoken only reads PKCS#8 for EC keys
        let private_pem = secret_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;
        let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;
        let decoding_key = DecodingKey::from_ec_components(
            &URL_SAFE_NO_PAD.encode(&x),
            &URL_SAFE_NO_PAD.encode(&y),
        )
        .map_err(|e| JwtError::key_generation_error(e.to_string()))?;

        Ok(Self {
            kid: Uuid::new_v4().to_string(),
            algorithm: SigningAlgorithm::ES384,
            encoding_key,
            decoding_key,
            public_key_data: PublicKeyData::Ec { x, y },
        })
    }

    /// Loads a key pair from PEM strings.
    ///
    /// RSA private keys may be PKCS#1 or PKCS#8; EC private keys must be PKCS#8.
    /// Public keys are SubjectPublicKeyInfo PEM.
    ///
    /// # Errors
    /// Returns an error if the PEM data is invalid.
    pub fn from_pem(
        kid: impl Into<String>,
        algorithm: SigningAlgorithm,
        private_pem: &str,
        public_pem: &str,
    ) -> Result<Self, JwtError> {
        let (encoding_key, decoding_key, public_key_data) = if algorithm.is_rsa() {
            let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;
            let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;
            let public_key = RsaPublicKey::from_public_key_pem(public_pem)
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;
            let data = PublicKeyData::Rsa {
                n: public_key.n().to_bytes_be(),
                e: public_key.e().to_bytes_be(),
            };
            (encoding_key, decoding_key, data)
        } else {
            let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;
            let decoding_key = DecodingKey::from_ec_pem(public_pem.as_bytes())
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;
            let verifying_key = EcVerifyingKey::from_public_key_pem(public_pem)
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;
            let (x, y) = ec_coordinates(&verifying_key)?;
            (encoding_key, decoding_key, PublicKeyData::Ec { x, y })
        };

        Ok(Self {
            kid: kid.into(),
            algorithm,
            encoding_key,
            decoding_key,
            public_key_data,
        })
    }

    /// Exports the public key as a JWK.
    #[must_use]
    pub fn to_jwk(&self) -> Jwk {
        let (kty, n, e, crv, x, y) = match &self.public_key_data {
            PublicKeyData::Rsa { n, e } => (
                "RSA",
                Some(URL_SAFE_NO_PAD.encode(n)),
                Some(URL_SAFE_NO_PAD.encode(e)),
                None,
                None,
                None,
            ),
            PublicKeyData::Ec { x, y } => (
                "EC",
                None,
                None,
                Some("P-384".to_string()),
                Some(URL_SAFE_NO_PAD.encode(x)),
                Some(URL_SAFE_NO_PAD.encode(y)),
            ),
        };
        Jwk {
            kty: kty.to_string(),
            kid: self.kid.clone(),
            use_: "sig".to_string(),
            alg: self.algorithm.as_str().to_string(),
            n,
            e,
            crv,
            x,
            y,
        }
    }
}

fn ec_coordinates(key: &EcVerifyingKey) -> Result<(Vec<u8>, Vec<u8>), JwtError> {
    let point = key.to_encoded_point(false);
    let x = point
        .x()
        .ok_or_else(|| JwtError::invalid_key("Missing x coordinate"))?;
    let y = point
        .y()
        .ok_or_else(|| JwtError::invalid_key("Missing y coordinate"))?;
    Ok((x.to_vec(), y.to_vec()))
}

/// Encodes and validates session tokens.
///
/// Thread-safe (`Send + Sync`); share it behind an `Arc`.
#[derive(Debug)]
pub struct JwtService {
    signing_key: SigningKeyPair,
    issuer: Option<String>,
    audience: Vec<String>,
}

impl JwtService {
    #[must_use]
    pub fn new(signing_key: SigningKeyPair, issuer: Option<String>, audience: Vec<String>) -> Self {
        Self {
            signing_key,
            issuer,
            audience,
        }
    }

    /// Builds claims for a new session token.
    #[must_use]
    pub fn claims(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        issued_at: OffsetDateTime,
        lifespan: time::Duration,
    ) -> SessionClaims {
        SessionClaims {
            sub: user_id.to_string(),
            iat: issued_at.unix_timestamp(),
            exp: (issued_at + lifespan).unix_timestamp(),
            sid: session_id.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        }
    }

    /// Encodes claims into a JWT string.
    ///
    /// # Errors
    /// Returns an error if encoding fails.
    pub fn encode<T: Serialize>(&self, claims: &T) -> Result<String, JwtError> {
        let mut header = Header::new(self.signing_key.algorithm.to_jwt_algorithm());
        header.kid = Some(self.signing_key.kid.clone());

        encode(&header, claims, &self.signing_key.encoding_key)
            .map_err(|e| JwtError::encoding_error(e.to_string()))
    }

    /// Decodes and validates a JWT string.
    ///
    /// # Errors
    /// Returns an error if the signature, expiry, issuer or audience is invalid.
    pub fn decode<T: DeserializeOwned>(&self, token: &str) -> Result<TokenData<T>, JwtError> {
        let mut validation = Validation::new(self.signing_key.algorithm.to_jwt_algorithm());
        validation.leeway = 0;
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        if self.audience.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&self.audience);
        }

        decode(token, &self.signing_key.decoding_key, &validation).map_err(JwtError::from)
    }

    /// Returns the public signing key as a JWKS.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        Jwks {
            keys: vec![self.signing_key.to_jwk()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(issuer: Option<&str>) -> JwtService {
        JwtService::new(
            SigningKeyPair::generate_ec().unwrap(),
            issuer.map(str::to_string),
            Vec::new(),
        )
    }

    #[test]
    fn test_generate_rsa_key_pair() {
        let key_pair = SigningKeyPair::generate_rsa(SigningAlgorithm::RS256).unwrap();
        assert_eq!(key_pair.algorithm, SigningAlgorithm::RS256);
        assert!(!key_pair.kid.is_empty());

        assert!(SigningKeyPair::generate_rsa(SigningAlgorithm::ES384).is_err());
    }

    #[test]
    fn test_rs256_encode_decode() {
        let key_pair = SigningKeyPair::generate_rsa(SigningAlgorithm::RS256).unwrap();
        let service = JwtService::new(key_pair, None, Vec::new());
        let user_id = Uuid::new_v4();
        let claims = service.claims(
            user_id,
            Uuid::new_v4(),
            OffsetDateTime::now_utc(),
            time::Duration::hours(1),
        );

        let token = service.encode(&claims).unwrap();
        let decoded = service.decode::<SessionClaims>(&token).unwrap();
        assert_eq!(decoded.claims.user_id().unwrap(), user_id);
        assert_eq!(decoded.header.alg, Algorithm::RS256);
    }

    #[test]
    fn test_es384_encode_decode_with_issuer() {
        let service = service(Some("https://auth.example"));
        let claims = service.claims(
            Uuid::new_v4(),
            Uuid::new_v4(),
            OffsetDateTime::now_utc(),
            time::Duration::minutes(5),
        );
        assert_eq!(claims.iss.as_deref(), Some("https://auth.example"));

        let token = service.encode(&claims).unwrap();
        let decoded = service.decode::<SessionClaims>(&token).unwrap();
        assert_eq!(decoded.claims, claims);
    }

    #[test]
    fn test_audience_is_enforced() {
        let issuing = JwtService::new(
            SigningKeyPair::generate_ec().unwrap(),
            None,
            vec!["app-a".to_string()],
        );
        let claims = issuing.claims(
            Uuid::new_v4(),
            Uuid::new_v4(),
            OffsetDateTime::now_utc(),
            time::Duration::minutes(5),
        );
        let token = issuing.encode(&claims).unwrap();
        assert!(issuing.decode::<SessionClaims>(&token).is_ok());

        let mut other = claims.clone();
        other.aud = vec!["app-b".to_string()];
        let token = issuing.encode(&other).unwrap();
        let err = issuing.decode::<SessionClaims>(&token).unwrap_err();
        assert!(matches!(err, JwtError::InvalidClaims { .. }));
    }

    #[test]
    fn test_expired_token_rejected() {
        let service = service(None);
        let claims = service.claims(
            Uuid::new_v4(),
            Uuid::new_v4(),
            OffsetDateTime::now_utc() - time::Duration::hours(2),
            time::Duration::hours(1),
        );
        let token = service.encode(&claims).unwrap();
        let err = service.decode::<SessionClaims>(&token).unwrap_err();
        assert!(matches!(err, JwtError::Expired));
        assert!(err.is_validation_error());
    }

    #[test]
    fn test_invalid_signature_rejected() {
        let service1 = service(None);
        let service2 = service(None);
        let claims = service1.claims(
            Uuid::new_v4(),
            Uuid::new_v4(),
            OffsetDateTime::now_utc(),
            time::Duration::hours(1),
        );
        let token = service1.encode(&claims).unwrap();
        let err = service2.decode::<SessionClaims>(&token).unwrap_err();
        assert!(matches!(err, JwtError::InvalidSignature));
    }

    #[test]
    fn test_jwks_export() {
        let ec = service(None).jwks();
        assert_eq!(ec.keys.len(), 1);
        assert_eq!(ec.keys[0].kty, "EC");
        assert_eq!(ec.keys[0].crv.as_deref(), Some("P-384"));
        assert!(ec.keys[0].n.is_none());

        let rsa = SigningKeyPair::generate_rsa(SigningAlgorithm::RS384)
            .unwrap()
            .to_jwk();
        assert_eq!(rsa.kty, "RSA");
        assert_eq!(rsa.alg, "RS384");
        assert_eq!(rsa.e.as_deref(), Some("AQAB"));
    }

    #[test]
    fn test_signing_algorithm_from_str() {
        assert_eq!("rs256".parse::<SigningAlgorithm>().unwrap(), SigningAlgorithm::RS256);
        assert_eq!("ES384".parse::<SigningAlgorithm>().unwrap(), SigningAlgorithm::ES384);
        assert!("HS256".parse::<SigningAlgorithm>().is_err());
        assert!(SigningAlgorithm::RS384.is_rsa());
        assert!(!SigningAlgorithm::ES384.is_rsa());
    }
}
