//! Commit signing capability.
//!
//! A repository never signs anything on its own. When a caller supplies a
//! [`CommitSigner`], the repository hands it the canonical unsigned commit
//! body and stores the returned bytes (hex-encoded) in the commit. A
//! [`CommitVerifier`] checks them later. Any closure of the right shape is a
//! signer, and the bundled Ed25519 keys implement both traits.

/// Produces a detached signature over a commit payload.
pub trait CommitSigner: Send + Sync {
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SignatureError>;
}

/// Checks a detached signature produced by a [`CommitSigner`].
pub trait CommitVerifier: Send + Sync {
    fn verify(&self, payload: &[u8], signature: &[u8]) -> Result<(), SignatureError>;
}

impl<F> CommitSigner for F
where
    F: Fn(&[u8]) -> Result<Vec<u8>, SignatureError> + Send + Sync,
{
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SignatureError> {
        self(payload)
    }
}

/// Ed25519 signing key (private).
pub struct SigningKey(ed25519_dalek::SigningKey);

/// Ed25519 verifying key (public).
#[derive(Clone, PartialEq, Eq)]
pub struct VerifyingKey(ed25519_dalek::VerifyingKey);

/// Ed25519 signature.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

impl SigningKey {
    /// Generate a new random signing key.
    pub fn generate() -> Self {
        let mut csprng = rand::thread_rng();
        Self(ed25519_dalek::SigningKey::generate(&mut csprng))
    }

    /// Create from raw 32-byte secret.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(&bytes))
    }

    /// The corresponding public verifying key.
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey(self.0.verifying_key())
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        use ed25519_dalek::Signer;
        Signature(self.0.sign(message))
    }
}

impl VerifyingKey {
    /// Verify a signature on a message.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), SignatureError> {
        use ed25519_dalek::Verifier;
        self.0
            .verify(message, &signature.0)
            .map_err(|_| SignatureError::InvalidSignature)
    }

    /// Raw public key bytes.
    pub fn as_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Create from raw 32-byte public key.
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, SignatureError> {
        let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map_err(|_| SignatureError::InvalidKey)?;
        Ok(Self(key))
    }
}

impl Signature {
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }

    /// Parse a 64-byte signature.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SignatureError> {
        let arr: [u8; 64] = bytes
            .try_into()
            .map_err(|_| SignatureError::Malformed(format!("expected 64 bytes, got {}", bytes.len())))?;
        Ok(Self(ed25519_dalek::Signature::from_bytes(&arr)))
    }
}

impl CommitSigner for SigningKey {
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SignatureError> {
        Ok(SigningKey::sign(self, payload).to_bytes().to_vec())
    }
}

impl CommitVerifier for VerifyingKey {
    fn verify(&self, payload: &[u8], signature: &[u8]) -> Result<(), SignatureError> {
        let signature = Signature::from_slice(signature)?;
        VerifyingKey::verify(self, payload, &signature)
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigningKey(<redacted>)")
    }
}

impl std::fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VerifyingKey({})", hex::encode(self.0.to_bytes()))
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({}...)", hex::encode(&self.0.to_bytes()[..8]))
    }
}

/// Errors from signing operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid key")]
    InvalidKey,
    #[error("malformed signature: {0}")]
    Malformed(String),
    #[error("signer failed: {0}")]
    Signer(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let sk = SigningKey::generate();
        let vk = sk.verifying_key();
        let sig = sk.sign(b"commit body");
        assert!(vk.verify(b"commit body", &sig).is_ok());
        assert_eq!(
            vk.verify(b"other body", &sig),
            Err(SignatureError::InvalidSignature)
        );
    }

    #[test]
    fn verify_fails_with_wrong_key() {
        let sk1 = SigningKey::generate();
        let sk2 = SigningKey::generate();
        let sig = sk1.sign(b"message");
        assert!(sk2.verifying_key().verify(b"message", &sig).is_err());
    }

    #[test]
    fn capability_traits_roundtrip_raw_bytes() {
        let sk = SigningKey::from_bytes([7u8; 32]);
        let vk = sk.verifying_key();
        let raw = CommitSigner::sign(&sk, b"payload").unwrap();
        assert_eq!(raw.len(), 64);
        assert!(CommitVerifier::verify(&vk, b"payload", &raw).is_ok());
        assert!(matches!(
            CommitVerifier::verify(&vk, b"payload", &raw[..10]),
            Err(SignatureError::Malformed(_))
        ));
    }

    #[test]
    fn closures_are_signers() {
        let signer = |payload: &[u8]| -> Result<Vec<u8>, SignatureError> {
            Ok(payload.iter().rev().copied().collect())
        };
        assert_eq!(signer.sign(b"abc").unwrap(), b"cba".to_vec());
    }

    #[test]
    fn verifying_key_bytes_roundtrip() {
        let vk = SigningKey::generate().verifying_key();
        assert_eq!(VerifyingKey::from_bytes(vk.as_bytes()).unwrap(), vk);
    }

    #[test]
    fn debug_redacts_signing_key() {
        let sk = SigningKey::generate();
        assert!(format!("{sk:?}").contains("redacted"));
    }
}
