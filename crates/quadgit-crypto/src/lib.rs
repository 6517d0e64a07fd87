//! Cryptographic primitives for quadgit.
//!
//! Provides domain-separated BLAKE3 hashing for object identity and the
//! signing capability invoked around commit creation. The core never
//! implements signing itself: callers hand in a [`CommitSigner`] and
//! [`CommitVerifier`], of which the Ed25519 keys here are one implementation.
//!
//! All crypto operations wrap established libraries; no custom cryptography.

pub mod hasher;
pub mod signer;

pub use hasher::{ContentHasher, HasherError, StreamingHasher};
pub use signer::{
    CommitSigner, CommitVerifier, Signature, SignatureError, SigningKey, VerifyingKey,
};
