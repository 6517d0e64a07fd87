//! Quads and their order-preserving byte encoding.
//!
//! A [`Quad`] is ordered lexicographically over (subject, predicate, object,
//! graph), byte-wise. [`QuadKey`] encodes a quad so that comparing two keys
//! as raw bytes gives exactly the same answer as comparing the quads. Blob
//! rows are stored under these keys, so a prefix scan of a blob yields its
//! quads in canonical order and the diff walk can compare either form.
//!
//! Each field is escaped (`0x00` becomes `0x00 0xFF`) and terminated by
//! `0x00 0x00`. The terminator sorts below every escaped byte, so a field
//! that is a prefix of another sorts first, as it does for plain strings.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

const ESCAPE: u8 = 0x00;
const ESCAPED_NUL: u8 = 0xFF;
const TERMINATOR: u8 = 0x00;

/// A single (subject, predicate, object, graph) statement.
///
/// All four components are opaque strings: IRIs, blank node labels or
/// serialized literals. Equality is structural.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Quad {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub graph: String,
}

impl Quad {
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
        graph: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            graph: graph.into(),
        }
    }

    /// Encode this quad as an ordered key.
    pub fn key(&self) -> QuadKey {
        QuadKey::encode(self)
    }

    /// Returns `true` if this quad has the same subject, predicate and graph
    /// as `other`, ignoring the object.
    pub fn same_slot(&self, other: &Quad) -> bool {
        self.subject == other.subject
            && self.predicate == other.predicate
            && self.graph == other.graph
    }
}

impl fmt::Debug for Quad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Quad({} {} {} {})",
            self.subject, self.predicate, self.object, self.graph
        )
    }
}

impl fmt::Display for Quad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{}> <{}> {} <{}>",
            self.subject, self.predicate, self.object, self.graph
        )
    }
}

/// Order-preserving byte encoding of a [`Quad`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuadKey(Vec<u8>);

impl QuadKey {
    /// Encode a quad.
    pub fn encode(quad: &Quad) -> Self {
        let mut out = Vec::with_capacity(
            quad.subject.len() + quad.predicate.len() + quad.object.len() + quad.graph.len() + 8,
        );
        for field in [&quad.subject, &quad.predicate, &quad.object, &quad.graph] {
            push_field(&mut out, field.as_bytes());
        }
        Self(out)
    }

    /// Decode a key produced by [`QuadKey::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Quad, TypeError> {
        let mut fields: Vec<String> = Vec::with_capacity(4);
        let mut current = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            if b != ESCAPE {
                current.push(b);
                i += 1;
                continue;
            }
            match bytes.get(i + 1) {
                Some(&ESCAPED_NUL) => current.push(0),
                Some(&TERMINATOR) => {
                    let field = String::from_utf8(std::mem::take(&mut current))
                        .map_err(|e| TypeError::InvalidQuadKey(e.to_string()))?;
                    fields.push(field);
                }
                Some(other) => {
                    return Err(TypeError::InvalidQuadKey(format!(
                        "unexpected byte {other:#04x} after escape at offset {i}"
                    )))
                }
                None => {
                    return Err(TypeError::InvalidQuadKey(
                        "truncated escape sequence".into(),
                    ))
                }
            }
            i += 2;
        }
        if !current.is_empty() {
            return Err(TypeError::InvalidQuadKey("unterminated field".into()));
        }
        match <[String; 4]>::try_from(fields) {
            Ok([subject, predicate, object, graph]) => Ok(Quad {
                subject,
                predicate,
                object,
                graph,
            }),
            Err(fields) => Err(TypeError::InvalidQuadKey(format!(
                "expected 4 fields, found {}",
                fields.len()
            ))),
        }
    }

    /// Key prefix shared by every quad with this subject and predicate.
    pub fn slot_prefix(subject: &str, predicate: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(subject.len() + predicate.len() + 4);
        push_field(&mut out, subject.as_bytes());
        push_field(&mut out, predicate.as_bytes());
        out
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Compare two quads through their encodings.
    pub fn compare(a: &Quad, b: &Quad) -> Ordering {
        Self::encode(a).cmp(&Self::encode(b))
    }
}

impl fmt::Debug for QuadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QuadKey({})", hex::encode(&self.0))
    }
}

impl AsRef<[u8]> for QuadKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

fn push_field(out: &mut Vec<u8>, field: &[u8]) {
    for &b in field {
        if b == 0 {
            out.push(ESCAPE);
            out.push(ESCAPED_NUL);
        } else {
            out.push(b);
        }
    }
    out.push(ESCAPE);
    out.push(TERMINATOR);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn q(s: &str, p: &str, o: &str, g: &str) -> Quad {
        Quad::new(s, p, o, g)
    }

    #[test]
    fn decode_inverts_encode() {
        let quad = q("ex:alice", "ex:knows", "ex:bob", "ex:g");
        let key = quad.key();
        assert_eq!(QuadKey::decode(key.as_bytes()).unwrap(), quad);
    }

    #[test]
    fn embedded_nul_survives() {
        let quad = q("a\0b", "", "\0", "g");
        let key = quad.key();
        assert_eq!(QuadKey::decode(key.as_bytes()).unwrap(), quad);
    }

    #[test]
    fn prefix_field_sorts_first() {
        let short = q("ab", "p", "o", "g");
        let long = q("abc", "p", "o", "g");
        let nul = q("ab\0", "p", "o", "g");
        assert!(short.key() < long.key());
        assert!(short.key() < nul.key());
        assert!(nul.key() < long.key());
    }

    #[test]
    fn slot_prefix_matches_only_that_slot() {
        let prefix = QuadKey::slot_prefix("s", "p");
        assert!(q("s", "p", "o", "g").key().as_bytes().starts_with(&prefix));
        assert!(!q("s", "pp", "o", "g").key().as_bytes().starts_with(&prefix));
        assert!(!q("ss", "p", "o", "g").key().as_bytes().starts_with(&prefix));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(QuadKey::decode(b"abc").is_err());
        assert!(QuadKey::decode(&[b'a', 0x00, 0x01]).is_err());
        assert!(QuadKey::decode(&[b'a', 0x00]).is_err());
        // Only two fields.
        assert!(QuadKey::decode(&[b'a', 0, 0, b'b', 0, 0]).is_err());
    }

    #[test]
    fn same_slot_ignores_object() {
        let a = q("s", "p", "1", "g");
        let b = q("s", "p", "2", "g");
        let c = q("s", "p", "1", "h");
        assert!(a.same_slot(&b));
        assert!(!a.same_slot(&c));
    }

    fn field() -> impl Strategy<Value = String> {
        prop::collection::vec(prop::sample::select(vec!['\0', 'a', 'b', 'z', 'é']), 0..4)
            .prop_map(|chars| chars.into_iter().collect())
    }

    fn quad() -> impl Strategy<Value = Quad> {
        (field(), field(), field(), field()).prop_map(|(s, p, o, g)| Quad::new(s, p, o, g))
    }

    proptest! {
        #[test]
        fn key_order_matches_quad_order(a in quad(), b in quad()) {
            prop_assert_eq!(a.cmp(&b), a.key().cmp(&b.key()));
        }
    }
}
