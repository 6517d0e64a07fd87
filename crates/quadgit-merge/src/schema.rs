//! Schema constraints used for semantic merge validation.
//!
//! A [`SchemaIndex`] is the precomputed constraint set of one schema
//! version: functional properties, maximum cardinalities and disjoint
//! classes. Indices come from a [`SchemaProvider`], which the merge engine
//! consults once per schema version involved in a merge.
//!
//! Terms are recognised in full-IRI form (`http://www.w3.org/2002/07/owl#FunctionalProperty`),
//! in angle brackets, or as `rdf:` / `owl:` prefixed names.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use quadgit_types::{ObjectId, Quad};

use crate::error::{MergeError, MergeResult};

pub const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
pub const OWL_NS: &str = "http://www.w3.org/2002/07/owl#";
/// `rdf:type` as a full IRI.
pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

/// Spellings of `rdf:type` looked up when collecting a subject's classes.
pub const TYPE_PREDICATES: [&str; 3] = [
    RDF_TYPE,
    "<http://www.w3.org/1999/02/22-rdf-syntax-ns#type>",
    "rdf:type",
];

fn is_term(value: &str, prefix: &str, namespace: &str, local: &str) -> bool {
    let bare = value
        .strip_prefix('<')
        .and_then(|v| v.strip_suffix('>'))
        .unwrap_or(value);
    bare.strip_prefix(namespace).is_some_and(|rest| rest == local)
        || bare
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix(':'))
            .is_some_and(|rest| rest == local)
}

fn is_owl(value: &str, local: &str) -> bool {
    is_term(value, "owl", OWL_NS, local)
}

/// Whether `predicate` is some spelling of `rdf:type`.
pub fn is_type_predicate(predicate: &str) -> bool {
    is_term(predicate, "rdf", RDF_NS, "type")
}

/// Leading integer of a literal such as `2`, `"2"` or `"2"^^xsd:nonNegativeInteger`.
fn parse_cardinality(literal: &str) -> Option<u64> {
    let digits: String = literal
        .trim_start_matches('"')
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Which constraint bounds a predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardinalityKind {
    Functional,
    MaxCardinality,
}

/// Constraint set of one schema version.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaIndex {
    functional: BTreeSet<String>,
    max_cardinality: BTreeMap<String, u64>,
    disjoint: BTreeMap<String, BTreeSet<String>>,
}

impl SchemaIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive an index from schema axioms.
    ///
    /// Recognised:
    /// - `?p rdf:type owl:FunctionalProperty`
    /// - `?p owl:maxCardinality n`, or a restriction node `?r owl:onProperty ?p`
    ///   with `?r owl:maxCardinality n`
    /// - `?a owl:disjointWith ?b` (symmetric)
    pub fn from_quads<'a>(quads: impl IntoIterator<Item = &'a Quad>) -> Self {
        let mut index = Self::new();
        let mut on_property: HashMap<&str, &str> = HashMap::new();
        let mut cardinalities: Vec<(&str, u64)> = Vec::new();

        for quad in quads {
            let (s, p, o) = (
                quad.subject.as_str(),
                quad.predicate.as_str(),
                quad.object.as_str(),
            );
            if is_type_predicate(p) && is_owl(o, "FunctionalProperty") {
                index.add_functional(s);
            } else if is_owl(p, "onProperty") {
                on_property.insert(s, o);
            } else if is_owl(p, "maxCardinality") {
                match parse_cardinality(o) {
                    Some(n) => cardinalities.push((s, n)),
                    None => warn!(subject = s, literal = o, "ignoring unparsable maxCardinality"),
                }
            } else if is_owl(p, "disjointWith") {
                index.add_disjoint(s, o);
            }
        }
        for (subject, n) in cardinalities {
            let property = on_property.get(subject).copied().unwrap_or(subject);
            index.add_max_cardinality(property, n);
        }
        index
    }

    pub fn add_functional(&mut self, predicate: impl Into<String>) {
        self.functional.insert(predicate.into());
    }

    /// Record a bound, keeping the tightest one per predicate.
    pub fn add_max_cardinality(&mut self, predicate: impl Into<String>, max: u64) {
        self.max_cardinality
            .entry(predicate.into())
            .and_modify(|current| *current = (*current).min(max))
            .or_insert(max);
    }

    pub fn add_disjoint(&mut self, a: impl Into<String>, b: impl Into<String>) {
        let (a, b) = (a.into(), b.into());
        self.disjoint.entry(a.clone()).or_default().insert(b.clone());
        self.disjoint.entry(b).or_default().insert(a);
    }

    /// Effective value bound on `predicate`, if any. A functional property
    /// counts as a bound of one.
    pub fn max_values(&self, predicate: &str) -> Option<(u64, CardinalityKind)> {
        let functional = self
            .functional
            .contains(predicate)
            .then_some((1, CardinalityKind::Functional));
        let explicit = self
            .max_cardinality
            .get(predicate)
            .map(|n| (*n, CardinalityKind::MaxCardinality));
        match (functional, explicit) {
            (Some(f), Some(e)) if e.0 < f.0 => Some(e),
            (Some(f), _) => Some(f),
            (None, e) => e,
        }
    }

    /// Classes declared disjoint with `class`.
    pub fn disjoint_with(&self, class: &str) -> impl Iterator<Item = &String> {
        self.disjoint.get(class).into_iter().flatten()
    }

    pub fn are_disjoint(&self, a: &str, b: &str) -> bool {
        self.disjoint.get(a).is_some_and(|set| set.contains(b))
    }

    pub fn is_empty(&self) -> bool {
        self.functional.is_empty() && self.max_cardinality.is_empty() && self.disjoint.is_empty()
    }
}

/// The schema a provider is asked to index: the schema graph's blob id
/// (`None` when there is no schema graph content) and its quads.
#[derive(Clone, Copy, Debug)]
pub struct SchemaSource<'a> {
    pub version: Option<&'a ObjectId>,
    pub quads: &'a [Quad],
}

/// Supplies schema indices to the merge engine.
pub trait SchemaProvider: Send + Sync {
    /// Index for `source`, or `None` to skip validation for it.
    fn index_for(&self, source: SchemaSource<'_>) -> MergeResult<Option<Arc<SchemaIndex>>>;
}

/// A fixed index used regardless of schema version.
#[derive(Clone, Debug)]
pub struct StaticSchema(pub Arc<SchemaIndex>);

impl StaticSchema {
    pub fn new(index: SchemaIndex) -> Self {
        Self(Arc::new(index))
    }
}

impl SchemaProvider for StaticSchema {
    fn index_for(&self, _source: SchemaSource<'_>) -> MergeResult<Option<Arc<SchemaIndex>>> {
        Ok(Some(self.0.clone()))
    }
}

/// Builds indices from the schema graph itself, cached per version.
#[derive(Debug, Default)]
pub struct GraphSchemaProvider {
    cache: RwLock<HashMap<ObjectId, Arc<SchemaIndex>>>,
}

impl GraphSchemaProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SchemaProvider for GraphSchemaProvider {
    fn index_for(&self, source: SchemaSource<'_>) -> MergeResult<Option<Arc<SchemaIndex>>> {
        let Some(version) = source.version else {
            return Ok(None);
        };
        if let Some(index) = self
            .cache
            .read()
            .map_err(|e| MergeError::Schema(format!("cache lock poisoned: {e}")))?
            .get(version)
        {
            return Ok(Some(index.clone()));
        }
        let index = Arc::new(SchemaIndex::from_quads(source.quads));
        debug!(version = %version.short_hex(), axioms = source.quads.len(), "indexed schema");
        self.cache
            .write()
            .map_err(|e| MergeError::Schema(format!("cache lock poisoned: {e}")))?
            .insert(*version, index.clone());
        Ok(Some(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axiom(s: &str, p: &str, o: &str) -> Quad {
        Quad::new(s, p, o, "ex:schema")
    }

    #[test]
    fn recognises_axioms_in_every_spelling() {
        let quads = vec![
            axiom("ex:age", RDF_TYPE, "http://www.w3.org/2002/07/owl#FunctionalProperty"),
            axiom("ex:email", "rdf:type", "owl:FunctionalProperty"),
            axiom("ex:tag", "<http://www.w3.org/2002/07/owl#maxCardinality>", "\"3\"^^xsd:nonNegativeInteger"),
            axiom("_:r", "owl:onProperty", "ex:nick"),
            axiom("_:r", "owl:maxCardinality", "2"),
            axiom("ex:Cat", "owl:disjointWith", "ex:Dog"),
        ];
        let index = SchemaIndex::from_quads(&quads);
        assert_eq!(index.max_values("ex:age"), Some((1, CardinalityKind::Functional)));
        assert_eq!(index.max_values("ex:email"), Some((1, CardinalityKind::Functional)));
        assert_eq!(index.max_values("ex:tag"), Some((3, CardinalityKind::MaxCardinality)));
        assert_eq!(index.max_values("ex:nick"), Some((2, CardinalityKind::MaxCardinality)));
        assert_eq!(index.max_values("ex:other"), None);
        assert!(index.are_disjoint("ex:Dog", "ex:Cat"));
        assert_eq!(index.disjoint_with("ex:Cat").collect::<Vec<_>>(), vec!["ex:Dog"]);
    }

    #[test]
    fn tightest_bound_wins() {
        let mut index = SchemaIndex::new();
        index.add_max_cardinality("ex:p", 5);
        index.add_max_cardinality("ex:p", 2);
        index.add_functional("ex:p");
        assert_eq!(index.max_values("ex:p"), Some((1, CardinalityKind::Functional)));

        index.add_max_cardinality("ex:q", 0);
        index.add_functional("ex:q");
        assert_eq!(index.max_values("ex:q"), Some((0, CardinalityKind::MaxCardinality)));
    }

    #[test]
    fn unrelated_quads_are_ignored() {
        let quads = vec![
            axiom("ex:age", "rdfs:label", "\"age\""),
            axiom("ex:x", "owl:maxCardinality", "\"many\""),
        ];
        assert!(SchemaIndex::from_quads(&quads).is_empty());
    }

    #[test]
    fn graph_provider_caches_per_version() {
        let provider = GraphSchemaProvider::new();
        let quads = vec![axiom("ex:age", "rdf:type", "owl:FunctionalProperty")];
        let version = ObjectId::from_bytes(b"schema-v1");
        let first = provider
            .index_for(SchemaSource {
                version: Some(&version),
                quads: &quads,
            })
            .unwrap()
            .unwrap();
        // A cached version is not re-indexed from the quads it is handed.
        let second = provider
            .index_for(SchemaSource {
                version: Some(&version),
                quads: &[],
            })
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(provider
            .index_for(SchemaSource {
                version: None,
                quads: &[],
            })
            .unwrap()
            .is_none());
    }
}
