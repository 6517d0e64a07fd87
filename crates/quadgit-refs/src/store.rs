//! Reference storage over the key-value substrate.
//!
//! [`RefStore`] keeps every reference under the repository's `ref/` key
//! prefix. Each mutation is one atomic transaction; the `*_in` variants
//! stage the same mutation into a caller's transaction so that a commit
//! and the ref update that publishes it land together.

use tracing::{debug, info};

use quadgit_store::{KvTransaction, ObjectKind, ObjectStore, StoreError};
use quadgit_types::ObjectId;

use crate::error::{RefError, Result};
use crate::names::{validate_branch_name, validate_ref_name};
use crate::types::{branch_ref, tag_ref, Head, RefTarget, Reference, BRANCH_PREFIX, HEAD, TAG_PREFIX};

/// Shortest abbreviated hash accepted by [`RefStore::resolve`].
pub const MIN_PREFIX_LEN: usize = 4;

/// Named, mutable bindings to commits.
#[derive(Clone, Debug)]
pub struct RefStore {
    objects: ObjectStore,
}

impl RefStore {
    pub fn new(objects: ObjectStore) -> Self {
        Self { objects }
    }

    fn key(&self, name: &str) -> Vec<u8> {
        self.objects.keyspace().reference(name)
    }

    fn decode(name: &str, bytes: &[u8]) -> Result<RefTarget> {
        serde_json::from_slice(bytes)
            .map_err(|e| RefError::Serialization(format!("ref {name}: {e}")))
    }

    fn encode(target: &RefTarget) -> Result<Vec<u8>> {
        serde_json::to_vec(target).map_err(|e| RefError::Serialization(e.to_string()))
    }

    fn read_target(&self, name: &str) -> Result<Option<RefTarget>> {
        let snapshot = self.objects.backend().snapshot()?;
        snapshot
            .get(&self.key(name))?
            .map(|bytes| Self::decode(name, &bytes))
            .transpose()
    }

    fn follow(&self, name: &str, target: RefTarget) -> Result<Option<ObjectId>> {
        match target {
            RefTarget::Direct(id) => Ok(Some(id)),
            RefTarget::Symbolic(next) if name == HEAD => match self.read_target(&next)? {
                Some(RefTarget::Direct(id)) => Ok(Some(id)),
                Some(RefTarget::Symbolic(_)) => Err(RefError::Serialization(format!(
                    "{next} is symbolic; only HEAD may be"
                ))),
                None => Ok(None),
            },
            RefTarget::Symbolic(_) => Err(RefError::Serialization(format!(
                "{name} is symbolic; only HEAD may be"
            ))),
        }
    }

    // ---- Reads ----

    /// The commit `name` points at, following `HEAD` if needed.
    pub fn find_ref(&self, name: &str) -> Result<Option<ObjectId>> {
        match self.read_target(name)? {
            Some(target) => self.follow(name, target),
            None => Ok(None),
        }
    }

    /// Like [`RefStore::find_ref`] but absent references are an error.
    pub fn get_ref(&self, name: &str) -> Result<ObjectId> {
        self.find_ref(name)?.ok_or_else(|| RefError::NotFound {
            name: name.to_string(),
        })
    }

    /// Read a direct reference inside `txn`, adding it to the read set so a
    /// concurrent update of it fails the transaction.
    pub fn get_ref_in(&self, txn: &mut dyn KvTransaction, name: &str) -> Result<Option<ObjectId>> {
        match txn.get(&self.key(name))? {
            Some(bytes) => match Self::decode(name, &bytes)? {
                RefTarget::Direct(id) => Ok(Some(id)),
                RefTarget::Symbolic(next) => Err(RefError::Serialization(format!(
                    "{name} is symbolic (-> {next})"
                ))),
            },
            None => Ok(None),
        }
    }

    /// All direct references whose full name starts with `prefix`, ordered
    /// by name.
    pub fn list_refs(&self, prefix: &str) -> Result<Vec<Reference>> {
        let keys = self.objects.keyspace();
        let snapshot = self.objects.backend().snapshot()?;
        let mut cursor = snapshot.cursor(&keys.reference_prefix(prefix))?;
        let mut out = Vec::new();
        while cursor.valid() {
            if let Some(name) = keys.reference_name_of(cursor.key()) {
                if let RefTarget::Direct(target) = Self::decode(&name, cursor.value())? {
                    out.push(Reference { name, target });
                }
            }
            cursor.next()?;
        }
        Ok(out)
    }

    pub fn branches(&self) -> Result<Vec<Reference>> {
        self.list_refs(BRANCH_PREFIX)
    }

    pub fn tags(&self) -> Result<Vec<Reference>> {
        self.list_refs(TAG_PREFIX)
    }

    /// Current HEAD state, or `None` before initialization.
    pub fn head(&self) -> Result<Option<Head>> {
        Ok(match self.read_target(HEAD)? {
            Some(RefTarget::Symbolic(full)) => Some(Head::Symbolic(
                full.strip_prefix(BRANCH_PREFIX).unwrap_or(&full).to_string(),
            )),
            Some(RefTarget::Direct(id)) => Some(Head::Detached(id)),
            None => None,
        })
    }

    /// The branch HEAD names, if it is symbolic.
    pub fn current_branch(&self) -> Result<Option<String>> {
        Ok(match self.head()? {
            Some(Head::Symbolic(branch)) => Some(branch),
            _ => None,
        })
    }

    // ---- Writes ----

    /// Point `name` at commit `id` in its own transaction.
    pub fn set_ref(&self, name: &str, id: &ObjectId) -> Result<()> {
        let mut txn = self.objects.backend().begin()?;
        self.set_ref_in(txn.as_mut(), name, id)?;
        txn.commit()?;
        Ok(())
    }

    /// Stage `name -> id` into `txn`.
    ///
    /// The commit must exist (possibly staged in the same transaction).
    /// Moving an existing tag fails with [`RefError::TagImmutable`]. The
    /// existing tag is read through `txn`, so two transactions creating the
    /// same tag cannot both commit.
    pub fn set_ref_in(&self, txn: &mut dyn KvTransaction, name: &str, id: &ObjectId) -> Result<()> {
        validate_ref_name(name)?;
        self.expect_commit(txn, id)?;
        let key = self.key(name);
        if name.starts_with(TAG_PREFIX) {
            if let Some(existing) = txn.get(&key)? {
                if Self::decode(name, &existing)? == RefTarget::Direct(*id) {
                    return Ok(());
                }
                return Err(RefError::TagImmutable {
                    name: name.to_string(),
                });
            }
        }
        txn.set(&key, &Self::encode(&RefTarget::Direct(*id))?);
        info!(reference = name, target = %id.short_hex(), "updated ref");
        Ok(())
    }

    /// Delete a reference. The branch HEAD names cannot be deleted.
    pub fn delete_ref(&self, name: &str) -> Result<()> {
        validate_ref_name(name)?;
        let mut txn = self.objects.backend().begin()?;
        if let Some(bytes) = txn.get(&self.key(HEAD))? {
            if Self::decode(HEAD, &bytes)? == RefTarget::Symbolic(name.to_string()) {
                return Err(RefError::DeleteCurrentBranch {
                    name: name.trim_start_matches(BRANCH_PREFIX).to_string(),
                });
            }
        }
        let key = self.key(name);
        if txn.get(&key)?.is_none() {
            return Err(RefError::NotFound {
                name: name.to_string(),
            });
        }
        txn.delete(&key);
        txn.commit()?;
        info!(reference = name, "deleted ref");
        Ok(())
    }

    /// Point HEAD at an existing branch.
    pub fn set_head(&self, branch: &str) -> Result<()> {
        let mut txn = self.objects.backend().begin()?;
        self.set_head_in(txn.as_mut(), branch)?;
        txn.commit()?;
        Ok(())
    }

    pub fn set_head_in(&self, txn: &mut dyn KvTransaction, branch: &str) -> Result<()> {
        validate_branch_name(branch)?;
        let full = branch_ref(branch);
        if txn.peek(&self.key(&full))?.is_none() {
            return Err(RefError::NotFound { name: full });
        }
        txn.set(&self.key(HEAD), &Self::encode(&RefTarget::Symbolic(full))?);
        debug!(branch, "HEAD now symbolic");
        Ok(())
    }

    /// Detach HEAD at a commit.
    pub fn set_head_detached(&self, id: &ObjectId) -> Result<()> {
        let mut txn = self.objects.backend().begin()?;
        self.expect_commit(txn.as_ref(), id)?;
        txn.set(&self.key(HEAD), &Self::encode(&RefTarget::Direct(*id))?);
        txn.commit()?;
        debug!(target = %id.short_hex(), "HEAD detached");
        Ok(())
    }

    fn expect_commit(&self, txn: &dyn KvTransaction, id: &ObjectId) -> Result<()> {
        match self.objects.kind_in(txn, id)? {
            Some(ObjectKind::Commit) => Ok(()),
            Some(_) => Err(RefError::NotACommit { id: *id }),
            None => Err(StoreError::NotFound(*id).into()),
        }
    }

    // ---- Resolution ----

    /// Resolve a friendly name to a commit.
    ///
    /// Tried in order: branch name, tag name, `HEAD`, full reference name,
    /// then an abbreviated commit hash of at least [`MIN_PREFIX_LEN`] hex
    /// characters. A prefix matching several commits is an error.
    pub fn resolve(&self, friendly: &str) -> Result<ObjectId> {
        if !friendly.is_empty() && friendly != HEAD && !friendly.starts_with("refs/") {
            if let Some(id) = self.find_ref(&branch_ref(friendly))? {
                return Ok(id);
            }
            if let Some(id) = self.find_ref(&tag_ref(friendly))? {
                return Ok(id);
            }
        }
        if friendly == HEAD || friendly.starts_with("refs/") {
            if let Some(id) = self.find_ref(friendly)? {
                return Ok(id);
            }
        }
        if is_hex_prefix(friendly) {
            let commits: Vec<ObjectId> = self
                .objects
                .ids_with_prefix(friendly)?
                .into_iter()
                .filter(|(_, kind)| *kind == ObjectKind::Commit)
                .map(|(id, _)| id)
                .collect();
            match commits.as_slice() {
                [id] => return Ok(*id),
                [] => {}
                many => {
                    return Err(RefError::AmbiguousPrefix {
                        prefix: friendly.to_string(),
                        matches: many.len(),
                    })
                }
            }
        }
        Err(RefError::NotFound {
            name: friendly.to_string(),
        })
    }
}

fn is_hex_prefix(s: &str) -> bool {
    (MIN_PREFIX_LEN..=ObjectId::HEX_LEN).contains(&s.len())
        && s.chars().all(|c| c.is_ascii_hexdigit())
}
