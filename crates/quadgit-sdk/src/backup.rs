//! Logical backup and restore of one repository namespace.
//!
//! A backup is newline-delimited JSON, one record per key-value pair of the
//! namespace, keys relative to the namespace root so a backup can be
//! restored under a different namespace. The manifest returned by
//! [`Repository::backup`] carries a digest over the exact bytes written.

use std::io::{BufRead, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use quadgit_crypto::{ContentHasher, StreamingHasher};
use quadgit_refs::HEAD;
use quadgit_store::KvBackend;
use quadgit_types::ObjectId;

use crate::config::RepositoryConfig;
use crate::error::{SdkError, SdkResult};
use crate::repository::Repository;

const BACKUP_HASHER: ContentHasher = ContentHasher::new("quadgit-backup-v1");

/// Description of a completed backup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    /// Namespace the backup was taken from.
    pub namespace: String,
    /// Backend version of the snapshot that was copied.
    pub version: u64,
    pub entries: u64,
    /// Digest of every line written, newlines included.
    pub digest: ObjectId,
}

#[derive(Serialize, Deserialize)]
struct BackupRecord {
    key: String,
    value: String,
}

fn io_error(e: std::io::Error) -> SdkError {
    SdkError::Backup(e.to_string())
}

fn hash_line(hasher: &mut StreamingHasher, line: &[u8]) {
    hasher.update(line).update(b"\n");
}

impl Repository {
    /// Copy the namespace, as of one snapshot, to `writer`.
    ///
    /// Writers are not blocked; commits landing during the backup are not
    /// part of it.
    pub fn backup<W: Write>(&self, mut writer: W) -> SdkResult<BackupManifest> {
        let snapshot = self.store().backend().snapshot()?;
        let version = snapshot.version();
        let root = self.store().keyspace().root().to_vec();
        let mut cursor = snapshot.cursor(&root)?;

        let mut hasher = BACKUP_HASHER.streaming();
        let mut entries = 0u64;
        while cursor.valid() {
            let key = cursor
                .key()
                .strip_prefix(root.as_slice())
                .ok_or_else(|| SdkError::Backup("cursor left the namespace".into()))?;
            let record = BackupRecord {
                key: hex::encode(key),
                value: hex::encode(cursor.value()),
            };
            let line = serde_json::to_vec(&record).map_err(|e| SdkError::Backup(e.to_string()))?;
            hash_line(&mut hasher, &line);
            writer.write_all(&line).map_err(io_error)?;
            writer.write_all(b"\n").map_err(io_error)?;
            entries += 1;
            cursor.next()?;
        }
        writer.flush().map_err(io_error)?;

        let manifest = BackupManifest {
            namespace: self.config().namespace.clone(),
            version,
            entries,
            digest: hasher.finalize(),
        };
        info!(
            namespace = %manifest.namespace,
            version,
            entries,
            digest = %manifest.digest.short_hex(),
            "backup complete"
        );
        Ok(manifest)
    }

    /// Load a backup into an empty namespace and open it.
    ///
    /// Everything is written in one transaction; a malformed line or a
    /// manifest mismatch writes nothing.
    pub fn restore<R: BufRead>(
        backend: Arc<dyn KvBackend>,
        config: RepositoryConfig,
        reader: R,
        manifest: Option<&BackupManifest>,
    ) -> SdkResult<Self> {
        config.validate()?;
        let keys = config.keyspace();
        let head_key = keys.reference(HEAD);

        let mut txn = backend.begin()?;
        // Tracked, so two restores into one namespace cannot both commit.
        if txn.get(&head_key)?.is_some() || txn.snapshot().cursor(keys.root())?.valid() {
            return Err(SdkError::InvalidOperation(format!(
                "namespace {} is not empty",
                config.namespace
            )));
        }

        let mut hasher = BACKUP_HASHER.streaming();
        let mut entries = 0u64;
        let mut saw_head = false;
        for line in reader.lines() {
            let line = line.map_err(io_error)?;
            if line.is_empty() {
                continue;
            }
            let record: BackupRecord = serde_json::from_str(&line)
                .map_err(|e| SdkError::Backup(format!("entry {}: {e}", entries + 1)))?;
            let decode = |field: &str| {
                hex::decode(field)
                    .map_err(|e| SdkError::Backup(format!("entry {}: {e}", entries + 1)))
            };
            let mut key = keys.root().to_vec();
            key.extend_from_slice(&decode(&record.key)?);
            let value = decode(&record.value)?;

            saw_head |= key == head_key;
            txn.set(&key, &value);
            hash_line(&mut hasher, line.as_bytes());
            entries += 1;
        }

        if let Some(manifest) = manifest {
            if manifest.entries != entries || manifest.digest != hasher.finalize() {
                return Err(SdkError::Backup(format!(
                    "backup does not match manifest (expected {} entries, read {entries})",
                    manifest.entries
                )));
            }
        }
        if !saw_head {
            return Err(SdkError::Backup("backup holds no HEAD".into()));
        }
        txn.commit()?;

        info!(namespace = %config.namespace, entries, "restore complete");
        Self::open(backend, config)
    }
}
