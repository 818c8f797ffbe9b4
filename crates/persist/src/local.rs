//! Local fallback snapshot, used while the shared store is unreachable.
//!
//! Layout inside the snapshot directory:
//! ```text
//! players-<generation>.cbor.zst  - every saved player, CBOR + zstd
//! manifest.json                  - schema version, payload name and sha256
//! ```
//!
//! Each save writes a new payload generation and then swaps the manifest in
//! with a rename, so a crash leaves either the old pair or the new one. A
//! payload whose hash does not match the manifest is rejected, and a save
//! over an unreadable snapshot moves the old files aside first.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use veinmine_common::PlayerId;
use veinmine_progress::PlayerProgress;

use crate::error::StoreError;
use crate::sync_log::now_millis;

const SNAPSHOT_SCHEMA_VERSION: u32 = 2;
const MANIFEST_FILE: &str = "manifest.json";
const PAYLOAD_PREFIX: &str = "players-";
const PAYLOAD_SUFFIX: &str = ".cbor.zst";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotManifest {
    schema_version: u32,
    generation: u64,
    payload: String,
    sha256: String,
    player_count: usize,
}

/// One player kept in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEntry {
    pub progress: PlayerProgress,
    /// `Some` when this copy started from a fresh default because the shared
    /// row could not be read. Holds the mined blocks already credited to the
    /// shared row, so reconciling merges instead of overwriting.
    pub credited: Option<u64>,
}

impl LocalEntry {
    /// A copy that descends from the stored row.
    pub fn known(progress: PlayerProgress) -> Self {
        Self {
            progress,
            credited: None,
        }
    }
}

/// Directory-backed store of player snapshots.
#[derive(Debug, Clone)]
pub struct LocalSnapshot {
    root: PathBuf,
}

impl LocalSnapshot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn exists(&self) -> bool {
        self.manifest_path().exists()
    }

    fn read_manifest(&self) -> Result<Option<SnapshotManifest>, StoreError> {
        if !self.exists() {
            return Ok(None);
        }
        let manifest: SnapshotManifest =
            serde_json::from_reader(std::fs::File::open(self.manifest_path())?)?;
        if manifest.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                file_version: manifest.schema_version,
                expected_version: SNAPSHOT_SCHEMA_VERSION,
            });
        }
        if !is_payload_name(&manifest.payload) {
            return Err(StoreError::Malformed(format!(
                "manifest names payload '{}'",
                manifest.payload
            )));
        }
        Ok(Some(manifest))
    }

    /// Every saved player. Empty when nothing has been written yet.
    pub fn load_all(&self) -> Result<BTreeMap<PlayerId, LocalEntry>, StoreError> {
        Ok(self.read()?.1)
    }

    fn read(&self) -> Result<(u64, BTreeMap<PlayerId, LocalEntry>), StoreError> {
        let Some(manifest) = self.read_manifest()? else {
            return Ok((0, BTreeMap::new()));
        };
        let compressed = std::fs::read(self.root.join(&manifest.payload))?;
        let actual = digest(&compressed);
        if actual != manifest.sha256 {
            return Err(StoreError::IntegrityMismatch {
                expected: manifest.sha256,
                actual,
            });
        }
        let entries = unpack_entries(&compressed)?;
        let all = entries
            .into_iter()
            .map(|e| (e.progress.id, e))
            .collect();
        Ok((manifest.generation, all))
    }

    pub fn load(&self, player: PlayerId) -> Result<Option<LocalEntry>, StoreError> {
        Ok(self.load_all()?.remove(&player))
    }

    /// Merge `entries` into the snapshot, replacing older copies.
    ///
    /// An unreadable snapshot is moved aside rather than blocking the save,
    /// so its players can still be recovered by hand.
    pub fn save(&self, entries: &[LocalEntry]) -> Result<(), StoreError> {
        let (generation, mut all) = match self.read() {
            Ok(found) => found,
            Err(err) => {
                let moved = self.quarantine()?;
                tracing::warn!(
                    error = %err,
                    dir = %self.root.display(),
                    moved,
                    "local snapshot unreadable, moved aside"
                );
                (0, BTreeMap::new())
            }
        };
        for e in entries {
            all.insert(e.progress.id, e.clone());
        }
        self.write_generation(generation + 1, &all)
    }

    fn write_generation(
        &self,
        generation: u64,
        all: &BTreeMap<PlayerId, LocalEntry>,
    ) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.root)?;
        let entries: Vec<&LocalEntry> = all.values().collect();
        let compressed = pack_entries(&entries)?;
        let payload = format!("{PAYLOAD_PREFIX}{generation}{PAYLOAD_SUFFIX}");
        let manifest = SnapshotManifest {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            generation,
            payload: payload.clone(),
            sha256: digest(&compressed),
            player_count: entries.len(),
        };

        replace_file(&self.root.join(&payload), &compressed)?;
        let manifest_json = serde_json::to_vec_pretty(&manifest)?;
        replace_file(&self.manifest_path(), &manifest_json)?;

        // Older generations are unreachable once the manifest moved on.
        for stale in self.payload_files()? {
            if stale.file_name().is_some_and(|n| n != payload.as_str()) {
                remove_if_present(&stale)?;
            }
        }
        Ok(())
    }

    fn payload_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        let dir = match std::fs::read_dir(&self.root) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut found = Vec::new();
        for entry in dir {
            let path = entry?.path();
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(is_payload_name)
            {
                found.push(path);
            }
        }
        Ok(found)
    }

    /// Rename the manifest and every payload with a `.corrupt-<millis>`
    /// suffix. Returns how many files were moved.
    fn quarantine(&self) -> Result<usize, StoreError> {
        let suffix = format!("corrupt-{}", now_millis());
        let mut files = self.payload_files()?;
        if self.exists() {
            files.push(self.manifest_path());
        }
        for path in &files {
            let mut target = path.clone().into_os_string();
            target.push(".");
            target.push(&suffix);
            std::fs::rename(path, PathBuf::from(target))?;
        }
        Ok(files.len())
    }

    /// Remove the snapshot after its players were reconciled elsewhere.
    pub fn clear(&self) -> Result<(), StoreError> {
        remove_if_present(&self.manifest_path())?;
        for path in self.payload_files()? {
            remove_if_present(&path)?;
        }
        Ok(())
    }
}

fn is_payload_name(name: &str) -> bool {
    name.strip_prefix(PAYLOAD_PREFIX)
        .and_then(|rest| rest.strip_suffix(PAYLOAD_SUFFIX))
        .is_some_and(|generation| generation.parse::<u64>().is_ok())
}

/// Write `bytes` next to `path` and rename over it.
fn replace_file(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<(), StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Level passed to zstd for the player blob.
const COMPRESSION_LEVEL: i32 = 3;

fn pack_entries<E: Serialize>(entries: &[E]) -> Result<Vec<u8>, StoreError> {
    let mut cbor = Vec::new();
    ciborium::into_writer(entries, &mut cbor)
        .map_err(|e| StoreError::CborEncode(format!("player snapshot: {e}")))?;
    Ok(zstd::encode_all(cbor.as_slice(), COMPRESSION_LEVEL)?)
}

fn unpack_entries(blob: &[u8]) -> Result<Vec<LocalEntry>, StoreError> {
    let cbor = zstd::decode_all(blob)?;
    ciborium::from_reader(cbor.as_slice())
        .map_err(|e| StoreError::CborDecode(format!("player snapshot: {e}")))
}

fn digest(blob: &[u8]) -> String {
    Sha256::digest(blob)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use veinmine_progress::AchievementProgress;

    fn player(name: &str, level: u32) -> LocalEntry {
        let mut p = PlayerProgress::new(PlayerId::new(), name);
        p.level = level;
        p.achievements.insert(
            "a".into(),
            AchievementProgress {
                progress: 3,
                claimed: true,
            },
        );
        LocalEntry::known(p)
    }

    fn files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn empty_dir_loads_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let snap = LocalSnapshot::new(tmp.path().join("local"));
        assert!(snap.load_all().unwrap().is_empty());
        snap.clear().unwrap();
    }

    #[test]
    fn save_merges_and_reloads() {
        let tmp = tempfile::tempdir().unwrap();
        let snap = LocalSnapshot::new(tmp.path().join("local"));
        let a = player("a", 2);
        let mut b = player("b", 3);
        b.credited = Some(0);
        snap.save(&[a.clone()]).unwrap();
        snap.save(&[b.clone()]).unwrap();
        b.progress.level = 9;
        snap.save(&[b.clone()]).unwrap();

        let reopened = LocalSnapshot::new(tmp.path().join("local"));
        let all = reopened.load_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[&a.progress.id], a);
        let loaded = reopened.load(b.progress.id).unwrap().unwrap();
        assert_eq!(loaded.progress.level, 9);
        assert_eq!(loaded.credited, Some(0));
        // Only the newest generation is kept.
        assert_eq!(
            files(&tmp.path().join("local")),
            vec!["manifest.json".to_string(), "players-3.cbor.zst".to_string()]
        );
    }

    #[test]
    fn corruption_fails_closed() {
        let tmp = tempfile::tempdir().unwrap();
        let snap = LocalSnapshot::new(tmp.path());
        snap.save(&[player("a", 2)]).unwrap();

        let path = tmp.path().join("players-1.cbor.zst");
        let mut data = std::fs::read(&path).unwrap();
        if let Some(byte) = data.last_mut() {
            *byte ^= 0xff;
        }
        std::fs::write(&path, &data).unwrap();

        assert!(matches!(
            snap.load_all(),
            Err(StoreError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn saving_over_corrupt_snapshot_keeps_old_files_aside() {
        let tmp = tempfile::tempdir().unwrap();
        let snap = LocalSnapshot::new(tmp.path());
        let a = player("a", 2);
        snap.save(&[a.clone(), player("c", 4)]).unwrap();

        let path = tmp.path().join("players-1.cbor.zst");
        let original = std::fs::read(&path).unwrap();
        let mut data = original.clone();
        data[0] ^= 0xff;
        std::fs::write(&path, &data).unwrap();

        let b = player("b", 1);
        snap.save(&[b.clone()]).unwrap();
        let all = snap.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key(&b.progress.id));

        let names = files(tmp.path());
        let moved: Vec<&String> = names.iter().filter(|n| n.contains(".corrupt-")).collect();
        assert_eq!(moved.len(), 2, "{names:?}");
        assert!(moved.iter().any(|n| n.starts_with("manifest.json.")));
        let payload = moved
            .iter()
            .find(|n| n.starts_with("players-1.cbor.zst."))
            .unwrap();
        // The moved payload is byte-for-byte what was on disk.
        assert_eq!(std::fs::read(tmp.path().join(payload)).unwrap(), data);

        // Restoring the bytes by hand recovers the players.
        let manifest = moved.iter().find(|n| n.starts_with("manifest.json.")).unwrap();
        let recovered = tempfile::tempdir().unwrap();
        std::fs::copy(tmp.path().join(manifest), recovered.path().join(MANIFEST_FILE)).unwrap();
        std::fs::write(recovered.path().join("players-1.cbor.zst"), &original).unwrap();
        let old = LocalSnapshot::new(recovered.path()).load_all().unwrap();
        assert_eq!(old[&a.progress.id], a);
    }

    #[test]
    fn interrupted_save_leaves_previous_generation_readable() {
        let tmp = tempfile::tempdir().unwrap();
        let snap = LocalSnapshot::new(tmp.path());
        let a = player("a", 2);
        snap.save(&[a.clone()]).unwrap();

        // A crash after the next payload landed but before the manifest moved.
        std::fs::write(tmp.path().join("players-2.cbor.zst"), b"partial").unwrap();
        std::fs::write(tmp.path().join("manifest.json.tmp"), b"{").unwrap();

        let all = snap.load_all().unwrap();
        assert_eq!(all[&a.progress.id], a);
        let b = player("b", 1);
        snap.save(&[b]).unwrap();
        assert_eq!(snap.load_all().unwrap().len(), 2);
    }

    #[test]
    fn schema_mismatch_fails_closed() {
        let tmp = tempfile::tempdir().unwrap();
        let snap = LocalSnapshot::new(tmp.path());
        snap.save(&[player("a", 2)]).unwrap();

        let path = tmp.path().join(MANIFEST_FILE);
        let mut manifest: SnapshotManifest =
            serde_json::from_reader(std::fs::File::open(&path).unwrap()).unwrap();
        manifest.schema_version = 999;
        serde_json::to_writer_pretty(std::fs::File::create(&path).unwrap(), &manifest).unwrap();

        match snap.load_all() {
            Err(StoreError::SchemaMismatch {
                file_version,
                expected_version,
            }) => {
                assert_eq!(file_version, 999);
                assert_eq!(expected_version, SNAPSHOT_SCHEMA_VERSION);
            }
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
    }

    #[test]
    fn manifest_cannot_point_outside_the_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let snap = LocalSnapshot::new(tmp.path());
        snap.save(&[player("a", 2)]).unwrap();

        let path = tmp.path().join(MANIFEST_FILE);
        let mut manifest: SnapshotManifest =
            serde_json::from_reader(std::fs::File::open(&path).unwrap()).unwrap();
        manifest.payload = "../players-1.cbor.zst".into();
        serde_json::to_writer_pretty(std::fs::File::create(&path).unwrap(), &manifest).unwrap();
        assert!(matches!(snap.load_all(), Err(StoreError::Malformed(_))));
    }

    #[test]
    fn clear_removes_files() {
        let tmp = tempfile::tempdir().unwrap();
        let snap = LocalSnapshot::new(tmp.path());
        snap.save(&[player("a", 2)]).unwrap();
        assert!(snap.exists());
        snap.clear().unwrap();
        assert!(!snap.exists());
        assert!(snap.load_all().unwrap().is_empty());
        assert!(files(tmp.path()).is_empty());
    }
}
