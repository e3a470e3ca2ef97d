//! Persistent, content-addressed cache of every simulated curve.
//!
//! One JSON record per [`Fingerprint`] lives under the knowledge base
//! directory as `<hex>.json`. The store is shared by every calibration run so
//! that simulations accumulate across targets; it assumes a single writer
//! process at a time.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sf_types::{CalResult, Curve, Fingerprint, KnowledgeError, ParameterSet};
use tracing::{debug, info, warn};

/// Cache version assumed for records that predate versioning.
pub const LEGACY_CACHE_VERSION: u32 = 1;

const RECORD_EXTENSION: &str = "json";

fn legacy_cache_version() -> u32 {
    LEGACY_CACHE_VERSION
}

/// On-disk layout of one knowledge record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KnowledgeRecord {
    #[serde(default = "legacy_cache_version")]
    cache_version: u32,
    parameters: ParameterSet,
    strain: Vec<f64>,
    stress: Vec<f64>,
}

/// A cached (parameters, curve) pair together with its identity.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeEntry {
    pub fingerprint: Fingerprint,
    pub parameters: ParameterSet,
    pub curve: Curve,
}

/// File-backed knowledge base.
#[derive(Debug)]
pub struct KnowledgeStore {
    root: PathBuf,
    cache_version: u32,
    stats: RwLock<KnowledgeStats>,
}

impl KnowledgeStore {
    /// Open (creating if needed) the knowledge base rooted at `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> CalResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| KnowledgeError::Unavailable {
            path: root.display().to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            root,
            cache_version: LEGACY_CACHE_VERSION,
            stats: RwLock::new(KnowledgeStats::default()),
        })
    }

    /// Only records written under `version` are visible. Bumping the version
    /// invalidates everything cached before it without deleting files.
    pub fn with_cache_version(mut self, version: u32) -> Self {
        self.cache_version = version;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache_version(&self) -> u32 {
        self.cache_version
    }

    /// Where the record for `fingerprint` lives.
    pub fn record_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root
            .join(format!("{}.{}", fingerprint.to_hex(), RECORD_EXTENSION))
    }

    /// Persist `curve` for `params`, replacing any previous record with the
    /// same fingerprint. The record is written to a temporary file and renamed
    /// into place so a crash never leaves a truncated record behind.
    pub fn put(&self, params: &ParameterSet, curve: &Curve) -> CalResult<Fingerprint> {
        let fingerprint = params.fingerprint();
        let record = KnowledgeRecord {
            cache_version: self.cache_version,
            parameters: params.clone(),
            strain: curve.strains(),
            stress: curve.stresses(),
        };

        let path = self.record_path(&fingerprint);
        let tmp_path = path.with_extension(format!("{RECORD_EXTENSION}.tmp"));
        let body = serde_json::to_vec_pretty(&record)?;
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&body)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;

        {
            let mut stats = self.stats.write();
            stats.stores += 1;
        }

        info!(fingerprint = %fingerprint.short(), samples = curve.len(), "stored result in knowledge base");
        Ok(fingerprint)
    }

    /// Look up the curve cached for `params`. A missing, corrupt, foreign
    /// (different cache version) or colliding record is reported as a miss.
    pub fn get(&self, params: &ParameterSet) -> CalResult<Option<Curve>> {
        let fingerprint = params.fingerprint();
        let path = self.record_path(&fingerprint);

        let found = match self.read_record(&path) {
            Ok(Some(record)) if record.cache_version != self.cache_version => {
                debug!(
                    fingerprint = %fingerprint.short(),
                    record_version = record.cache_version,
                    store_version = self.cache_version,
                    "ignoring record from another cache version"
                );
                None
            }
            Ok(Some(record)) if record.parameters != *params => {
                let err = KnowledgeError::FingerprintMismatch {
                    fingerprint: fingerprint.to_hex(),
                };
                warn!("{err}");
                None
            }
            Ok(Some(record)) => match Curve::from_columns(record.strain, record.stress) {
                Ok(curve) => Some(curve),
                Err(e) => {
                    warn!(path = %path.display(), "skipping malformed knowledge record: {e}");
                    self.stats.write().skipped += 1;
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("{e}");
                self.stats.write().skipped += 1;
                None
            }
        };

        {
            let mut stats = self.stats.write();
            if found.is_some() {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
        }

        if found.is_some() {
            info!(fingerprint = %fingerprint.short(), "cache hit in knowledge base");
        }
        Ok(found)
    }

    /// Every visible record. Order is unspecified. Unreadable records are
    /// logged and skipped so one bad file never blocks a warm start.
    pub fn list_all(&self) -> CalResult<Vec<KnowledgeEntry>> {
        let mut entries = Vec::new();

        for dir_entry in fs::read_dir(&self.root)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }

            let record = match self.read_record(&path) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    warn!("{e}");
                    self.stats.write().skipped += 1;
                    continue;
                }
            };

            if record.cache_version != self.cache_version {
                continue;
            }

            match Curve::from_columns(record.strain, record.stress) {
                Ok(curve) => entries.push(KnowledgeEntry {
                    fingerprint: record.parameters.fingerprint(),
                    parameters: record.parameters,
                    curve,
                }),
                Err(e) => {
                    warn!(path = %path.display(), "skipping malformed knowledge record: {e}");
                    self.stats.write().skipped += 1;
                }
            }
        }

        debug!(count = entries.len(), root = %self.root.display(), "enumerated knowledge base");
        Ok(entries)
    }

    fn read_record(&self, path: &Path) -> Result<Option<KnowledgeRecord>, KnowledgeError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(KnowledgeError::Corrupt {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })
            }
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| KnowledgeError::Corrupt {
                path: path.display().to_string(),
                message: e.to_string(),
            })
    }

    pub fn get_stats(&self) -> KnowledgeStats {
        self.stats.read().clone()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnowledgeStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    /// Records that could not be read or decoded.
    pub skipped: u64,
}

impl KnowledgeStats {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_types::{EMOD, KRATIO, PB_COH, PB_EMOD, PB_FRIC, PB_TEN};

    fn params(emod: f64) -> ParameterSet {
        ParameterSet::new()
            .with(EMOD, emod)
            .unwrap()
            .with(KRATIO, 2.0)
            .unwrap()
    }

    fn curve(scale: f64) -> Curve {
        Curve::from_columns(
            vec![0.0, 0.001, 0.002, 0.003, 0.004, 0.005],
            vec![0.0, 10.0, 20.0, 28.0, 33.0, 35.0]
                .into_iter()
                .map(|s| s * scale)
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeStore::open(dir.path()).unwrap();
        let p = params(1.234_567_890_123e10);
        let c = curve(1.0);

        assert!(store.get(&p).unwrap().is_none());
        let fingerprint = store.put(&p, &c).unwrap();
        assert!(dir.path().join(format!("{}.json", fingerprint)).exists());
        assert_eq!(store.get(&p).unwrap(), Some(c));

        let stats = store.get_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.stores, 1);
    }

    #[test]
    fn put_overwrites_same_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeStore::open(dir.path()).unwrap();
        let p = params(1e10);

        store.put(&p, &curve(1.0)).unwrap();
        store.put(&p, &curve(2.0)).unwrap();

        assert_eq!(store.get(&p).unwrap(), Some(curve(2.0)));
        assert_eq!(store.list_all().unwrap().len(), 1);
        // no temporary files left behind
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn list_all_skips_malformed_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeStore::open(dir.path()).unwrap();
        store.put(&params(1e10), &curve(1.0)).unwrap();
        store.put(&params(2e10), &curve(1.5)).unwrap();

        fs::write(dir.path().join("garbage.json"), b"{ not json").unwrap();
        fs::write(
            dir.path().join("uneven.json"),
            br#"{"parameters":{"emod":1.0},"strain":[0.0,1.0],"stress":[0.0]}"#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let entries = store.list_all().unwrap();
        assert_eq!(entries.len(), 2);
        for entry in &entries {
            assert_eq!(entry.fingerprint, entry.parameters.fingerprint());
        }
        assert_eq!(store.get_stats().skipped, 2);
    }

    #[test]
    fn reads_records_without_cache_version_as_legacy() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeStore::open(dir.path()).unwrap();
        fs::write(
            dir.path().join("legacy.json"),
            br#"{"parameters":{"emod":1e10,"kratio":2.0},"strain":[0.0,0.1],"stress":[0.0,5.0]}"#,
        )
        .unwrap();

        let entries = store.list_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].curve.len(), 2);
    }

    #[test]
    fn hits_records_written_by_python_tooling() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeStore::open(dir.path()).unwrap();
        // json.dumps(params, sort_keys=True) hashed with sha256
        let name = "6599b136170fb10ffd0dbe000835b7c24353aae1e49fd903d6bb3400009922ce.json";
        fs::write(
            dir.path().join(name),
            r#"{
    "parameters": {
        "emod": 10000000000.0,
        "kratio": 2.0,
        "pb_emod": 50000000000.0,
        "pb_fric": 0.5,
        "pb_coh": 50000000.0,
        "pb_ten": 50000000.0
    },
    "strain": [0.0, 0.001, 0.002, 0.003, 0.004],
    "stress": [0.0, 10.0, 20.0, 28.0, 33.0]
}"#,
        )
        .unwrap();

        let p = ParameterSet::from_pairs([
            (PB_TEN, 5e7),
            (PB_COH, 5e7),
            (PB_FRIC, 0.5),
            (PB_EMOD, 5e10),
            (KRATIO, 2.0),
            (EMOD, 1e10),
        ])
        .unwrap();
        let cached = store.get(&p).unwrap().expect("legacy record should hit");
        assert_eq!(cached.len(), 5);

        store.put(&p, &cached).unwrap();
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[test]
    fn cache_version_bump_hides_old_records() {
        let dir = tempfile::tempdir().unwrap();
        let p = params(1e10);
        KnowledgeStore::open(dir.path())
            .unwrap()
            .put(&p, &curve(1.0))
            .unwrap();

        let bumped = KnowledgeStore::open(dir.path())
            .unwrap()
            .with_cache_version(2);
        assert!(bumped.get(&p).unwrap().is_none());
        assert!(bumped.list_all().unwrap().is_empty());

        bumped.put(&p, &curve(3.0)).unwrap();
        assert_eq!(bumped.get(&p).unwrap(), Some(curve(3.0)));
    }

    #[test]
    fn colliding_record_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeStore::open(dir.path()).unwrap();
        let p = params(1e10);
        let path = store.record_path(&p.fingerprint());
        fs::write(
            &path,
            br#"{"parameters":{"emod":9.0},"strain":[0.0],"stress":[0.0]}"#,
        )
        .unwrap();

        assert!(store.get(&p).unwrap().is_none());
    }

    #[test]
    fn empty_store_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeStore::open(dir.path().join("nested/kb")).unwrap();
        assert!(store.list_all().unwrap().is_empty());
        assert_eq!(store.get_stats().hit_rate(), 0.0);
    }
}
