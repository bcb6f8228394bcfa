//! Durable start timestamps for in-flight generation, so elapsed-time
//! display survives a process restart.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use pagegen_core::ids::UnitId;

pub(crate) struct ElapsedTimeLedger {
    path: Option<PathBuf>,
    started_at_ms: BTreeMap<UnitId, i64>,
}

impl ElapsedTimeLedger {
    /// Loads the ledger. A missing file starts empty; a corrupt one is
    /// logged and discarded rather than failing engine construction.
    pub(crate) fn load(path: Option<PathBuf>) -> Self {
        let started_at_ms = match &path {
            Some(p) if p.exists() => match fs::read(p) {
                Ok(bytes) => match serde_json::from_slice(&bytes) {
                    Ok(map) => map,
                    Err(e) => {
                        tracing::warn!(
                            path = %p.display(),
                            error = %e,
                            "elapsed-time ledger corrupt, starting empty"
                        );
                        BTreeMap::new()
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %p.display(),
                        error = %e,
                        "elapsed-time ledger unreadable, starting empty"
                    );
                    BTreeMap::new()
                }
            },
            _ => BTreeMap::new(),
        };
        Self {
            path,
            started_at_ms,
        }
    }

    /// Records when generation started. First write wins: a resubmission
    /// (or a restart mid-job) keeps the original start time.
    pub(crate) fn record_start(&mut self, unit_id: &UnitId, now_ms: i64) {
        if self.started_at_ms.contains_key(unit_id) {
            return;
        }
        self.started_at_ms.insert(unit_id.clone(), now_ms);
        self.persist();
    }

    pub(crate) fn clear(&mut self, unit_id: &UnitId) {
        if self.started_at_ms.remove(unit_id).is_some() {
            self.persist();
        }
    }

    pub(crate) fn started_at(&self, unit_id: &UnitId) -> Option<i64> {
        self.started_at_ms.get(unit_id).copied()
    }

    /// Whole seconds since generation started, clamped at zero.
    pub(crate) fn elapsed_seconds(&self, unit_id: &UnitId, now_ms: i64) -> Option<i64> {
        self.started_at(unit_id).map(|t0| ((now_ms - t0) / 1000).max(0))
    }

    /// Drops every entry the predicate rejects. Used to purge entries
    /// whose unit is gone and has no live job.
    pub(crate) fn retain<F: FnMut(&UnitId) -> bool>(&mut self, mut keep: F) {
        let before = self.started_at_ms.len();
        self.started_at_ms.retain(|unit_id, _| keep(unit_id));
        if self.started_at_ms.len() != before {
            self.persist();
        }
    }

    /// Best-effort rewrite of the whole map. Failure is logged, never
    /// fatal: the ledger is display-only.
    fn persist(&self) {
        let Some(path) = &self.path else { return };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = fs::create_dir_all(parent) {
                    tracing::warn!(path = %path.display(), error = %e, "cannot create ledger directory");
                    return;
                }
            }
        }
        let json = match serde_json::to_vec_pretty(&self.started_at_ms) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "cannot encode elapsed-time ledger");
                return;
            }
        };
        if let Err(e) = fs::write(path, json) {
            tracing::warn!(path = %path.display(), error = %e, "cannot write elapsed-time ledger");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(s: &str) -> UnitId {
        UnitId::from_str(s)
    }

    #[test]
    fn test_record_start_is_first_wins() {
        let mut ledger = ElapsedTimeLedger::load(None);
        ledger.record_start(&unit("u1"), 1_000);
        ledger.record_start(&unit("u1"), 9_000);
        assert_eq!(ledger.started_at(&unit("u1")), Some(1_000));
    }

    #[test]
    fn test_elapsed_seconds_floors_and_clamps() {
        let mut ledger = ElapsedTimeLedger::load(None);
        ledger.record_start(&unit("u1"), 10_000);
        assert_eq!(ledger.elapsed_seconds(&unit("u1"), 41_900), Some(31));
        assert_eq!(ledger.elapsed_seconds(&unit("u1"), 9_000), Some(0));
        assert_eq!(ledger.elapsed_seconds(&unit("missing"), 41_900), None);
    }

    #[test]
    fn test_survives_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elapsed.json");
        {
            let mut ledger = ElapsedTimeLedger::load(Some(path.clone()));
            ledger.record_start(&unit("u1"), 5_000);
            ledger.record_start(&unit("u2"), 6_000);
            ledger.clear(&unit("u2"));
        }
        let reloaded = ElapsedTimeLedger::load(Some(path));
        assert_eq!(reloaded.started_at(&unit("u1")), Some(5_000));
        assert_eq!(reloaded.started_at(&unit("u2")), None);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elapsed.json");
        fs::write(&path, b"not json {{{{").unwrap();
        let ledger = ElapsedTimeLedger::load(Some(path.clone()));
        assert_eq!(ledger.started_at(&unit("u1")), None);
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ElapsedTimeLedger::load(Some(dir.path().join("never-written.json")));
        assert_eq!(ledger.started_at(&unit("u1")), None);
    }

    #[test]
    fn test_retain_purges_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elapsed.json");
        let mut ledger = ElapsedTimeLedger::load(Some(path.clone()));
        ledger.record_start(&unit("gone"), 1_000);
        ledger.record_start(&unit("kept"), 2_000);

        ledger.retain(|unit_id| unit_id.as_str() == "kept");
        assert_eq!(ledger.started_at(&unit("gone")), None);

        let reloaded = ElapsedTimeLedger::load(Some(path));
        assert_eq!(reloaded.started_at(&unit("gone")), None);
        assert_eq!(reloaded.started_at(&unit("kept")), Some(2_000));
    }
}
