use std::collections::HashMap;

use pagegen_core::ids::{JobId, UnitId};

/// Tracks which generation job currently owns each unit.
///
/// At most one job per unit: acquisition is first-wins and release is
/// idempotent.
#[derive(Debug, Default)]
pub(crate) struct JobRegistry {
    owners: HashMap<UnitId, JobId>,
}

impl JobRegistry {
    /// Claims a unit for a job. Returns false when another job already
    /// owns it.
    pub(crate) fn try_acquire(&mut self, unit_id: &UnitId, job_id: &JobId) -> bool {
        if self.owners.contains_key(unit_id) {
            return false;
        }
        self.owners.insert(unit_id.clone(), job_id.clone());
        true
    }

    /// Releases a unit. Releasing an unowned unit is a no-op.
    pub(crate) fn release(&mut self, unit_id: &UnitId) {
        self.owners.remove(unit_id);
    }

    /// Re-keys every unit owned by `from` to `to`, without releasing.
    /// Used once the backend assigns the real job id over the provisional
    /// one minted at acquisition time.
    pub(crate) fn rebind(&mut self, from: &JobId, to: &JobId) {
        if from == to {
            return;
        }
        for owner in self.owners.values_mut() {
            if owner == from {
                *owner = to.clone();
            }
        }
    }

    pub(crate) fn is_active(&self, unit_id: &UnitId) -> bool {
        self.owners.contains_key(unit_id)
    }

    pub(crate) fn job_for(&self, unit_id: &UnitId) -> Option<&JobId> {
        self.owners.get(unit_id)
    }

    /// Units owned by a job, sorted for stable reporting.
    pub(crate) fn units_owned_by(&self, job_id: &JobId) -> Vec<UnitId> {
        let mut units: Vec<UnitId> = self
            .owners
            .iter()
            .filter_map(|(unit, owner)| (owner == job_id).then(|| unit.clone()))
            .collect();
        units.sort();
        units
    }

    /// Every unit with a job in flight, sorted.
    pub(crate) fn active_units(&self) -> Vec<UnitId> {
        let mut units: Vec<UnitId> = self.owners.keys().cloned().collect();
        units.sort();
        units
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(s: &str) -> UnitId {
        UnitId::from_str(s)
    }

    fn job(s: &str) -> JobId {
        JobId::from_str(s)
    }

    #[test]
    fn test_acquire_is_first_wins() {
        let mut registry = JobRegistry::default();
        assert!(registry.try_acquire(&unit("u1"), &job("j1")));
        assert!(!registry.try_acquire(&unit("u1"), &job("j2")));
        assert_eq!(registry.job_for(&unit("u1")), Some(&job("j1")));
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut registry = JobRegistry::default();
        registry.try_acquire(&unit("u1"), &job("j1"));
        registry.release(&unit("u1"));
        registry.release(&unit("u1"));
        assert!(!registry.is_active(&unit("u1")));
        assert!(registry.try_acquire(&unit("u1"), &job("j2")));
    }

    #[test]
    fn test_rebind_moves_every_owned_unit() {
        let mut registry = JobRegistry::default();
        registry.try_acquire(&unit("u1"), &job("provisional"));
        registry.try_acquire(&unit("u2"), &job("provisional"));
        registry.try_acquire(&unit("u3"), &job("other"));

        registry.rebind(&job("provisional"), &job("server-1"));

        assert_eq!(
            registry.units_owned_by(&job("server-1")),
            vec![unit("u1"), unit("u2")]
        );
        assert_eq!(registry.units_owned_by(&job("other")), vec![unit("u3")]);
        assert!(registry.units_owned_by(&job("provisional")).is_empty());
    }

    #[test]
    fn test_active_units_sorted() {
        let mut registry = JobRegistry::default();
        registry.try_acquire(&unit("u3"), &job("j1"));
        registry.try_acquire(&unit("u1"), &job("j1"));
        assert_eq!(registry.active_units(), vec![unit("u1"), unit("u3")]);
    }
}
