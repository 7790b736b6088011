//! In-flight dedup guard.
//!
//! One process-wide set of knowledge ids currently inside a stage attempt,
//! shared by both stages. A claim is held for exactly one attempt and
//! released when the returned [`InFlightClaim`] drops, including on panic.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct InFlightGuard {
    ids: Arc<Mutex<HashSet<Uuid>>>,
}

impl InFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<Uuid>> {
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim `id` for one attempt. Returns `None` if another attempt holds it.
    pub fn try_claim(&self, id: Uuid) -> Option<InFlightClaim> {
        if self.lock().insert(id) {
            Some(InFlightClaim {
                guard: self.clone(),
                id,
            })
        } else {
            None
        }
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.lock().contains(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Held while an attempt runs.
#[derive(Debug)]
pub struct InFlightClaim {
    guard: InFlightGuard,
    id: Uuid,
}

impl InFlightClaim {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.guard.lock().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_claim_is_rejected() {
        let guard = InFlightGuard::new();
        let id = Uuid::new_v4();

        let claim = guard.try_claim(id);
        assert!(claim.is_some());
        assert!(guard.try_claim(id).is_none());
        assert!(guard.contains(id));
    }

    #[test]
    fn test_claim_released_on_drop() {
        let guard = InFlightGuard::new();
        let id = Uuid::new_v4();

        {
            let _claim = guard.try_claim(id).unwrap();
            assert_eq!(guard.len(), 1);
        }

        assert!(guard.is_empty());
        assert!(guard.try_claim(id).is_some());
    }

    #[test]
    fn test_distinct_ids_do_not_conflict() {
        let guard = InFlightGuard::new();
        let a = guard.try_claim(Uuid::new_v4()).unwrap();
        let b = guard.try_claim(Uuid::new_v4()).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(guard.len(), 2);
    }

    #[test]
    fn test_concurrent_claims_admit_one() {
        let guard = InFlightGuard::new();
        let id = Uuid::new_v4();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = guard.clone();
                std::thread::spawn(move || guard.try_claim(id).map(std::mem::forget).is_some())
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(admitted, 1);
    }
}
