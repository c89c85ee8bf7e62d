//! Two-phase tentative updates.

use crate::error::Result;

/// A tentative change applied ahead of the remote call that confirms it.
///
/// `begin` snapshots the last known-good value and applies the change; the
/// caller then either commits (dropping the snapshot) or rolls back.
#[must_use = "an optimistic update must be committed or rolled back"]
#[derive(Debug)]
pub struct Optimistic<T: Clone> {
    snapshot: T,
}

impl<T: Clone> Optimistic<T> {
    pub fn begin(state: &mut T, apply: impl FnOnce(&mut T)) -> Self {
        let snapshot = state.clone();
        apply(state);
        Self { snapshot }
    }

    /// The value `state` had before the change.
    pub fn snapshot(&self) -> &T {
        &self.snapshot
    }

    pub fn commit(self) {}

    pub fn rollback(self, state: &mut T) {
        *state = self.snapshot;
    }

    /// Commit on success, roll back on failure, and pass the outcome through.
    pub fn settle<R>(self, state: &mut T, outcome: Result<R>) -> Result<R> {
        match outcome {
            Ok(value) => {
                self.commit();
                Ok(value)
            }
            Err(e) => {
                self.rollback(state);
                Err(e)
            }
        }
    }
}

/// Toggle `id` in a membership list. Returns whether it is now a member.
pub(crate) fn toggle_membership(list: &mut Vec<String>, id: &str) -> bool {
    if let Some(pos) = list.iter().position(|x| x == id) {
        list.remove(pos);
        false
    } else {
        list.push(id.to_string());
        true
    }
}
