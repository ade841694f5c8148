//! Optimistic local updates with rollback.
//!
//! The local change is visible immediately; if the remote write fails the
//! change is undone and the error is passed on.

use crate::Result;

/// Apply `apply` to `state`, run `remote`, and run `revert` if it fails
pub fn apply<S, T, A, V, F>(state: &mut S, apply: A, revert: V, remote: F) -> Result<T>
where
    A: FnOnce(&mut S),
    V: FnOnce(&mut S),
    F: FnOnce() -> Result<T>,
{
    apply(state);
    match remote() {
        Ok(value) => Ok(value),
        Err(e) => {
            revert(state);
            tracing::warn!("Remote write failed, local change rolled back: {}", e);
            Err(e)
        }
    }
}

/// Like [`apply`], restoring a snapshot taken beforehand instead of an explicit revert
pub fn apply_snapshot<S, T, A, F>(state: &mut S, apply: A, remote: F) -> Result<T>
where
    S: Clone,
    A: FnOnce(&mut S),
    F: FnOnce() -> Result<T>,
{
    let snapshot = state.clone();
    self::apply(state, apply, move |s| *s = snapshot, remote)
}
