//! Per-thread state of each device handle.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Weak;

use tensordev_core::{DeviceError, Result, StreamHandle, WorkspacePool};
use tracing::debug;

/// What one thread remembers for one handle.
pub(crate) struct CudaThreadEntry {
    /// Dead once the handle is dropped on any thread.
    pub owner: Weak<()>,
    pub stream: Option<StreamHandle>,
    pub pool: WorkspacePool,
}

thread_local! {
    // Dropped at thread exit, which releases every workspace page.
    static ENTRIES: RefCell<HashMap<u64, CudaThreadEntry>> = RefCell::new(HashMap::new());
}

/// Run `f` on the calling thread's entry for `handle_id`, creating it with
/// `init` on first use.
pub(crate) fn with_entry<R>(
    handle_id: u64,
    init: impl FnOnce() -> CudaThreadEntry,
    f: impl FnOnce(&mut CudaThreadEntry) -> R,
) -> Result<R> {
    ENTRIES
        .try_with(|entries| {
            let stale = take_stale(&mut entries.borrow_mut());
            drop(stale);
            let mut entries = entries.borrow_mut();
            let entry = entries.entry(handle_id).or_insert_with(init);
            f(entry)
        })
        .map_err(|_| DeviceError::usage("thread-local device state accessed during thread teardown"))
}

/// Entries whose handle has been dropped elsewhere. Their pools release
/// their pages when the returned entries are dropped.
fn take_stale(entries: &mut HashMap<u64, CudaThreadEntry>) -> Vec<CudaThreadEntry> {
    let stale: Vec<u64> = entries
        .iter()
        .filter(|(_, e)| e.owner.strong_count() == 0)
        .map(|(&id, _)| id)
        .collect();
    if !stale.is_empty() {
        debug!("releasing thread state of {} dropped handle(s)", stale.len());
    }
    stale.iter().filter_map(|id| entries.remove(id)).collect()
}

/// Current stream recorded for `handle_id`, without creating an entry.
pub(crate) fn current_stream(handle_id: u64) -> Option<StreamHandle> {
    ENTRIES
        .try_with(|entries| entries.borrow().get(&handle_id).and_then(|e| e.stream))
        .ok()
        .flatten()
}

/// Drop the calling thread's entry for `handle_id`, if any.
pub(crate) fn remove(handle_id: u64) {
    let removed = ENTRIES
        .try_with(|entries| entries.borrow_mut().remove(&handle_id))
        .ok()
        .flatten();
    // Released outside the borrow; page release may log.
    drop(removed);
}
