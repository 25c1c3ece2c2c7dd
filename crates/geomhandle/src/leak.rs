//! Debug-only tally of live owned wrappers
//!
//! Native frees happen deterministically on drop or `dispose()`. This module
//! only counts: every transition into the owned state increments the tally
//! and every free or release decrements it. Release builds compile all of it
//! away and [`outstanding`] always returns zero.

#[cfg(debug_assertions)]
use std::cell::Cell;

use tracing::warn;

#[cfg(debug_assertions)]
thread_local! {
    static LIVE_OWNED: Cell<usize> = const { Cell::new(0) };
}

pub(crate) fn track_owned() {
    #[cfg(debug_assertions)]
    LIVE_OWNED.with(|live| live.set(live.get() + 1));
}

pub(crate) fn untrack_owned() {
    #[cfg(debug_assertions)]
    LIVE_OWNED.with(|live| live.set(live.get().saturating_sub(1)));
}

/// Number of owned wrappers alive on this thread.
pub fn outstanding() -> usize {
    #[cfg(debug_assertions)]
    {
        LIVE_OWNED.with(Cell::get)
    }
    #[cfg(not(debug_assertions))]
    {
        0
    }
}

/// Scope guard that warns when owned wrappers created inside the scope are
/// still alive when it ends.
///
/// # Example
///
/// ```
/// use geomhandle::leak::LeakCheck;
///
/// let check = LeakCheck::new("import");
/// // ... create and drop wrappers ...
/// assert_eq!(check.leaked(), 0);
/// ```
#[derive(Debug)]
pub struct LeakCheck {
    label: &'static str,
    baseline: usize,
}

impl LeakCheck {
    /// Start counting from the current tally.
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            baseline: outstanding(),
        }
    }

    /// Owned wrappers created since the check started and not yet freed.
    pub fn leaked(&self) -> usize {
        outstanding().saturating_sub(self.baseline)
    }
}

impl Drop for LeakCheck {
    fn drop(&mut self) {
        let leaked = self.leaked();
        if leaked > 0 {
            warn!(scope = self.label, leaked, "owned wrappers outlived their scope");
        }
    }
}
