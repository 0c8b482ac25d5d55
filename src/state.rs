//! Camera state machine
//!
//! [`CameraState`] is the single current state of the device. Preconditions
//! are expressed as a [`StateMask`], the bitwise union of acceptable states:
//!
//! ```
//! use camera_agent::state::{CameraState, StateMask};
//!
//! let mask = CameraState::Idle | CameraState::Unlocked;
//! assert!(mask.accepts(CameraState::Unlocked));
//! assert!(!mask.accepts(CameraState::Capturing));
//! ```
//!
//! [`StateHolder`] is shared between the handler thread, which is the only
//! writer, and the dispatch thread, which blocks in
//! [`StateHolder::wait_for_states`] to gate the next job. Reads from any other
//! thread are advisory snapshots.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::ops::BitOr;
use tracing::{debug, trace};

/// Discrete camera device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraState {
    /// No device is open
    Unopened,
    /// Device open and ready for commands
    Idle,
    /// Device handed over to another user (e.g. a recorder)
    Unlocked,
    /// A capture is in flight
    Capturing,
    /// An auto-focus sweep is in flight
    Focusing,
}

bitflags::bitflags! {
    /// Set of acceptable [`CameraState`] values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StateMask: u32 {
        const UNOPENED = 1 << 0;
        const IDLE = 1 << 1;
        const UNLOCKED = 1 << 2;
        const CAPTURING = 1 << 3;
        const FOCUSING = 1 << 4;
    }
}

impl CameraState {
    /// All states, in bit order.
    pub const ALL: [CameraState; 5] = [
        CameraState::Unopened,
        CameraState::Idle,
        CameraState::Unlocked,
        CameraState::Capturing,
        CameraState::Focusing,
    ];

    /// The single-bit mask for this state.
    pub fn mask(self) -> StateMask {
        match self {
            CameraState::Unopened => StateMask::UNOPENED,
            CameraState::Idle => StateMask::IDLE,
            CameraState::Unlocked => StateMask::UNLOCKED,
            CameraState::Capturing => StateMask::CAPTURING,
            CameraState::Focusing => StateMask::FOCUSING,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CameraState::Unopened => "unopened",
            CameraState::Idle => "idle",
            CameraState::Unlocked => "unlocked",
            CameraState::Capturing => "capturing",
            CameraState::Focusing => "focusing",
        }
    }
}

impl fmt::Display for CameraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<CameraState> for StateMask {
    fn from(state: CameraState) -> Self {
        state.mask()
    }
}

impl BitOr for CameraState {
    type Output = StateMask;

    fn bitor(self, rhs: Self) -> StateMask {
        self.mask() | rhs.mask()
    }
}

impl BitOr<CameraState> for StateMask {
    type Output = StateMask;

    fn bitor(self, rhs: CameraState) -> StateMask {
        self | rhs.mask()
    }
}

impl StateMask {
    /// True if `state` satisfies this precondition.
    pub fn accepts(self, state: CameraState) -> bool {
        self.intersects(state.mask())
    }
}

/// Holder of the current camera state.
#[derive(Debug)]
pub struct StateHolder {
    inner: Mutex<Inner>,
    changed: Condvar,
}

#[derive(Debug)]
struct Inner {
    state: CameraState,
    /// Cleared on teardown; waiters give up once it is false
    valid: bool,
}

impl Default for StateHolder {
    fn default() -> Self {
        Self::new(CameraState::Unopened)
    }
}

impl StateHolder {
    pub fn new(initial: CameraState) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: initial,
                valid: true,
            }),
            changed: Condvar::new(),
        }
    }

    /// Assign the current state and wake every waiter.
    ///
    /// Only the camera handler thread calls this.
    pub(crate) fn set_state(&self, state: CameraState) {
        let mut inner = self.inner.lock();
        trace!(from = %inner.state, to = %state, "camera state transition");
        inner.state = state;
        self.changed.notify_all();
    }

    /// Snapshot of the current state. May be stale as soon as it returns.
    pub fn state(&self) -> CameraState {
        self.inner.lock().state
    }

    /// Block until the current state is in `mask` and return it.
    ///
    /// Returns `None` once the holder has been
    /// [invalidated](Self::invalidate), whether that happens before or during
    /// the wait. Only the dispatch thread waits here, and the transitions it
    /// waits for happen on the handler thread.
    pub fn wait_for_states(&self, mask: impl Into<StateMask>) -> Option<CameraState> {
        let mask = mask.into();
        let mut inner = self.inner.lock();
        loop {
            if !inner.valid {
                return None;
            }
            if mask.accepts(inner.state) {
                return Some(inner.state);
            }
            self.changed.wait(&mut inner);
        }
    }

    /// Release every current and future waiter. Used on teardown, when the
    /// state a waiter needs may never be reached. Cannot be undone.
    pub fn invalidate(&self) {
        let mut inner = self.inner.lock();
        if inner.valid {
            debug!(state = %inner.state, "camera state holder invalidated");
        }
        inner.valid = false;
        self.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_mask_union() {
        let mask = CameraState::Idle | CameraState::Unlocked;
        assert!(mask.accepts(CameraState::Idle));
        assert!(mask.accepts(CameraState::Unlocked));
        assert!(!mask.accepts(CameraState::Focusing));

        let wider = mask | CameraState::Capturing;
        assert!(wider.accepts(CameraState::Capturing));
    }

    #[test]
    fn test_every_state_has_distinct_bit() {
        let union = CameraState::ALL
            .iter()
            .fold(StateMask::empty(), |acc, s| acc | *s);
        assert_eq!(union, StateMask::all());
        assert_eq!(union.bits().count_ones(), 5);
    }

    #[test]
    fn test_initial_state_is_unopened() {
        assert_eq!(StateHolder::default().state(), CameraState::Unopened);
    }

    #[test]
    fn test_wait_returns_immediately_when_satisfied() {
        let holder = StateHolder::new(CameraState::Idle);
        assert_eq!(
            holder.wait_for_states(CameraState::Idle | CameraState::Unlocked),
            Some(CameraState::Idle)
        );
    }

    #[test]
    fn test_wait_unblocks_on_matching_transition() {
        let holder = Arc::new(StateHolder::new(CameraState::Focusing));
        let waiter = {
            let holder = holder.clone();
            thread::spawn(move || holder.wait_for_states(CameraState::Idle))
        };

        // A non-matching transition must not release the waiter.
        thread::sleep(Duration::from_millis(20));
        holder.set_state(CameraState::Capturing);
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        holder.set_state(CameraState::Idle);
        assert_eq!(waiter.join().unwrap(), Some(CameraState::Idle));
    }

    #[test]
    fn test_invalidate_releases_waiter() {
        let holder = Arc::new(StateHolder::new(CameraState::Unopened));
        let waiter = {
            let holder = holder.clone();
            thread::spawn(move || holder.wait_for_states(CameraState::Idle))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        holder.invalidate();
        assert_eq!(waiter.join().unwrap(), None);
    }

    #[test]
    fn test_invalidated_holder_rejects_satisfied_wait() {
        let holder = StateHolder::new(CameraState::Idle);
        holder.invalidate();
        assert_eq!(holder.wait_for_states(CameraState::Idle), None);
        // Transitions still apply for observers.
        holder.set_state(CameraState::Unopened);
        assert_eq!(holder.state(), CameraState::Unopened);
    }
}
