//! Typing indicator state.
//!
//! [`TypingTracker`] holds two independent pieces of state:
//!
//! - the set of remote users currently typing, driven by inbound `typing`
//!   and `stop_typing` events;
//! - the local typing episode: a single timer slot that is armed by the
//!   first keystroke of a burst, re-armed by every later one, and cleared
//!   when the timer fires or the episode is stopped or cancelled.
//!
//! The tracker does not emit anything itself. It tells the caller when a
//! `typing` or `stop_typing` emission is due, and the caller emits it while
//! still holding the session lock so emissions stay ordered.
//!
//! Every armed timer carries a generation number. A timer whose generation
//! no longer matches the slot (because it was re-armed or cancelled while
//! the timer task was already running) expires without effect.

use std::collections::BTreeSet;

use tokio::task::JoinHandle;

use bookchat_proto::message::UserId;
use bookchat_proto::scope::RoomScope;

#[derive(Debug)]
struct LocalTyping {
    scope: RoomScope,
    generation: u64,
    timer: JoinHandle<()>,
}

/// Remote typing set plus the local debounce slot.
#[derive(Debug, Default)]
pub struct TypingTracker {
    remote: BTreeSet<UserId>,
    local: Option<LocalTyping>,
    generation: u64,
}

impl TypingTracker {
    /// Creates a tracker with nobody typing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `user` started typing. Returns `true` if the set changed.
    pub fn on_remote_typing_start(&mut self, user: UserId) -> bool {
        self.remote.insert(user)
    }

    /// Records that `user` stopped typing. Returns `true` if the set changed.
    pub fn on_remote_typing_stop(&mut self, user: &UserId) -> bool {
        self.remote.remove(user)
    }

    /// Remote users currently typing, sorted by id.
    #[must_use]
    pub fn remote_typists(&self) -> Vec<UserId> {
        self.remote.iter().cloned().collect()
    }

    /// Whether `user` is currently typing.
    #[must_use]
    pub fn is_typing(&self, user: &UserId) -> bool {
        self.remote.contains(user)
    }

    /// Whether a local typing episode is in progress.
    #[must_use]
    pub const fn is_local_typing(&self) -> bool {
        self.local.is_some()
    }

    /// Registers a local keystroke.
    ///
    /// `arm` is called with the new generation and must spawn the timer
    /// task that later calls [`expire_local`](Self::expire_local) with it.
    /// Any previously armed timer is aborted. Returns `true` if this
    /// keystroke starts a new episode, meaning a `typing` emission is due.
    pub fn start_local(
        &mut self,
        scope: RoomScope,
        arm: impl FnOnce(u64) -> JoinHandle<()>,
    ) -> bool {
        self.generation += 1;
        let generation = self.generation;
        let timer = arm(generation);

        match self.local.replace(LocalTyping {
            scope,
            generation,
            timer,
        }) {
            Some(previous) => {
                previous.timer.abort();
                false
            }
            None => true,
        }
    }

    /// Called by the timer task for `generation` once the inactivity window
    /// elapsed. Returns the scope to send `stop_typing` for, or `None` if
    /// the timer is stale.
    pub fn expire_local(&mut self, generation: u64) -> Option<RoomScope> {
        if self.local.as_ref()?.generation != generation {
            return None;
        }
        self.local.take().map(|local| local.scope)
    }

    /// Ends the local episode early. Returns the scope to send
    /// `stop_typing` for, or `None` if no episode was in progress.
    pub fn stop_local(&mut self) -> Option<RoomScope> {
        let local = self.local.take()?;
        local.timer.abort();
        Some(local.scope)
    }

    /// Drops the local episode without a `stop_typing` emission.
    pub fn cancel_local(&mut self) {
        if let Some(local) = self.local.take() {
            local.timer.abort();
        }
    }
}

impl Drop for TypingTracker {
    fn drop(&mut self) {
        self.cancel_local();
    }
}
