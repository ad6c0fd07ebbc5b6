//! Shared, lock-guarded client state.

use crate::client::action::Action;
use crate::client::reducer::reduce;
use crate::client::state::{ClientState, EnvironmentState};
use parking_lot::RwLock;

/// Applies actions one at a time, in the order they are dispatched
#[derive(Default)]
pub struct ClientStateStore {
    state: RwLock<ClientState>,
}

impl ClientStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch(&self, action: Action) {
        let mut state = self.state.write();
        let current = std::mem::take(&mut *state);
        *state = reduce(current, action);
    }

    pub fn dispatch_all(&self, actions: impl IntoIterator<Item = Action>) {
        let mut state = self.state.write();
        for action in actions {
            let current = std::mem::take(&mut *state);
            *state = reduce(current, action);
        }
    }

    pub fn snapshot(&self) -> ClientState {
        self.state.read().clone()
    }

    pub fn env(&self, env_id: &str) -> Option<EnvironmentState> {
        self.state.read().env_map.get(env_id).cloned()
    }

    /// Read through the lock without cloning the whole state
    pub fn with<R>(&self, f: impl FnOnce(&ClientState) -> R) -> R {
        f(&self.state.read())
    }
}
