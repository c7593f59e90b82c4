use super::State;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

/// Conversation state per chat user. Lives in memory only: a restart puts
/// every user back to `Idle`.
#[derive(Clone, Default)]
pub struct SessionStore {
    states: Arc<Mutex<HashMap<i64, State>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, user_id: i64) -> State {
        let guard = self.states.lock().await;
        guard.get(&user_id).cloned().unwrap_or_default()
    }

    pub async fn set(&self, user_id: i64, state: State) {
        let mut guard = self.states.lock().await;
        if matches!(state, State::Idle) {
            guard.remove(&user_id);
        } else {
            guard.insert(user_id, state);
        }
    }

    pub async fn active(&self) -> usize {
        self.states.lock().await.len()
    }
}
