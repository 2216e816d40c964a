use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;

/// How long a `typing=true` signal stays active without a follow-up.
pub const TYPING_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Default)]
struct Entry {
    typing: bool,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

type Entries = Mutex<HashMap<String, Entry>>; // sender_id -> entry

/// Per-sender typing flags with auto-expiry. Timers belong to the tracker
/// and are aborted when it is dropped.
pub struct TypingTracker {
    entries: Arc<Entries>,
    timeout: Duration,
}

impl TypingTracker {
    pub fn new(timeout: Duration) -> Self {
        TypingTracker {
            entries: Arc::default(),
            timeout,
        }
    }

    /// `true` sets the flag and (re)arms the expiry timer, `false` clears
    /// both immediately.
    pub fn apply(&self, sender_id: &str, is_typing: bool) {
        let mut entries = lock(&self.entries);
        let entry = entries.entry(sender_id.to_string()).or_default();
        if let Some(timer) = entry.timer.take() {
            timer.abort();
        }
        entry.generation += 1;
        entry.typing = is_typing;

        if is_typing {
            entry.timer = Some(spawn_expiry(
                Arc::downgrade(&self.entries),
                sender_id.to_string(),
                entry.generation,
                self.timeout,
            ));
        }
    }

    pub fn is_typing(&self, sender_id: &str) -> bool {
        lock(&self.entries).get(sender_id).is_some_and(|e| e.typing)
    }
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self::new(TYPING_TIMEOUT)
    }
}

impl Drop for TypingTracker {
    fn drop(&mut self) {
        for entry in lock(&self.entries).values_mut() {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
        }
    }
}

fn lock(entries: &Entries) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

fn spawn_expiry(
    entries: Weak<Entries>,
    sender_id: String,
    generation: u64,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let Some(entries) = entries.upgrade() else {
            return;
        };
        let mut entries = lock(&entries);
        if let Some(entry) = entries.get_mut(&sender_id) {
            // a newer signal owns the flag now
            if entry.generation == generation {
                entry.typing = false;
                entry.timer = None;
            }
        }
    })
}
