use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async guard per directory record id.
///
/// Serializes the read-modify-write sequences this process runs against the
/// same user record. Other processes are kept out by the conditional write.
#[derive(Default)]
pub struct RecordLocks {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, record_id: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // slots nobody holds or waits on
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            slots.entry(record_id.to_owned()).or_default().clone()
        };
        slot.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or_default()
    }
}
