use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

/// Lock table handing out one mutex per key. Distinct keys never contend.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    table: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &K) -> Arc<Mutex<()>> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.entry(key.clone()).or_default().clone()
    }

    /// Run `section` while holding the lock for `key`.
    ///
    /// A panic inside a previous section does not wedge the key: the guarded data is `()`,
    /// so a poisoned mutex is simply reclaimed.
    pub fn with<T>(&self, key: &K, section: impl FnOnce() -> T) -> T {
        let mutex = self.slot(key);
        let result = {
            let _guard = mutex.lock().unwrap_or_else(PoisonError::into_inner);
            section()
        };
        self.release(key, mutex);
        result
    }

    // Slots are only cloned under the table lock, so a count of two (table + ours)
    // means no other caller is waiting on this key.
    fn release(&self, key: &K, mutex: Arc<Mutex<()>>) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(&mutex) == 2 {
            table.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
