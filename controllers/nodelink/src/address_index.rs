//! Internal IP → Machine index.
//!
//! Written by the Machine event handlers and read by the reconciler when a
//! Node carries no usable linkage annotation. Last writer wins. Entries are
//! only removed when the Machine is deleted, so a Machine whose InternalIP
//! changes leaves its old address mapped until then.

use crds::Machine;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Mutex-guarded map from internal IP to the Machine last seen reporting it.
///
/// Holds shared snapshots of Machines; it never owns a Machine's lifetime.
#[derive(Debug, Default)]
pub struct AddressIndex {
    machines: Mutex<HashMap<String, Arc<Machine>>>,
}

impl AddressIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Machine>>> {
        self.machines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records (or overwrites) the Machine that claims `ip`.
    pub fn put(&self, ip: impl Into<String>, machine: Arc<Machine>) {
        let ip = ip.into();
        debug!("Indexing machine {:?} under address {}", machine.metadata.name, ip);
        self.lock().insert(ip, machine);
    }

    /// Removes the entry for `ip`, returning the Machine it pointed to.
    pub fn remove(&self, ip: &str) -> Option<Arc<Machine>> {
        self.lock().remove(ip)
    }

    /// Machine currently claiming `ip`.
    pub fn get(&self, ip: &str) -> Option<Arc<Machine>> {
        self.lock().get(ip).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[allow(dead_code, reason = "pairs with len; only tests ask for it today")]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_machine;

    #[test]
    fn test_put_and_get() {
        let index = AddressIndex::new();
        index.put("10.0.0.5", Arc::new(create_test_machine("ns", "m2", Some("10.0.0.5"))));

        let found = index.get("10.0.0.5").unwrap();
        assert_eq!(found.metadata.name.as_deref(), Some("m2"));
        assert!(index.get("10.0.0.6").is_none());
    }

    #[test]
    fn test_last_writer_wins() {
        let index = AddressIndex::new();
        index.put("10.0.0.5", Arc::new(create_test_machine("ns", "a", Some("10.0.0.5"))));
        index.put("10.0.0.5", Arc::new(create_test_machine("ns", "b", Some("10.0.0.5"))));

        assert_eq!(index.len(), 1);
        assert_eq!(index.get("10.0.0.5").unwrap().metadata.name.as_deref(), Some("b"));
    }

    #[test]
    fn test_remove() {
        let index = AddressIndex::new();
        index.put("10.0.0.5", Arc::new(create_test_machine("ns", "m2", Some("10.0.0.5"))));

        assert!(index.remove("10.0.0.5").is_some());
        assert!(index.remove("10.0.0.5").is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn test_concurrent_writers_keep_map_consistent() {
        let index = Arc::new(AddressIndex::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let index = Arc::clone(&index);
                std::thread::spawn(move || {
                    for j in 0..100 {
                        let ip = format!("10.0.{i}.{j}");
                        index.put(ip.clone(), Arc::new(create_test_machine("ns", &format!("m{i}-{j}"), Some(&ip))));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(index.len(), 800);
    }
}
