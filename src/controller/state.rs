//! Process-wide address snapshots shared between the loops and the HTTP layer.

use std::sync::Arc;

use arc_swap::ArcSwap;

use super::ipset::AddressSet;
use crate::error::{Error, Result};

/// Immutable value swapped atomically as a whole.
///
/// Readers get a consistent `Arc` and never observe a half-written value.
pub struct Snapshot<T> {
    inner: ArcSwap<T>,
}

impl<T> Snapshot<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: ArcSwap::from_pointee(value),
        }
    }

    pub fn get(&self) -> Arc<T> {
        self.inner.load_full()
    }

    pub fn replace(&self, value: T) {
        self.inner.store(Arc::new(value));
    }
}

impl<T: Default> Default for Snapshot<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Last-known local and aggregate address sets.
///
/// `local` is written only by the inventory loop and `aggregate` only by the
/// reconciler. Neither is ever replaced with an empty set.
#[derive(Default)]
pub struct SharedState {
    local: Snapshot<AddressSet>,
    aggregate: Snapshot<AddressSet>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local(&self) -> Arc<AddressSet> {
        self.local.get()
    }

    pub fn aggregate(&self) -> Arc<AddressSet> {
        self.aggregate.get()
    }

    pub fn publish_local(&self, addresses: AddressSet) -> Result<()> {
        if addresses.is_empty() {
            return Err(Error::EmptyResult(
                "refusing to publish an empty local address set".to_string(),
            ));
        }
        self.local.replace(addresses);
        Ok(())
    }

    pub fn publish_aggregate(&self, addresses: AddressSet) -> Result<()> {
        if addresses.is_empty() {
            return Err(Error::EmptyResult(
                "refusing to publish an empty aggregate address set".to_string(),
            ));
        }
        self.aggregate.replace(addresses);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_replace_swaps_whole_value() {
        let snapshot = Snapshot::new(vec![1, 2, 3]);
        let before = snapshot.get();
        snapshot.replace(vec![4]);
        assert_eq!(*before, vec![1, 2, 3]);
        assert_eq!(*snapshot.get(), vec![4]);
    }

    #[test]
    fn test_shared_state_starts_empty() {
        let state = SharedState::new();
        assert!(state.local().is_empty());
        assert!(state.aggregate().is_empty());
    }

    #[test]
    fn test_publish_rejects_empty_and_keeps_prior() {
        let state = SharedState::new();
        state
            .publish_local(AddressSet::from(vec!["10.0.0.1"]))
            .unwrap();

        let err = state.publish_local(AddressSet::empty()).unwrap_err();
        assert!(matches!(err, Error::EmptyResult(_)));
        assert_eq!(state.local().as_slice(), ["10.0.0.1".to_string()]);

        state
            .publish_aggregate(AddressSet::from(vec!["10.0.0.1", "10.1.0.1"]))
            .unwrap();
        assert!(state.publish_aggregate(AddressSet::empty()).is_err());
        assert_eq!(state.aggregate().len(), 2);
    }

    #[test]
    fn test_concurrent_readers_see_whole_snapshots() {
        let state = Arc::new(SharedState::new());
        let writer = {
            let state = Arc::clone(&state);
            std::thread::spawn(move || {
                for i in 1..200 {
                    let set: AddressSet = (0..i).map(|n| format!("10.0.0.{n}")).collect();
                    state.publish_aggregate(set).unwrap();
                }
            })
        };
        for _ in 0..200 {
            let snapshot = state.aggregate();
            // Every published set is 10.0.0.0..n, so contents must match length.
            for (n, ip) in snapshot.iter().enumerate() {
                assert_eq!(ip, &format!("10.0.0.{n}"));
            }
        }
        writer.join().unwrap();
    }
}
