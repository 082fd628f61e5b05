// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Typed, per-participant storage for a protocol participant's intermediate
//! state.
//!
//! Each entry is keyed by a [`TypeTag`] and the [`ParticipantIdentifier`] the
//! value pertains to. Secret-bearing values are expected to implement
//! zeroize-on-drop; the whole storage is dropped when its participant is
//! dropped or aborted.

use crate::{
    errors::{InternalError, Result},
    protocol::ParticipantIdentifier,
};
use std::{
    any::{Any, TypeId},
    collections::HashMap,
};
use tracing::error;

/// A marker type naming one kind of stored value.
pub(crate) trait TypeTag: 'static {
    /// The type of the stored value.
    type Value: Send + Sync;
}

/// Storage of per-participant values, keyed by a [`TypeTag`].
#[derive(Debug, Default)]
pub(crate) struct LocalStorage {
    storage: HashMap<(TypeId, ParticipantIdentifier), Box<dyn Any + Send + Sync>>,
}

impl LocalStorage {
    /// Store a value, overwriting any previous value under the same key.
    pub(crate) fn store<T: TypeTag>(&mut self, pid: ParticipantIdentifier, value: T::Value) {
        let _ = self
            .storage
            .insert((TypeId::of::<T>(), pid), Box::new(value));
    }

    /// Store a value, failing if a value is already present under the same
    /// key.
    pub(crate) fn store_once<T: TypeTag>(
        &mut self,
        pid: ParticipantIdentifier,
        value: T::Value,
    ) -> Result<()> {
        if self.contains::<T>(pid) {
            error!("attempted to overwrite a single-store value for {pid}");
            return Err(InternalError::InternalInvariantFailed);
        }
        self.store::<T>(pid, value);
        Ok(())
    }

    /// Retrieve a reference to a stored value.
    pub(crate) fn retrieve<T: TypeTag>(&self, pid: ParticipantIdentifier) -> Result<&T::Value> {
        self.storage
            .get(&(TypeId::of::<T>(), pid))
            .and_then(|any| any.downcast_ref::<T::Value>())
            .ok_or_else(|| {
                error!(
                    "expected a stored value of type {} for {pid}",
                    std::any::type_name::<T>()
                );
                InternalError::InternalInvariantFailed
            })
    }

    /// Retrieve a mutable reference to a stored value.
    pub(crate) fn retrieve_mut<T: TypeTag>(
        &mut self,
        pid: ParticipantIdentifier,
    ) -> Result<&mut T::Value> {
        self.storage
            .get_mut(&(TypeId::of::<T>(), pid))
            .and_then(|any| any.downcast_mut::<T::Value>())
            .ok_or_else(|| {
                error!(
                    "expected a stored value of type {} for {pid}",
                    std::any::type_name::<T>()
                );
                InternalError::InternalInvariantFailed
            })
    }

    /// Remove and return a stored value.
    pub(crate) fn remove<T: TypeTag>(&mut self, pid: ParticipantIdentifier) -> Result<T::Value> {
        self.storage
            .remove(&(TypeId::of::<T>(), pid))
            .and_then(|any| any.downcast::<T::Value>().ok())
            .map(|boxed| *boxed)
            .ok_or_else(|| {
                error!(
                    "expected a stored value of type {} for {pid}",
                    std::any::type_name::<T>()
                );
                InternalError::InternalInvariantFailed
            })
    }

    /// Whether a value is stored for the given key.
    pub(crate) fn contains<T: TypeTag>(&self, pid: ParticipantIdentifier) -> bool {
        self.storage.contains_key(&(TypeId::of::<T>(), pid))
    }

    /// Whether a value is stored for every one of the given participants.
    pub(crate) fn contains_for_all_ids<T: TypeTag>(&self, pids: &[ParticipantIdentifier]) -> bool {
        pids.iter().all(|&pid| self.contains::<T>(pid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::init_testing;

    struct Counter;
    impl TypeTag for Counter {
        type Value = u64;
    }

    #[test]
    fn store_retrieve_remove_roundtrip() {
        let mut rng = init_testing();
        let pid = ParticipantIdentifier::random(&mut rng);
        let mut storage = LocalStorage::default();

        assert!(!storage.contains::<Counter>(pid));
        storage.store::<Counter>(pid, 7);
        assert_eq!(*storage.retrieve::<Counter>(pid).unwrap(), 7);
        assert_eq!(storage.remove::<Counter>(pid).unwrap(), 7);
        assert!(storage.retrieve::<Counter>(pid).is_err());
    }

    #[test]
    fn store_once_rejects_overwrite() {
        let mut rng = init_testing();
        let pid = ParticipantIdentifier::random(&mut rng);
        let mut storage = LocalStorage::default();

        storage.store_once::<Counter>(pid, 1).unwrap();
        assert!(storage.store_once::<Counter>(pid, 2).is_err());
        assert_eq!(*storage.retrieve::<Counter>(pid).unwrap(), 1);
    }

    #[test]
    fn contains_for_all_ids_requires_every_id() {
        let mut rng = init_testing();
        let pids = [
            ParticipantIdentifier::random(&mut rng),
            ParticipantIdentifier::random(&mut rng),
        ];
        let mut storage = LocalStorage::default();
        storage.store::<Counter>(pids[0], 0);
        assert!(!storage.contains_for_all_ids::<Counter>(&pids));
        storage.store::<Counter>(pids[1], 1);
        assert!(storage.contains_for_all_ids::<Counter>(&pids));
    }
}
