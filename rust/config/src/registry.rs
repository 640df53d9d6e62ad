use cdc_error::{CdcError, ErrorCodes};
use parking_lot::Mutex;
use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    sync::Arc,
};
use thiserror::Error;

/// Marker for values that may be placed in a [`Registry`].
///
/// Values are cloned on every lookup, so implementors should be handles
/// (`Arc<Inner>` style) whose clones observe the same underlying state.
pub trait Injectable: Any + Send + Sync + Clone {}

/// Type-keyed service locator used while building components from config.
///
/// Upstream clients, clocks and other collaborators that have no
/// serializable form are registered here by the process entrypoint (or by a
/// test) and picked up by `Configurable::try_from_config`.
#[derive(Default, Clone)]
pub struct Registry {
    storage: Arc<Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Type [{0}] not found in the registry")]
    TypeNotFound(String),
}

impl CdcError for RegistryError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::Internal
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `value`, replacing any earlier value of the same type.
    pub fn register<T: Injectable>(&self, value: T) {
        self.storage
            .lock()
            .insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T: Injectable>(&self) -> Result<T, RegistryError> {
        let storage = self.storage.lock();
        storage
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<T>())
            .cloned()
            .ok_or_else(|| RegistryError::TypeNotFound(type_name::<T>().to_string()))
    }
}
