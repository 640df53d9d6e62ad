pub mod helpers;
pub mod registry;

use async_trait::async_trait;
use cdc_error::CdcError;

/// Builds a component from its deserialized configuration. Collaborators
/// that cannot be expressed as plain configuration (clients, clocks) are
/// looked up in the [`registry::Registry`].
#[async_trait]
pub trait Configurable<T, E = Box<dyn CdcError>> {
    async fn try_from_config(config: &T, registry: &registry::Registry) -> Result<Self, E>
    where
        Self: Sized;
}
