//! Static provider and persona tables.

pub mod personas;
pub mod providers;

pub use personas::{Element, PersonaConfig, PersonaRegistry};
pub use providers::{Capability, ProviderConfig, ProviderKind, ProviderRegistry};
