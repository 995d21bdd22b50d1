//! Device registry for fleet coordination
//!
//! Devices are remote agents that register under a unique identity.
//! The registry remembers every identity ever seen; the session layer
//! decides which of them are currently connected.

pub mod identity;
pub mod registry;
pub mod store;
pub mod types;

pub use identity::DeviceIdentity;
pub use registry::DeviceRegistry;
pub use store::{JsonFileStore, MemoryStore, RegistryStore, load_or_empty};
pub use types::{DeviceMap, DeviceRecord, Registration, epoch_millis};
