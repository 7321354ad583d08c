//! Cross-registry fan-out: [`RegistryChannel`].

mod channel;

pub use channel::RegistryChannel;
