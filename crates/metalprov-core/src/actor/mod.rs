//! Actor implementations

pub mod host;

pub use host::{HostActor, HostActorArgs, ask_error};
