//! The runtime container and its entry points.

mod builder;
mod context;
mod runtime;
mod spawn;

pub use builder::Builder;
pub use context::{current, try_current};
pub use runtime::{Handle, Runtime};
pub use spawn::{spawn, spawn_detached};

pub(crate) use builder::RuntimeConfig;

#[cfg(test)]
mod tests;
