//! Runtime bootstrap for linked Go programs.
//!
//! [`prelude`] is the JavaScript registry every program starts with;
//! [`loader`] implements the same registration and start-up protocol for
//! Rust hosts.

pub mod loader;
pub mod prelude;

pub use loader::{Fetcher, Hook, LoadError, Loader, Output, Package, PackageBuilder};
pub use prelude::prelude;
