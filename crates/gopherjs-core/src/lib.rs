//! Build system for compiling Go packages to JavaScript.
//!
//! Packages are discovered in GOROOT/GOPATH source trees, merged with their
//! overlay ("natives") files, compiled through a [`compiler::FrontEnd`] and
//! linked into a single loadable program.

pub mod ast;
pub mod augment;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod context;
pub mod embed;
pub mod error;
pub mod package_data;
pub mod session;
pub mod sourcemap;
pub mod watch;

// Re-export the types most callers need
pub use cache::{BuildCache, CacheError, CACHE_VERSION};
pub use compiler::{Archive, FrontEnd, ImportContext, ListingFrontEnd, TypeRegistry};
pub use config::BuildConfig;
pub use context::{BuildContext, Env};
pub use error::{BuildError, Result};
pub use package_data::{JsFile, PackageData, PackageVariant};
pub use session::{Options, Session};
