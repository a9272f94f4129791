//! Test fixtures shared by the workspace's integration tests

pub mod front_end;
pub mod tree;

pub use front_end::CountingFrontEnd;
pub use tree::{GoTree, TEST_GO_RELEASE};
