//! External collaborators the core consumes.

pub mod git;

pub use git::{GitCli, GitInspector};
