//! External collaborators the pipelines drive.
//!
//! Each concern is a trait so stages can be exercised against fakes; the
//! concrete types shell out to vendor CLIs or call REST APIs.

pub mod cloud;
pub mod cluster;
pub mod dns;
pub mod git;
pub mod process;
pub mod repo;
pub mod terraform;

pub use cloud::CloudProvider;
pub use cluster::ClusterClient;
pub use dns::{DnsManager, TxtResolver};
pub use git::GitProvider;
pub use repo::{KeyGenerator, RepoOps};
pub use terraform::TerraformRunner;
