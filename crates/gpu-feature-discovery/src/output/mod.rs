//! Label publication.
//!
//! - [`file`]: node-feature-discovery feature file
//! - [`node`]: direct patch of the Kubernetes Node object

use core::error::Error;
use std::path::PathBuf;

pub mod file;
pub mod node;

pub use node::NodeLabelPublisher;

#[derive(Debug, derive_more::Display)]
pub enum OutputError {
    #[display("Failed to write labels to {}", path.display())]
    WriteFailed { path: PathBuf },
    #[display("Failed to remove {}", path.display())]
    RemoveFailed { path: PathBuf },
}

impl Error for OutputError {}

/// Errors that can occur while talking to the Kubernetes API.
#[derive(Debug, derive_more::Display)]
pub enum KubernetesError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("Failed to get node {node}")]
    NodeGetFailed { node: String },
    #[display("Failed to patch labels of node {node}")]
    PatchFailed { node: String },
}

impl Error for KubernetesError {}
