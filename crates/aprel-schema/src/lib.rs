//! Shared types for the aprel release pipeline.
//!
//! Everything that crosses a stage boundary lives here: the resolved
//! [`Release`], the [`BuildArtifact`]s produced by the build matrix, the
//! [`VerificationReport`] that gates deployment and the
//! [`DeploymentIdentity`] a publish is keyed on.

pub mod platform;
pub mod types;

// Re-exports
pub use platform::*;
pub use types::*;
