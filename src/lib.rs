//! codecell library - disposable container workspaces driven over SSH
//!
//! A [`workspace::Workspace`] maps a host file or directory to a container
//! built from a generated (or supplied) Dockerfile. Files are copied in and
//! out, commands and coding agents run over SSH, and git inside the container
//! provides checkpoints. State that must outlive the container (config, the
//! sync ledger, key pairs) lives under the app directory.

pub mod agents;
pub mod cli;
pub mod containers;
pub mod credentials;
pub mod git;
pub mod process;
pub mod shell;
pub mod ssh;
pub mod templates;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod workspace;
