//! Error types for texbox-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TexboxError {
    #[error("sandbox launch failed: {0}")]
    Launch(String),

    #[error("workspace error: {0}")]
    Workspace(String),

    #[error("mount error: {0}")]
    Mount(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("nix error: {0}")]
    Nix(#[from] nix::Error),
}
