//! Error types for the registry, the loading capability and the host loop.

use std::path::PathBuf;

/// Registry contract violations and patch failures.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("slot address is null")]
    NullSlot,

    #[error("slot {slot:#x} holds a null function pointer")]
    EmptySlot { slot: usize },

    #[error("no symbol name found for address {address:#x}")]
    Unresolved { address: usize },

    #[error("slot {slot:#x} is not registered")]
    NotRegistered { slot: usize },

    #[error("binding {id:#x} does not exist")]
    UnknownBinding { id: u64 },

    #[error("symbol `{name}` is missing from the reloaded module")]
    MissingSymbol { name: String },
}

/// Failures of the dynamic-loading capability.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to open module {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("failed to close module {path}: {reason}")]
    Close { path: PathBuf, reason: String },
}

/// Invalid host configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("usage: reloadhost <module> [args...]")]
    MissingModulePath,

    #[error("argument {index} contains an interior NUL byte")]
    InteriorNul { index: usize },
}

/// Fatal conditions on the reload path.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("cannot stat module {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("module {path} does not export entry symbol `{symbol}`")]
    MissingEntry { path: PathBuf, symbol: String },

    #[error("failed to patch registered pointers: {0}")]
    Patch(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
