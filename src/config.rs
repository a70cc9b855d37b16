//! Host configuration and its command-line front end.

use crate::abi::ENTRY_SYMBOL;
use crate::error::ConfigError;
use clap::Parser;
use std::ffi::{CString, OsString};
use std::path::PathBuf;
use std::time::Duration;

/// Default quiet period before a changed module is loaded.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Path of the module image to load and watch.
    pub module: PathBuf,
    /// Arguments forwarded to the client after the module path.
    pub args: Vec<OsString>,
    pub debounce: Duration,
    /// Sleep between loop iterations. Zero polls continuously.
    pub poll_interval: Duration,
    pub entry_symbol: String,
}

impl HostConfig {
    pub fn new(module: impl Into<PathBuf>) -> Self {
        Self {
            module: module.into(),
            args: Vec::new(),
            debounce: DEFAULT_DEBOUNCE,
            poll_interval: Duration::ZERO,
            entry_symbol: ENTRY_SYMBOL.to_string(),
        }
    }

    pub fn with_args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_entry_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.entry_symbol = symbol.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.module.as_os_str().is_empty() {
            return Err(ConfigError::MissingModulePath);
        }
        Ok(())
    }

    /// The client's argument vector: module path, then forwarded args.
    pub fn client_argv(&self) -> Result<ArgVector, ConfigError> {
        let strings = std::iter::once(self.module.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .enumerate()
            .map(|(index, arg)| {
                CString::new(os_bytes(arg)).map_err(|_| ConfigError::InteriorNul { index })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ArgVector::new(strings))
    }
}

#[cfg(unix)]
fn os_bytes(arg: &std::ffi::OsStr) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    arg.as_bytes().to_vec()
}

#[cfg(not(unix))]
fn os_bytes(arg: &std::ffi::OsStr) -> Vec<u8> {
    arg.to_string_lossy().into_owned().into_bytes()
}

/// NUL-terminated C argument vector that owns its strings.
#[derive(Debug)]
pub struct ArgVector {
    strings: Vec<CString>,
    pointers: Vec<*const core::ffi::c_char>,
}

impl ArgVector {
    fn new(strings: Vec<CString>) -> Self {
        let pointers = strings
            .iter()
            .map(|s| s.as_ptr())
            .chain(std::iter::once(core::ptr::null()))
            .collect();
        Self { strings, pointers }
    }

    pub fn argc(&self) -> core::ffi::c_int {
        self.strings.len() as core::ffi::c_int
    }

    pub fn as_ptr(&self) -> *const *const core::ffi::c_char {
        self.pointers.as_ptr()
    }

    pub fn strings(&self) -> &[CString] {
        &self.strings
    }
}

/// Hot-reload host for native modules.
#[derive(Parser, Debug)]
#[command(name = "reloadhost")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet period in milliseconds before a changed module is loaded
    #[arg(long, env = "RELOAD_HOST_DEBOUNCE_MS", default_value_t = 1000)]
    pub debounce_ms: u64,

    /// Sleep in milliseconds between loop iterations
    #[arg(long, env = "RELOAD_HOST_POLL_MS", default_value_t = 0)]
    pub poll_ms: u64,

    /// Exported name of the client entry function
    #[arg(long, env = "RELOAD_HOST_ENTRY", default_value = ENTRY_SYMBOL)]
    pub entry: String,

    /// Module image to load and watch
    pub module: PathBuf,

    /// Arguments passed through to the module
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<OsString>,
}

impl Cli {
    pub fn into_config(self) -> HostConfig {
        HostConfig::new(self.module)
            .with_args(self.args)
            .with_debounce(Duration::from_millis(self.debounce_ms))
            .with_poll_interval(Duration::from_millis(self.poll_ms))
            .with_entry_symbol(self.entry)
    }
}
