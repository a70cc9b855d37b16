//! reload-host: a native hot-reload host. It loads a dynamic library,
//! calls its entry point in a loop, swaps in a new image when the file on
//! disk changes, and rewrites every function pointer the client registered
//! so live call sites land in the new code without a restart.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: keep heap state alive across code swaps. Clients keep their data
//!   in memory they allocate; only code moves. Anything that points into
//!   code is registered with the host and rebound by symbol name.
//! - Layers:
//!   - RobinHoodMap<K, V, S, A>: open-addressing table with Robin Hood
//!     displacement, backward-shift deletion and prime-sized resizing;
//!     slot storage comes from an `allocator_api2` allocator; includes a
//!     debug-only reentrancy guard around probing.
//!   - PointerRegistry: RobinHoodMap from slot address to symbol name,
//!     plus generational binding ids for clients that prefer not to have
//!     their memory written.
//!   - ReloadHost<L, P>: the state machine that polls, loads, patches and
//!     calls the entry function.
//!
//! Constraints
//! - Single-threaded: the registry and the loaded image are only touched
//!   from the loop's thread, and client callbacks run inside entry calls
//!   on that same thread. A multi-threaded extension needs one lock held
//!   across registry mutation and the reload patch.
//! - At most one image is loaded; the old one is closed before the new one
//!   opens.
//! - Registered slots are raw client addresses. A client must unregister a
//!   slot before freeing its storage; the registry cannot notice.
//!
//! Capabilities
//! - Dynamic loading (`ModuleLoader`, `ModuleImage`), reverse symbol
//!   lookup (`SymbolLookup`) and file polling (`FileProbe`) are traits.
//!   `DylibLoader` (libloading), `DladdrLookup` (dladdr) and `FsProbe`
//!   (std::fs) are the production implementations; tests substitute
//!   in-memory images.
//!
//! Failure policy
//! - Everything on the reload path that cannot proceed (unstatable path,
//!   open/close failure, missing entry symbol, missing symbol during a
//!   patch) is a `HostError`; the binary treats it as fatal.
//! - Registry contract violations (null slot, double unregister, unknown
//!   binding) are `RegistryError`s, surfaced to clients as status codes.
//! - A non-zero entry return is not an error; it is the client's request
//!   to stop with that code.
//! - RobinHoodMap never fails an insert: probe-distance overflow rebuilds
//!   the table at the next prime.

pub mod abi;
pub mod config;
pub mod error;
pub mod hashers;
pub mod host;
pub mod loader;
mod reentrancy;
pub mod registry;
pub mod robin_hood;
mod robin_hood_proptest;
pub mod watch;

// Public surface
pub use abi::{HostHandle, Phase, CLOSE_REQUESTED, ENTRY_SYMBOL};
pub use config::{Cli, HostConfig};
pub use error::{ConfigError, HostError, LoadError, RegistryError};
pub use host::{Control, ReloadHost};
pub use registry::{BindingId, PatchReport, PointerRegistry};
pub use robin_hood::RobinHoodMap;
