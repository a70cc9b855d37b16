//! The contract between the host and a client module.
//!
//! A client exports one function under `ENTRY_SYMBOL` with the `EntryFn`
//! signature. Every call receives the arguments (module path first), the
//! `Phase` the call represents, and a `HostHandle` through which the
//! client registers its function-pointer fields and keeps state that must
//! outlive the image.
//!
//! Entry return values: `0` continues with `Phase::Step`, `CLOSE_REQUESTED`
//! asks for one final `Phase::Deinit` call, anything else exits the host
//! with that value.
//!
//! The handle callbacks return `STATUS_*` codes instead of panicking:
//! nothing may unwind across the C boundary.

use crate::error::RegistryError;
use crate::loader::SymbolLookup;
use crate::registry::{BindingId, PointerRegistry};
use core::ffi::{c_char, c_int, c_void};
use core::ptr;
use tracing::warn;

/// Name the entry function is exported under.
pub const ENTRY_SYMBOL: &str = "rh_entry";

/// Entry return value requesting a final `Phase::Deinit` call.
pub const CLOSE_REQUESTED: c_int = c_int::MAX;

pub const STATUS_OK: c_int = 0;
pub const STATUS_NULL_SLOT: c_int = 1;
pub const STATUS_EMPTY_SLOT: c_int = 2;
pub const STATUS_UNRESOLVED: c_int = 3;
pub const STATUS_NOT_REGISTERED: c_int = 4;
pub const STATUS_UNKNOWN_BINDING: c_int = 5;
pub const STATUS_MISSING_SYMBOL: c_int = 6;
pub const STATUS_INVALID_HANDLE: c_int = 7;

/// What the upcoming entry call represents to the client.
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Phase {
    /// First call after the first load.
    Init = 0,
    /// Last call, after the client asked to close.
    Deinit = 1,
    /// Regular loop iteration.
    Step = 2,
    /// First call after a new image replaced the old one.
    Reload = 3,
}

pub type EntryFn =
    unsafe extern "C" fn(c_int, *const *const c_char, Phase, *mut HostHandle) -> c_int;

pub type SlotFn = unsafe extern "C" fn(*mut HostHandle, *mut *const c_void) -> c_int;
pub type BindFn = unsafe extern "C" fn(*mut HostHandle, *const c_void) -> u64;
pub type LookupFn = unsafe extern "C" fn(*mut HostHandle, u64) -> *const c_void;
pub type UnbindFn = unsafe extern "C" fn(*mut HostHandle, u64) -> c_int;

/// State reachable from the client through its handle.
pub struct HostContext {
    pub registry: PointerRegistry,
    pub lookup: Box<dyn SymbolLookup>,
}

/// Handle passed to every entry call.
///
/// ```c
/// struct foo { int (*callback)(void); };
/// f->callback = my_callback;
/// host->register_slot(host, (const void **)&f->callback);
/// /* ... before freeing f: */
/// host->unregister_slot(host, (const void **)&f->callback);
/// ```
#[repr(C)]
pub struct HostHandle {
    /// Track `*slot` by symbol name; the host rewrites it on every reload.
    pub register_slot: SlotFn,
    /// Stop tracking a slot. Must run before the slot's storage is freed.
    pub unregister_slot: SlotFn,
    /// Track a function by id instead; returns 0 on failure.
    pub bind: BindFn,
    /// Current address for a binding id, null if the id is stale.
    pub lookup: LookupFn,
    pub unbind: UnbindFn,
    /// Free for the client. Point it at state allocated outside the image.
    pub userdata: *mut c_void,
    context: *mut HostContext,
}

impl HostHandle {
    pub fn new(lookup: Box<dyn SymbolLookup>) -> Box<Self> {
        let context = Box::into_raw(Box::new(HostContext {
            registry: PointerRegistry::new(),
            lookup,
        }));
        Box::new(HostHandle {
            register_slot,
            unregister_slot,
            bind,
            lookup: lookup_binding,
            unbind,
            userdata: ptr::null_mut(),
            context,
        })
    }

    pub fn context(&self) -> &HostContext {
        // SAFETY: `context` comes from `Box::into_raw` in `new` and lives
        // until this handle drops.
        unsafe { &*self.context }
    }

    pub fn context_mut(&mut self) -> &mut HostContext {
        // SAFETY: as in `context`; `&mut self` makes the access exclusive.
        unsafe { &mut *self.context }
    }

    pub fn registry(&self) -> &PointerRegistry {
        &self.context().registry
    }

    /// # Safety
    /// `handle` must be null or a handle created by `HostHandle::new` that
    /// is not otherwise borrowed for the returned lifetime.
    unsafe fn context_from<'a>(handle: *mut HostHandle) -> Option<&'a mut HostContext> {
        // SAFETY: per the function contract.
        let handle = unsafe { handle.as_ref() }?;
        // SAFETY: the context outlives the handle that owns it.
        unsafe { handle.context.as_mut() }
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        if !self.context.is_null() {
            // SAFETY: created by `Box::into_raw` in `new`, freed only here.
            drop(unsafe { Box::from_raw(self.context) });
            self.context = ptr::null_mut();
        }
    }
}

pub(crate) fn status_of(err: &RegistryError) -> c_int {
    match err {
        RegistryError::NullSlot => STATUS_NULL_SLOT,
        RegistryError::EmptySlot { .. } => STATUS_EMPTY_SLOT,
        RegistryError::Unresolved { .. } => STATUS_UNRESOLVED,
        RegistryError::NotRegistered { .. } => STATUS_NOT_REGISTERED,
        RegistryError::UnknownBinding { .. } => STATUS_UNKNOWN_BINDING,
        RegistryError::MissingSymbol { .. } => STATUS_MISSING_SYMBOL,
    }
}

unsafe extern "C" fn register_slot(host: *mut HostHandle, slot: *mut *const c_void) -> c_int {
    // SAFETY: the host hands out only handles it owns.
    let Some(ctx) = (unsafe { HostHandle::context_from(host) }) else {
        return STATUS_INVALID_HANDLE;
    };
    // SAFETY: the client promises `slot` is a live pointer field.
    match unsafe { ctx.registry.register(slot, ctx.lookup.as_ref()) } {
        Ok(_) => STATUS_OK,
        Err(e) => {
            warn!(error = %e, "register_slot rejected");
            status_of(&e)
        }
    }
}

unsafe extern "C" fn unregister_slot(host: *mut HostHandle, slot: *mut *const c_void) -> c_int {
    // SAFETY: see `register_slot`.
    let Some(ctx) = (unsafe { HostHandle::context_from(host) }) else {
        return STATUS_INVALID_HANDLE;
    };
    match ctx.registry.unregister(slot) {
        Ok(_) => STATUS_OK,
        Err(e) => {
            warn!(error = %e, "unregister_slot rejected");
            status_of(&e)
        }
    }
}

unsafe extern "C" fn bind(host: *mut HostHandle, function: *const c_void) -> u64 {
    // SAFETY: see `register_slot`.
    let Some(ctx) = (unsafe { HostHandle::context_from(host) }) else {
        return 0;
    };
    match ctx.registry.bind(function, ctx.lookup.as_ref()) {
        Ok(id) => id.to_ffi(),
        Err(e) => {
            warn!(error = %e, "bind rejected");
            0
        }
    }
}

unsafe extern "C" fn lookup_binding(host: *mut HostHandle, id: u64) -> *const c_void {
    // SAFETY: see `register_slot`.
    let Some(ctx) = (unsafe { HostHandle::context_from(host) }) else {
        return ptr::null();
    };
    ctx.registry
        .binding_address(BindingId::from_ffi(id))
        .unwrap_or(ptr::null())
}

unsafe extern "C" fn unbind(host: *mut HostHandle, id: u64) -> c_int {
    // SAFETY: see `register_slot`.
    let Some(ctx) = (unsafe { HostHandle::context_from(host) }) else {
        return STATUS_INVALID_HANDLE;
    };
    match ctx.registry.unbind(BindingId::from_ffi(id)) {
        Ok(_) => STATUS_OK,
        Err(e) => {
            warn!(error = %e, "unbind rejected");
            status_of(&e)
        }
    }
}
