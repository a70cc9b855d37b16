//! Pointer registry: remembers which function each registered pointer
//! field was bound to, by symbol name, so the host can rebind it after a
//! reload.
//!
//! Two ways to track a function:
//! - Slots: the client hands over the address of one of its own pointer
//!   fields. On reload the registry writes the new address straight into
//!   that field. The client must unregister the slot before freeing the
//!   storage holding it; the registry cannot detect dangling slots.
//! - Bindings: the client keeps an opaque `BindingId` instead and asks the
//!   registry for the current address. Nothing is written into client
//!   memory, and stale ids never resolve.

use crate::error::RegistryError;
use crate::hashers::BuildAddressHasher;
use crate::loader::{ModuleImage, SymbolLookup};
use crate::robin_hood::{self, RobinHoodMap};
use core::ffi::c_void;
use slotmap::{DefaultKey, Key, KeyData, SlotMap};
use tracing::{debug, info};

/// Address of a client-owned function-pointer field.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SlotAddr(usize);

impl SlotAddr {
    pub fn from_ptr(slot: *mut *const c_void) -> Self {
        SlotAddr(slot as usize)
    }

    pub fn as_ptr(self) -> *mut *const c_void {
        self.0 as *mut *const c_void
    }

    pub fn addr(self) -> usize {
        self.0
    }
}

/// Generational handle to a binding.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct BindingId(DefaultKey);

impl BindingId {
    /// Non-zero encoding for the C handle.
    pub fn to_ffi(self) -> u64 {
        self.0.data().as_ffi()
    }

    pub fn from_ffi(raw: u64) -> Self {
        BindingId(KeyData::from_ffi(raw).into())
    }
}

#[derive(Debug)]
struct Binding {
    name: String,
    address: *const c_void,
}

/// Counts of what a reload rebound.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PatchReport {
    pub slots: usize,
    pub bindings: usize,
}

pub struct PointerRegistry {
    slots: RobinHoodMap<SlotAddr, String, BuildAddressHasher>,
    bindings: SlotMap<DefaultKey, Binding>,
}

impl Default for PointerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PointerRegistry {
    pub fn new() -> Self {
        Self {
            slots: RobinHoodMap::with_hasher(BuildAddressHasher::default()),
            bindings: SlotMap::with_key(),
        }
    }

    /// Track the function currently stored in `*slot` by its symbol name.
    /// Registering a slot again rebinds it to whatever it holds now.
    ///
    /// # Safety
    /// `slot` must be null or valid for reads of a pointer, and must stay
    /// valid for writes until it is unregistered.
    pub unsafe fn register(
        &mut self,
        slot: *mut *const c_void,
        lookup: &dyn SymbolLookup,
    ) -> Result<String, RegistryError> {
        if slot.is_null() {
            return Err(RegistryError::NullSlot);
        }
        let key = SlotAddr::from_ptr(slot);
        // SAFETY: non-null and readable per the caller's contract.
        let target = unsafe { slot.read() };
        if target.is_null() {
            return Err(RegistryError::EmptySlot { slot: key.addr() });
        }
        let name = lookup
            .symbol_name(target)
            .ok_or(RegistryError::Unresolved {
                address: target as usize,
            })?;
        debug!(slot = key.addr(), symbol = %name, "registered function slot");
        self.slots.insert(key, name.clone());
        Ok(name)
    }

    /// Stop tracking `slot`, returning the name it was bound to.
    pub fn unregister(&mut self, slot: *mut *const c_void) -> Result<String, RegistryError> {
        if slot.is_null() {
            return Err(RegistryError::NullSlot);
        }
        let key = SlotAddr::from_ptr(slot);
        let (_, name) = self
            .slots
            .remove(&key)
            .ok_or(RegistryError::NotRegistered { slot: key.addr() })?;
        debug!(slot = key.addr(), symbol = %name, "unregistered function slot");
        Ok(name)
    }

    /// Track `function` through a binding id instead of a slot.
    pub fn bind(
        &mut self,
        function: *const c_void,
        lookup: &dyn SymbolLookup,
    ) -> Result<BindingId, RegistryError> {
        let name = lookup
            .symbol_name(function)
            .ok_or(RegistryError::Unresolved {
                address: function as usize,
            })?;
        debug!(symbol = %name, "bound function");
        let key = self.bindings.insert(Binding {
            name,
            address: function,
        });
        Ok(BindingId(key))
    }

    pub fn unbind(&mut self, id: BindingId) -> Result<String, RegistryError> {
        self.bindings
            .remove(id.0)
            .map(|b| b.name)
            .ok_or(RegistryError::UnknownBinding { id: id.to_ffi() })
    }

    /// Current address of a binding.
    pub fn binding_address(&self, id: BindingId) -> Option<*const c_void> {
        self.bindings.get(id.0).map(|b| b.address)
    }

    pub fn binding_name(&self, id: BindingId) -> Option<&str> {
        self.bindings.get(id.0).map(|b| b.name.as_str())
    }

    /// Symbol name a slot is bound to.
    pub fn name_of(&self, slot: *mut *const c_void) -> Option<&str> {
        self.slots.get(&SlotAddr::from_ptr(slot)).map(String::as_str)
    }

    /// Number of registered slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Registered slots and their names, in table order.
    pub fn slots(&self) -> robin_hood::Iter<'_, SlotAddr, String> {
        self.slots.iter()
    }

    /// Rebind every slot and binding against `image`.
    ///
    /// All names are resolved before anything is written, so a missing
    /// symbol leaves client memory untouched.
    ///
    /// # Safety
    /// Every registered slot must still be valid for writes.
    pub unsafe fn patch<I>(&mut self, image: &I) -> Result<PatchReport, RegistryError>
    where
        I: ModuleImage + ?Sized,
    {
        let resolve = |name: &str| {
            image
                .symbol(name)
                .ok_or_else(|| RegistryError::MissingSymbol {
                    name: name.to_string(),
                })
        };

        let slot_writes = self
            .slots
            .iter()
            .map(|(slot, name)| resolve(name.as_str()).map(|address| (*slot, address)))
            .collect::<Result<Vec<_>, _>>()?;
        let binding_updates = self
            .bindings
            .iter()
            .map(|(key, b)| resolve(b.name.as_str()).map(|address| (key, address)))
            .collect::<Result<Vec<_>, _>>()?;

        for &(slot, address) in &slot_writes {
            // SAFETY: registered slots are writable until unregistered.
            unsafe { slot.as_ptr().write(address) };
        }
        for &(key, address) in &binding_updates {
            if let Some(b) = self.bindings.get_mut(key) {
                b.address = address;
            }
        }

        let report = PatchReport {
            slots: slot_writes.len(),
            bindings: binding_updates.len(),
        };
        info!(
            slots = report.slots,
            bindings = report.bindings,
            "patched function pointers"
        );
        Ok(report)
    }
}
