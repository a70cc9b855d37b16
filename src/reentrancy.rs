//! Debug-only reentrancy check for the Robin Hood table.
//!
//! Probing calls into user code (`K: Hash`, `K: Eq`) while slots may be
//! mid-shift. A key whose `Eq` reaches back into the same table would
//! observe a torn probe sequence, so every public table operation holds a
//! `TableEntered` token naming itself for its whole duration. In debug
//! builds a second token panics with both operation names; release builds
//! compile the check away.

use core::cell::Cell;
use core::marker::PhantomData;

#[derive(Debug)]
pub(crate) struct ReentrancyCheck {
    /// Operation currently probing, if any.
    #[cfg(debug_assertions)]
    active: Cell<Option<&'static str>>,
    // The table is single-threaded; keep this !Send + !Sync to match.
    _single_thread: PhantomData<*mut ()>,
}

impl ReentrancyCheck {
    pub(crate) const fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            active: Cell::new(None),
            _single_thread: PhantomData,
        }
    }

    /// Mark the table as entered by `op` until the returned token drops.
    #[inline]
    pub(crate) fn enter(&self, op: &'static str) -> TableEntered<'_> {
        #[cfg(debug_assertions)]
        {
            if let Some(outer) = self.active.replace(Some(op)) {
                // Leave the outer operation's mark in place for its token.
                self.active.set(Some(outer));
                panic!("reentrant RobinHoodMap::{op} while RobinHoodMap::{outer} is probing");
            }
            TableEntered { check: self }
        }

        #[cfg(not(debug_assertions))]
        {
            let _ = op;
            TableEntered {
                _check: PhantomData,
            }
        }
    }

    #[cfg(all(test, debug_assertions))]
    fn active(&self) -> Option<&'static str> {
        self.active.get()
    }
}

impl Default for ReentrancyCheck {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct TableEntered<'a> {
    #[cfg(debug_assertions)]
    check: &'a ReentrancyCheck,
    #[cfg(not(debug_assertions))]
    _check: PhantomData<&'a ReentrancyCheck>,
}

impl Drop for TableEntered<'_> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        self.check.active.set(None);
    }
}
