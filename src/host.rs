//! Reload controller: owns the loaded image, polls it for changes, swaps
//! images, patches registered pointers and drives the client's entry
//! function through its phases.
//!
//! One iteration (`ReloadHost::step`):
//! 1. stat the module file (fatal if that fails);
//! 2. load if nothing is loaded yet, or if the file changed and has been
//!    quiet for longer than the debounce window;
//! 3. on load: close the old image, open the new one, resolve the entry
//!    symbol; any load after the first turns this iteration into `Reload`;
//! 4. on `Reload`: rewrite every registered slot and binding against the
//!    new image;
//! 5. call the entry function and act on its return value.
//!
//! Everything runs on the caller's thread. A client that never returns
//! blocks the host.

use crate::abi::{EntryFn, HostHandle, Phase, CLOSE_REQUESTED};
use crate::config::{ArgVector, HostConfig};
use crate::error::HostError;
use crate::loader::{DladdrLookup, DylibLoader, ModuleImage, ModuleLoader, SymbolLookup};
use crate::registry::PointerRegistry;
use crate::watch::{ChangeDetector, FileProbe, FsProbe};
use core::ffi::{c_int, c_void};
use std::time::SystemTime;
use tracing::{debug, info};

/// What the loop should do after an iteration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Control {
    Continue,
    /// Stop and exit the process with this code.
    Exit(c_int),
}

struct LoadedModule<I> {
    image: I,
    entry: EntryFn,
}

pub struct ReloadHost<L: ModuleLoader, P: FileProbe = FsProbe> {
    config: HostConfig,
    loader: L,
    probe: P,
    detector: ChangeDetector,
    module: Option<LoadedModule<L::Image>>,
    phase: Phase,
    loads: usize,
    argv: ArgVector,
    handle: Box<HostHandle>,
}

impl ReloadHost<DylibLoader, FsProbe> {
    /// Host using the platform loader, `dladdr` and the real filesystem.
    pub fn native(config: HostConfig) -> Result<Self, HostError> {
        Self::new(config, DylibLoader, FsProbe, Box::new(DladdrLookup))
    }
}

impl<L: ModuleLoader, P: FileProbe> ReloadHost<L, P> {
    pub fn new(
        config: HostConfig,
        loader: L,
        probe: P,
        lookup: Box<dyn SymbolLookup>,
    ) -> Result<Self, HostError> {
        config.validate()?;
        let argv = config.client_argv()?;
        Ok(Self {
            detector: ChangeDetector::new(config.debounce),
            config,
            loader,
            probe,
            module: None,
            phase: Phase::Init,
            loads: 0,
            argv,
            handle: HostHandle::new(lookup),
        })
    }

    /// Phase the next entry call will carry, unless a reload supersedes it.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of loads after the first.
    pub fn reload_count(&self) -> usize {
        self.loads.saturating_sub(1)
    }

    pub fn registry(&self) -> &PointerRegistry {
        self.handle.registry()
    }

    pub fn userdata(&self) -> *mut c_void {
        self.handle.userdata
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Run iterations until the client asks to stop; returns the exit code.
    pub fn run(mut self) -> Result<c_int, HostError> {
        loop {
            if let Control::Exit(code) = self.step()? {
                return Ok(code);
            }
            if !self.config.poll_interval.is_zero() {
                std::thread::sleep(self.config.poll_interval);
            }
        }
    }

    /// One poll / (re)load / patch / call iteration.
    pub fn step(&mut self) -> Result<Control, HostError> {
        let path = self.config.module.as_path();
        let modified = self
            .probe
            .modified(path)
            .map_err(|source| HostError::Stat {
                path: path.to_path_buf(),
                source,
            })?;
        let now = self.probe.now();

        if self.module.is_none() || self.detector.should_load(modified, now) {
            self.load(modified)?;
        }

        let Some(module) = self.module.as_ref() else {
            unreachable!("a module is loaded after the first iteration");
        };

        if self.phase == Phase::Reload {
            // SAFETY: clients unregister slots before freeing their storage.
            unsafe { self.handle.context_mut().registry.patch(&module.image) }?;
        }

        let entry = module.entry;
        let status = self.call(entry, self.phase);
        if status == 0 {
            self.phase = Phase::Step;
            return Ok(Control::Continue);
        }
        if status == CLOSE_REQUESTED {
            info!("client requested close");
            let code = self.call(entry, Phase::Deinit);
            self.phase = Phase::Deinit;
            info!(code, "client deinitialized");
            return Ok(Control::Exit(code));
        }
        info!(code = status, "client exited");
        Ok(Control::Exit(status))
    }

    fn load(&mut self, modified: SystemTime) -> Result<(), HostError> {
        let path = self.config.module.as_path();
        if let Some(old) = self.module.take() {
            old.image.close()?;
        }

        let image = self.loader.open(path)?;
        let Some(address) = image.symbol(&self.config.entry_symbol) else {
            return Err(HostError::MissingEntry {
                path: path.to_path_buf(),
                symbol: self.config.entry_symbol.clone(),
            });
        };
        // SAFETY: the module contract fixes the entry symbol's signature.
        let entry = unsafe { core::mem::transmute::<*const c_void, EntryFn>(address) };

        self.detector.mark_loaded(modified);
        self.module = Some(LoadedModule { image, entry });
        self.loads += 1;
        if self.loads > 1 {
            self.phase = Phase::Reload;
            info!(path = %path.display(), reloads = self.loads - 1, "reloaded module");
        } else {
            info!(path = %path.display(), "loaded module");
        }
        Ok(())
    }

    fn call(&mut self, entry: EntryFn, phase: Phase) -> c_int {
        debug!(?phase, "calling client entry");
        let handle: *mut HostHandle = &mut *self.handle;
        // SAFETY: `entry` was resolved from the image still held in
        // `self.module`; the argument vector and handle outlive the call.
        unsafe { entry(self.argv.argc(), self.argv.as_ptr(), phase, handle) }
    }
}
