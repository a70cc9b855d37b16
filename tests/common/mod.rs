// Shared fakes for driving ReloadHost without real shared libraries:
// in-memory images, a scripted file probe, a reverse-lookup table, and two
// client entry points that record every call on the current thread.
#![allow(dead_code)]

use reload_host::abi::{HostHandle, Phase};
use reload_host::loader::{ModuleImage, ModuleLoader, SymbolLookup};
use reload_host::LoadError;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::ffi::{c_char, c_int, c_void, CStr};
use std::io;
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, SystemTime};

pub const MODULE: &str = "libclient.so";

// ---- images and loader ----

#[derive(Clone)]
pub struct FakeImage {
    pub label: &'static str,
    symbols: HashMap<String, usize>,
    log: Rc<RefCell<Vec<String>>>,
}

impl FakeImage {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            symbols: HashMap::new(),
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn export(mut self, name: &str, address: *const c_void) -> Self {
        self.symbols.insert(name.to_string(), address as usize);
        self
    }
}

impl ModuleImage for FakeImage {
    fn symbol(&self, name: &str) -> Option<*const c_void> {
        self.symbols.get(name).map(|&a| a as *const c_void)
    }

    fn close(self) -> Result<(), LoadError> {
        self.log.borrow_mut().push(format!("close {}", self.label));
        Ok(())
    }
}

/// Hands out its images in order, one per `open`.
pub struct FakeLoader {
    images: VecDeque<FakeImage>,
    pub log: Rc<RefCell<Vec<String>>>,
}

impl FakeLoader {
    pub fn new(images: Vec<FakeImage>) -> Self {
        let log = Rc::new(RefCell::new(Vec::new()));
        let images = images
            .into_iter()
            .map(|mut i| {
                i.log = log.clone();
                i
            })
            .collect();
        Self { images, log }
    }

    pub fn opens(&self) -> usize {
        self.log
            .borrow()
            .iter()
            .filter(|e| e.starts_with("open"))
            .count()
    }
}

impl ModuleLoader for FakeLoader {
    type Image = FakeImage;

    fn open(&mut self, path: &Path) -> Result<FakeImage, LoadError> {
        let image = self.images.pop_front().ok_or_else(|| LoadError::Open {
            path: path.to_path_buf(),
            reason: "no image available".to_string(),
        })?;
        self.log.borrow_mut().push(format!("open {}", image.label));
        Ok(image)
    }
}

// ---- file probe ----

pub fn secs(s: f64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs_f64(s)
}

/// Each `modified` call consumes the next (mtime, now) pair; the last pair
/// repeats once the script runs out.
#[derive(Clone)]
pub struct ScriptedProbe {
    polls: Rc<RefCell<VecDeque<(SystemTime, SystemTime)>>>,
    current: Rc<Cell<(SystemTime, SystemTime)>>,
    missing: bool,
}

impl ScriptedProbe {
    pub fn new(polls: &[(f64, f64)]) -> Self {
        let polls: VecDeque<_> = polls.iter().map(|&(m, n)| (secs(m), secs(n))).collect();
        let first = polls.front().copied().unwrap_or((secs(0.0), secs(0.0)));
        Self {
            polls: Rc::new(RefCell::new(polls)),
            current: Rc::new(Cell::new(first)),
            missing: false,
        }
    }

    /// A probe whose file never exists.
    pub fn missing() -> Self {
        let mut p = Self::new(&[]);
        p.missing = true;
        p
    }

    /// Constant times: the first load happens, nothing ever changes.
    pub fn steady() -> Self {
        Self::new(&[(100.0, 200.0)])
    }
}

impl reload_host::watch::FileProbe for ScriptedProbe {
    fn modified(&self, _path: &Path) -> io::Result<SystemTime> {
        if self.missing {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such file"));
        }
        if let Some(next) = self.polls.borrow_mut().pop_front() {
            self.current.set(next);
        }
        Ok(self.current.get().0)
    }

    fn now(&self) -> SystemTime {
        self.current.get().1
    }
}

// ---- reverse lookup ----

#[derive(Default, Clone)]
pub struct FakeLookup(HashMap<usize, String>);

impl FakeLookup {
    pub fn with(mut self, address: *const c_void, name: &str) -> Self {
        self.0.insert(address as usize, name.to_string());
        self
    }
}

impl SymbolLookup for FakeLookup {
    fn symbol_name(&self, address: *const c_void) -> Option<String> {
        self.0.get(&(address as usize)).cloned()
    }
}

// ---- client functions ----

pub extern "C" fn foo_v1() -> c_int {
    1
}

pub extern "C" fn foo_v2() -> c_int {
    2
}

pub fn fn_addr(f: extern "C" fn() -> c_int) -> *const c_void {
    f as *const () as *const c_void
}

pub fn entry_addr(f: reload_host::abi::EntryFn) -> *const c_void {
    f as *const () as *const c_void
}

type Hook = Box<dyn FnMut(&'static str, Phase, *mut HostHandle)>;

thread_local! {
    static CALLS: RefCell<Vec<(&'static str, Phase)>> = const { RefCell::new(Vec::new()) };
    static REPLIES: RefCell<VecDeque<c_int>> = const { RefCell::new(VecDeque::new()) };
    static ARGS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    static HOOK: RefCell<Option<Hook>> = const { RefCell::new(None) };
}

/// Clear all per-thread client state. Call at the start of every test.
pub fn reset() {
    CALLS.with(|c| c.borrow_mut().clear());
    REPLIES.with(|r| r.borrow_mut().clear());
    ARGS.with(|a| a.borrow_mut().clear());
    HOOK.with(|h| *h.borrow_mut() = None);
}

/// Queue entry return values; an empty queue answers 0.
pub fn replies(values: &[c_int]) {
    REPLIES.with(|r| r.borrow_mut().extend(values.iter().copied()));
}

/// Run `hook` inside every entry call, before it replies.
pub fn on_call(hook: impl FnMut(&'static str, Phase, *mut HostHandle) + 'static) {
    HOOK.with(|h| *h.borrow_mut() = Some(Box::new(hook)));
}

pub fn calls() -> Vec<(&'static str, Phase)> {
    CALLS.with(|c| c.borrow().clone())
}

pub fn phases() -> Vec<Phase> {
    calls().into_iter().map(|(_, p)| p).collect()
}

pub fn last_args() -> Vec<String> {
    ARGS.with(|a| a.borrow().clone())
}

unsafe fn dispatch(
    module: &'static str,
    argc: c_int,
    argv: *const *const c_char,
    phase: Phase,
    host: *mut HostHandle,
) -> c_int {
    CALLS.with(|c| c.borrow_mut().push((module, phase)));
    let args = (0..argc as usize)
        .map(|i| unsafe { CStr::from_ptr(*argv.add(i)) }.to_string_lossy().into_owned())
        .collect();
    ARGS.with(|a| *a.borrow_mut() = args);

    let hook = HOOK.with(|h| h.borrow_mut().take());
    if let Some(mut hook) = hook {
        hook(module, phase, host);
        HOOK.with(|h| {
            let mut slot = h.borrow_mut();
            if slot.is_none() {
                *slot = Some(hook);
            }
        });
    }
    REPLIES.with(|r| r.borrow_mut().pop_front().unwrap_or(0))
}

pub unsafe extern "C" fn entry_a(
    argc: c_int,
    argv: *const *const c_char,
    phase: Phase,
    host: *mut HostHandle,
) -> c_int {
    unsafe { dispatch("A", argc, argv, phase, host) }
}

pub unsafe extern "C" fn entry_b(
    argc: c_int,
    argv: *const *const c_char,
    phase: Phase,
    host: *mut HostHandle,
) -> c_int {
    unsafe { dispatch("B", argc, argv, phase, host) }
}

/// Image "A": entry A, `foo` = `foo_v1`.
pub fn image_a() -> FakeImage {
    FakeImage::new("A")
        .export("rh_entry", entry_addr(entry_a))
        .export("foo", fn_addr(foo_v1))
}

/// Image "B": entry B, `foo` = `foo_v2`.
pub fn image_b() -> FakeImage {
    FakeImage::new("B")
        .export("rh_entry", entry_addr(entry_b))
        .export("foo", fn_addr(foo_v2))
}

pub fn lookup() -> FakeLookup {
    FakeLookup::default().with(fn_addr(foo_v1), "foo")
}
