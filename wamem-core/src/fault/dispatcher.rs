//! Process-wide SIGSEGV/SIGBUS dispatcher.
//!
//! Installed at most once. Every protection fault on the process is first
//! offered to the [`CowRegistry`]; if no COW window claims it, the fault goes
//! to the configured [`Fallback`], and if that declines too the process dies
//! with the default disposition for the signal.
//!
//! Everything reachable from [`handle_fault`] is async-signal-safe: atomics,
//! `mprotect`, `write`, `sigaction` and `raise`. Nothing in here allocates or
//! takes a lock on the fault path.

use super::registry::CowRegistry;
use crate::error::{Result, VmError};
use crate::sys::raw;
use crate::types::Address;
use libc::{c_int, c_void, siginfo_t};
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::{fmt, io, mem, ptr};

/// A lower-priority fault consumer. Returns `true` if it resolved the fault.
pub type FallbackHandler = fn(c_int, *mut siginfo_t, *mut c_void) -> bool;

/// What to do with faults no COW arena claims.
#[derive(Debug, Clone, Copy, Default)]
pub enum Fallback {
    /// Treat them as fatal.
    None,
    /// Chain to the handler that was installed before the dispatcher, such
    /// as the runtime's stack-overflow handler.
    #[default]
    Previous,
    /// Offer them to a custom handler.
    Handler(FallbackHandler),
}

/// Snapshot of the dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultStats {
    /// Faults resolved by committing a COW page.
    pub claimed: u64,
    /// Faults passed to the fallback consumer.
    pub delegated: u64,
    /// Faults nobody claimed. Only nonzero in a dying process.
    pub unclaimed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    claimed: AtomicU64,
    delegated: AtomicU64,
    unclaimed: AtomicU64,
}

const SIGNALS: [(c_int, &str); 2] = [(libc::SIGSEGV, "SIGSEGV"), (libc::SIGBUS, "SIGBUS")];

static INSTALLED: AtomicPtr<FaultDispatcher> = AtomicPtr::new(ptr::null_mut());

/// The installed fault dispatcher.
pub struct FaultDispatcher {
    registry: Arc<CowRegistry>,
    fallback: Fallback,
    /// Actions in place before installation, indexed like [`SIGNALS`].
    previous: [libc::sigaction; 2],
    counters: Counters,
}

impl fmt::Debug for FaultDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultDispatcher")
            .field("registry", &self.registry)
            .field("fallback", &self.fallback)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl FaultDispatcher {
    /// Install the dispatcher for this process.
    ///
    /// The dispatcher lives until the process exits. A second call fails
    /// with [`VmError::DispatcherInstalled`].
    pub fn install(registry: Arc<CowRegistry>, fallback: Fallback) -> Result<&'static Self> {
        if !INSTALLED.load(Ordering::SeqCst).is_null() {
            return Err(VmError::DispatcherInstalled);
        }

        // SAFETY: sigaction is plain data; all-zero is a valid value.
        let mut previous: [libc::sigaction; 2] = unsafe { mem::zeroed() };
        for ((signal, name), old) in SIGNALS.iter().zip(previous.iter_mut()) {
            // SAFETY: a null new action only queries the current one.
            if unsafe { libc::sigaction(*signal, ptr::null(), old) } != 0 {
                return Err(VmError::SignalInstall {
                    signal: *name,
                    source: io::Error::last_os_error(),
                });
            }
        }

        let dispatcher = Box::into_raw(Box::new(Self {
            registry,
            fallback,
            previous,
            counters: Counters::default(),
        }));
        if INSTALLED
            .compare_exchange(ptr::null_mut(), dispatcher, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // SAFETY: never published, so we are the only owner.
            drop(unsafe { Box::from_raw(dispatcher) });
            return Err(VmError::DispatcherInstalled);
        }

        // SAFETY: published above and never freed.
        let dispatcher: &'static Self = unsafe { &*dispatcher };
        for (signal, name) in SIGNALS {
            // SAFETY: the action is fully initialized before use.
            unsafe {
                let mut action: libc::sigaction = mem::zeroed();
                action.sa_sigaction = handle_fault as usize;
                action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;
                libc::sigemptyset(&mut action.sa_mask);
                if libc::sigaction(signal, &action, ptr::null_mut()) != 0 {
                    return Err(VmError::SignalInstall {
                        signal: name,
                        source: io::Error::last_os_error(),
                    });
                }
            }
        }

        tracing::info!(
            registry_capacity = dispatcher.registry.capacity(),
            fallback = ?dispatcher.fallback,
            "Installed fault dispatcher"
        );
        Ok(dispatcher)
    }

    /// The installed dispatcher, if any.
    pub fn installed() -> Option<&'static Self> {
        // SAFETY: a published dispatcher is never freed.
        unsafe { INSTALLED.load(Ordering::SeqCst).as_ref() }
    }

    /// The registry consulted on every fault.
    pub fn registry(&self) -> &Arc<CowRegistry> {
        &self.registry
    }

    /// The fallback consumer.
    pub fn fallback(&self) -> Fallback {
        self.fallback
    }

    /// Current counters.
    pub fn stats(&self) -> FaultStats {
        FaultStats {
            claimed: self.counters.claimed.load(Ordering::Relaxed),
            delegated: self.counters.delegated.load(Ordering::Relaxed),
            unclaimed: self.counters.unclaimed.load(Ordering::Relaxed),
        }
    }

    fn delegate(&self, signal: c_int, info: *mut siginfo_t, context: *mut c_void) -> bool {
        match self.fallback {
            Fallback::None => false,
            Fallback::Handler(handler) => handler(signal, info, context),
            Fallback::Previous => {
                let Some(index) = SIGNALS.iter().position(|(s, _)| *s == signal) else {
                    return false;
                };
                // SAFETY: the previous action was installed for this signal
                // with these calling conventions.
                let handled = unsafe { chain(&self.previous[index], signal, info, context) };
                // A chained handler that declines by restoring the default
                // action (std's stack-overflow handler does) has not
                // resolved anything; returning would refault silently.
                handled && still_installed(signal)
            }
        }
    }
}

/// Call a previously installed action. `false` for default or ignore.
unsafe fn chain(
    action: &libc::sigaction,
    signal: c_int,
    info: *mut siginfo_t,
    context: *mut c_void,
) -> bool {
    let handler = action.sa_sigaction;
    if handler == libc::SIG_DFL || handler == libc::SIG_IGN {
        return false;
    }
    if action.sa_flags & libc::SA_SIGINFO != 0 {
        // SAFETY: SA_SIGINFO handlers take three arguments.
        let f: extern "C" fn(c_int, *mut siginfo_t, *mut c_void) =
            unsafe { mem::transmute(handler) };
        f(signal, info, context);
    } else {
        // SAFETY: plain handlers take the signal number only.
        let f: extern "C" fn(c_int) = unsafe { mem::transmute(handler) };
        f(signal);
    }
    true
}

/// Whether [`handle_fault`] is still the action for `signal`.
fn still_installed(signal: c_int) -> bool {
    // SAFETY: a null new action only queries; sigaction is
    // async-signal-safe.
    unsafe {
        let mut current: libc::sigaction = mem::zeroed();
        libc::sigaction(signal, ptr::null(), &mut current) == 0
            && current.sa_sigaction == handle_fault as usize
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn fault_address(info: *const siginfo_t) -> usize {
    // SAFETY: the kernel fills si_addr for SIGSEGV and SIGBUS.
    unsafe { (*info).si_addr() as usize }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
unsafe fn fault_address(info: *const siginfo_t) -> usize {
    // SAFETY: the kernel fills si_addr for SIGSEGV and SIGBUS.
    unsafe { (*info).si_addr as usize }
}

extern "C" fn handle_fault(signal: c_int, info: *mut siginfo_t, context: *mut c_void) {
    // SAFETY: INSTALLED is published before the handler and never freed.
    let Some(dispatcher) = (unsafe { INSTALLED.load(Ordering::SeqCst).as_ref() }) else {
        die(signal, Address::NULL);
        return;
    };
    // SAFETY: the kernel passes a valid siginfo for SA_SIGINFO handlers.
    let addr = Address::new(unsafe { fault_address(info) });

    if dispatcher.registry.try_handle_fault(addr) {
        dispatcher.counters.claimed.fetch_add(1, Ordering::Relaxed);
        return;
    }
    if dispatcher.delegate(signal, info, context) {
        dispatcher.counters.delegated.fetch_add(1, Ordering::Relaxed);
        return;
    }
    dispatcher.counters.unclaimed.fetch_add(1, Ordering::Relaxed);
    die(signal, addr);
}

/// Report an unclaimed fault, restore the default action and re-raise.
fn die(signal: c_int, addr: Address) {
    let name = SIGNALS
        .iter()
        .find(|(s, _)| *s == signal)
        .map_or("signal", |(_, name)| name);
    let mut hex = [0u8; 18];
    raw::write_stderr(b"wamem: unclaimed ");
    raw::write_stderr(name.as_bytes());
    raw::write_stderr(b" at ");
    raw::write_stderr(raw::format_hex(addr.as_usize(), &mut hex));
    raw::write_stderr(b"\n");

    // SAFETY: resetting to SIG_DFL and raising are async-signal-safe. The
    // raised signal stays pending until this handler returns, after which
    // the default action terminates the process.
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = libc::SIG_DFL;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(signal, &action, ptr::null_mut());
        libc::raise(signal);
    }
}
