//! Page-fault resolution for COW arenas.
//!
//! - [`CowRegistry`]: the set of live COW windows, readable from signal
//!   context.
//! - [`FaultDispatcher`]: the process-wide SIGSEGV/SIGBUS handler that
//!   consults a registry and falls back to a lower-priority consumer.

mod dispatcher;
mod registry;

pub use dispatcher::{Fallback, FallbackHandler, FaultDispatcher, FaultStats};
pub use registry::{CowRegistry, CowSlot};

/// The dispatcher shared by every unit test in this crate.
#[cfg(test)]
pub(crate) fn test_dispatcher() -> &'static FaultDispatcher {
    use std::sync::{Arc, OnceLock};

    static DISPATCHER: OnceLock<&'static FaultDispatcher> = OnceLock::new();
    DISPATCHER.get_or_init(|| {
        FaultDispatcher::install(Arc::new(CowRegistry::default()), Fallback::Previous)
            .expect("dispatcher installs once per test binary")
    })
}
