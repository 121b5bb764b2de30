//! COW command - touch pages of lazily committed arenas.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::thread;
use wamem_core::{Arena, ArenaConfig, CowRegistry, Fallback, FaultDispatcher, PAGE_SIZE};

/// Run the COW command.
pub fn run(config: &ArenaConfig, arenas: usize, touch: usize, threads: usize) -> Result<()> {
    let threads = threads.max(1);
    let pages = config.layout.data_window_size / PAGE_SIZE;
    if touch > pages {
        anyhow::bail!("Cannot touch {touch} pages of a {pages}-page window");
    }

    let registry = Arc::new(CowRegistry::from_config(config));
    let dispatcher = FaultDispatcher::install(Arc::clone(&registry), Fallback::Previous)
        .context("Failed to install fault dispatcher")?;

    let arenas = (0..arenas)
        .map(|_| Arena::cow(config, &registry))
        .collect::<wamem_core::Result<Vec<_>>>()
        .context("Failed to create COW arena")?;

    for arena in &arenas {
        let data = arena.data();
        thread::scope(|scope| {
            for t in 0..threads {
                scope.spawn(move || {
                    for page in (t..touch).step_by(threads) {
                        // SAFETY: the page lies in a registered COW window;
                        // the first write faults and is resolved by the
                        // dispatcher.
                        unsafe { data.add(page * PAGE_SIZE).as_mut_ptr().write_volatile(1) };
                    }
                });
            }
        });
        tracing::debug!(arena = %arena.id(), touch, threads, "Touched pages");
    }

    println!("COW arenas ({} live, registry capacity {})", registry.live_count(), registry.capacity());
    for arena in &arenas {
        let committed = arena.as_cow().map_or(0, |cow| cow.committed_pages());
        println!("  {}  {}  committed pages: {committed}", arena.id(), arena.data());
    }

    let stats = dispatcher.stats();
    println!();
    println!("Dispatcher");
    println!("  Claimed:   {}", stats.claimed);
    println!("  Delegated: {}", stats.delegated);
    println!("  Unclaimed: {}", stats.unclaimed);

    Ok(())
}
