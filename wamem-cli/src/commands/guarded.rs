//! Guarded command - create a guarded arena and check its sub-ranges.

use super::simple::mark;
use anyhow::{Context, Result};
use wamem_core::{Arena, ArenaConfig, PAGE_SIZE, sys};

/// Run the guarded command.
pub fn run(config: &ArenaConfig, budget: usize) -> Result<()> {
    let arena = Arena::guarded(config, budget).context("Failed to create guarded arena")?;
    let guarded = arena
        .as_guarded()
        .context("Guarded constructor returned another mode")?;
    let heap = guarded.heap();
    let reservation = guarded.reservation();

    let last = heap.end().as_usize() - PAGE_SIZE;
    let heap_pages = [heap.start(), wamem_core::Address::new(last)];
    let mut heap_ok = true;
    for page in heap_pages {
        // SAFETY: the heap is committed read-write for the arena's lifetime.
        unsafe {
            page.as_mut_ptr().write_volatile(0xa5);
            heap_ok &= page.as_mut_ptr().read_volatile() == 0xa5;
        }
    }

    let budget_guarded = budget == 0 || !sys::probe_readable(arena.data(), 1);
    let lower_guarded = !sys::probe_readable(reservation.base(), 1);
    let upper_guarded = !sys::probe_readable(heap.end(), 1);

    println!("Guarded arena {}", arena.id());
    println!("  Reservation:    {}", reservation.range());
    println!("  Data window:    {}", reservation.data_window());
    println!("  Mapping budget: {budget} bytes");
    println!("  Heap:           {heap}");
    println!();
    println!("  {} heap is readable and writable", mark(heap_ok));
    println!("  {} mapping budget is not accessible", mark(budget_guarded));
    println!("  {} negative guard is not accessible", mark(lower_guarded));
    println!("  {} trailing guard is not accessible", mark(upper_guarded));

    if !(heap_ok && budget_guarded && lower_guarded && upper_guarded) {
        anyhow::bail!("Guarded arena verification failed");
    }
    Ok(())
}
