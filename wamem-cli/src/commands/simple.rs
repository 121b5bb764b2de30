//! Simple command - create a heap-backed arena and verify it.

use anyhow::{Context, Result};
use wamem_core::Arena;
use wamem_core::config::pages_spanned;

/// Run the simple command.
pub fn run(size: usize) -> Result<()> {
    let arena = Arena::simple(size).context("Failed to create simple arena")?;
    tracing::info!(arena = %arena.id(), size, "Filling simple arena");

    // SAFETY: a simple arena is `size` committed bytes owned by `arena`.
    let bytes = unsafe { std::slice::from_raw_parts_mut(arena.data().as_mut_ptr(), arena.size()) };
    let zeroed = bytes.iter().all(|b| *b == 0);
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }
    let verified = bytes.iter().enumerate().all(|(i, b)| *b == (i % 251) as u8);

    println!("Simple arena {}", arena.id());
    println!("  Data: {}", arena.data());
    println!("  Size: {} bytes ({} pages)", arena.size(), pages_spanned(arena.size()));
    println!("  {} zero-filled on creation", mark(zeroed));
    println!("  {} pattern written and read back", mark(verified));

    if !(zeroed && verified) {
        anyhow::bail!("Simple arena verification failed");
    }
    Ok(())
}

pub(crate) fn mark(ok: bool) -> &'static str {
    if ok { "✓" } else { "✗" }
}
