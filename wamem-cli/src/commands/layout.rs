//! Layout command - print the effective reservation layout.

use anyhow::Result;
use wamem_core::config::{DATA_WINDOW_SIZE, WASM_PAGE_SIZE};
use wamem_core::{ArenaConfig, PAGE_SIZE, sys};

/// Run the layout command.
pub fn run(config: &ArenaConfig) -> Result<()> {
    let layout = &config.layout;

    println!("Reservation Layout");
    println!("==================");
    println!();
    println!("  Reservation:     {:>14} bytes", layout.reservation_size);
    println!("  Negative guard:  {:>14} bytes", layout.negative_guard_size);
    println!(
        "  Data window:     {:>14} bytes ({} wasm pages)",
        layout.data_window_size,
        layout.data_window_size / WASM_PAGE_SIZE
    );
    println!("  Trailing guard:  {:>14} bytes", layout.trailing_guard_size());
    println!();
    println!("  Page size:       {:>14} bytes (OS reports {})", PAGE_SIZE, sys::page_size());
    println!("  Registry slots:  {:>14}", config.registry_capacity);

    if layout.data_window_size != DATA_WINDOW_SIZE {
        println!();
        println!("  Note: data window differs from the default of {DATA_WINDOW_SIZE} bytes");
    }

    Ok(())
}
