//! Version command - show version information.

use anyhow::Result;
use wamem_core::config::{DATA_WINDOW_SIZE, RESERVATION_SIZE};

/// Version information.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the version command.
pub fn run() -> Result<()> {
    println!("wamem - Guarded linear memory arenas");
    println!();
    println!("Version:     {}", VERSION);
    println!(
        "Platform:    {} / {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    println!("Reservation: {} bytes", RESERVATION_SIZE);
    println!("Window:      {} bytes", DATA_WINDOW_SIZE);
    println!();
    println!("Components:");
    println!("  wamem-core  Reservations, arenas, file mappings, fault dispatch");
    println!("  wamem-cli   Command-line interface");

    Ok(())
}
