//! Map command - map a file into a guarded arena, inspect it, unmap it.

use super::simple::mark;
use anyhow::{Context, Result};
use std::path::PathBuf;
use wamem_core::{Arena, ArenaConfig, MapRequest, sys};

/// Bytes shown when dumping a mapping.
const DUMP_LEN: usize = 16;

/// Options for the map command.
#[derive(Debug, Clone)]
pub struct MapOptions {
    /// Backing file.
    pub file: PathBuf,
    /// Offset from the data window start.
    pub offset: usize,
    /// Bytes to map; the file length when unset.
    pub length: Option<usize>,
    /// Map read-write and write `marker`.
    pub writable: bool,
    /// Byte written at `offset + 2`.
    pub marker: u8,
    /// Rewrite the file with `length` copies of this byte before mapping.
    pub fill: Option<u8>,
    /// Mapping budget of the arena.
    pub budget: usize,
}

/// Run the map command.
pub fn run(config: &ArenaConfig, options: &MapOptions) -> Result<()> {
    if let (Some(byte), Some(length)) = (options.fill, options.length) {
        fill(&options.file, byte, length)?;
    }

    let length = match options.length {
        Some(length) => length,
        None => {
            let file = sys::open(&options.file, false, false)?;
            let len = sys::stat(&file)?.len();
            sys::close(file)?;
            usize::try_from(len).context("File too large to map")?
        }
    };

    let arena = Arena::guarded(config, options.budget).context("Failed to create guarded arena")?;
    let request = MapRequest::new(&options.file, options.offset, length).writable(options.writable);
    let id = arena
        .map_file(&request)
        .with_context(|| format!("Failed to map {}", options.file.display()))?;

    let address = arena.data().add(options.offset);
    println!("Mapped {} as {id}", options.file.display());
    println!("  Address:  {address}");
    println!("  Length:   {length} bytes");
    println!("  Writable: {}", options.writable);
    println!("  Bytes:    {}", hex(&dump(address, length)));

    if options.writable && length > 2 {
        // SAFETY: the mapping covers `length` writable bytes at `address`.
        unsafe { address.add(2).as_mut_ptr().write_volatile(options.marker) };
        println!("  Wrote {:#04x} at {}", options.marker, address.add(2));
    }

    arena.unmap_file(id)?;
    let guarded = !sys::probe_readable(address, 1);
    println!();
    println!("Unmapped {id}");
    println!("  {} range returned to the guard state", mark(guarded));

    if options.writable {
        let file = sys::open(&options.file, false, false)?;
        let mut buf = vec![0u8; length.min(DUMP_LEN)];
        let read = sys::read_at(&file, &mut buf, 0)?;
        sys::close(file)?;
        buf.truncate(read);
        println!("  File now: {}", hex(&buf));
    }

    if !guarded {
        anyhow::bail!("Unmapped range is still accessible");
    }
    Ok(())
}

/// Replace the contents of `path` with `length` copies of `byte`.
fn fill(path: &std::path::Path, byte: u8, length: usize) -> Result<()> {
    let file = sys::open(path, true, true)?;
    sys::truncate(&file, 0)?;
    let content = vec![byte; length];
    let mut written = 0;
    while written < length {
        let n = sys::write_at(&file, &content[written..], written as u64)?;
        if n == 0 {
            anyhow::bail!("Short write to {} at {written}", path.display());
        }
        written += n;
    }
    sys::close(file)?;
    tracing::debug!(path = %path.display(), byte, length, "Filled backing file");
    Ok(())
}

fn dump(address: wamem_core::Address, length: usize) -> Vec<u8> {
    // SAFETY: the caller passes a live mapping of at least `length` bytes.
    unsafe { std::slice::from_raw_parts(address.as_mut_ptr(), length.min(DUMP_LEN)).to_vec() }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
