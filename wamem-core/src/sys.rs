//! Checked wrappers around the OS primitives used by arenas.
//!
//! Every wrapper either returns the primitive's success value or a
//! [`VmError::SystemCall`] naming the primitive and its arguments. There are
//! no partial-success states: a reservation or protection change either
//! happened completely or the caller gets an error.
//!
//! The [`raw`] submodule holds the few calls made from signal context. They
//! report failure as `false` and never allocate.

use crate::error::{Result, ResultExt, VmError, range_args};
use crate::types::Address;
use fs2::FileExt as _;
use std::fs::{File, Metadata, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, IntoRawFd};
use std::os::unix::fs::FileExt as _;
use std::path::Path;
use std::ptr;

/// Page protection applied to a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    /// No access; any touch faults.
    None,
    /// Readable only.
    ReadOnly,
    /// Readable and writable.
    ReadWrite,
}

impl Protection {
    /// Protection for a committed range.
    #[must_use]
    pub fn committed(writable: bool) -> Self {
        if writable {
            Self::ReadWrite
        } else {
            Self::ReadOnly
        }
    }

    fn as_prot(self) -> libc::c_int {
        match self {
            Self::None => libc::PROT_NONE,
            Self::ReadOnly => libc::PROT_READ,
            Self::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        }
    }
}

const ANON_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE;

/// The OS page size.
pub fn page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).unwrap_or(crate::types::PAGE_SIZE)
}

/// Reserve `len` bytes of inaccessible address space at an OS-chosen base.
pub fn reserve(len: usize) -> Result<Address> {
    // SAFETY: a non-fixed anonymous mapping cannot clobber existing mappings.
    let ptr = unsafe { libc::mmap(ptr::null_mut(), len, libc::PROT_NONE, ANON_FLAGS, -1, 0) };
    if ptr == libc::MAP_FAILED {
        return Err(VmError::ReservationExhausted {
            size: len,
            source: io::Error::last_os_error(),
        });
    }
    Ok(Address::from_ptr(ptr))
}

/// Replace `[addr, addr + len)` with fresh zero-filled anonymous memory.
///
/// # Safety
///
/// The range must lie inside a reservation owned by the caller, and nothing
/// may hold references into it: its previous contents are discarded.
pub unsafe fn map_anonymous_fixed(addr: Address, len: usize, prot: Protection) -> Result<()> {
    if unsafe { raw::map_anonymous_fixed(addr, len, prot) } {
        Ok(())
    } else {
        Err(io::Error::last_os_error()).syscall("mmap", || {
            format!("{}, {prot:?}, MAP_FIXED|MAP_ANONYMOUS", range_args(addr, len))
        })
    }
}

/// Replace `[addr, addr + len)` with a shared mapping of `file` at
/// `file_offset`.
///
/// # Safety
///
/// Same contract as [`map_anonymous_fixed`].
pub unsafe fn map_file_fixed(
    addr: Address,
    len: usize,
    prot: Protection,
    file: &File,
    file_offset: u64,
) -> Result<()> {
    let offset = libc::off_t::try_from(file_offset).map_err(|_| VmError::SystemCall {
        primitive: "mmap",
        args: format!("{}, offset {file_offset}", range_args(addr, len)),
        source: io::Error::from_raw_os_error(libc::EOVERFLOW),
    })?;
    // SAFETY: the caller owns the fixed range.
    let ptr = unsafe {
        libc::mmap(
            addr.as_mut_ptr().cast(),
            len,
            prot.as_prot(),
            libc::MAP_SHARED | libc::MAP_FIXED,
            file.as_raw_fd(),
            offset,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error()).syscall("mmap", || {
            format!(
                "{}, {prot:?}, MAP_FIXED|MAP_SHARED, fd {}, offset {file_offset}",
                range_args(addr, len),
                file.as_raw_fd()
            )
        });
    }
    Ok(())
}

/// Change the protection of `[addr, addr + len)`.
///
/// # Safety
///
/// The range must be owned by the caller. Revoking access to memory that
/// live references point into turns their next use into a fault.
pub unsafe fn protect(addr: Address, len: usize, prot: Protection) -> Result<()> {
    if unsafe { raw::protect(addr, len, prot) } {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
            .syscall("mprotect", || format!("{}, {prot:?}", range_args(addr, len)))
    }
}

/// Unmap `[addr, addr + len)`.
///
/// # Safety
///
/// The range must be owned by the caller and never touched again.
pub unsafe fn unmap(addr: Address, len: usize) -> Result<()> {
    // SAFETY: forwarded from the caller.
    let rc = unsafe { libc::munmap(addr.as_mut_ptr().cast(), len) };
    if rc != 0 {
        return Err(io::Error::last_os_error()).syscall("munmap", || range_args(addr, len));
    }
    Ok(())
}

/// Pin `[addr, addr + len)` in physical memory.
pub fn lock_range(addr: Address, len: usize) -> Result<()> {
    // SAFETY: mlock only changes residency, never contents or protection.
    let rc = unsafe { libc::mlock(addr.as_mut_ptr().cast_const().cast(), len) };
    if rc != 0 {
        return Err(io::Error::last_os_error()).syscall("mlock", || range_args(addr, len));
    }
    Ok(())
}

/// Open `path` read-only, or read-write when `writable`.
///
/// With `create`, a missing file is created (implies read-write).
pub fn open(path: &Path, writable: bool, create: bool) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(writable || create)
        .create(create)
        .open(path)
        .syscall("open", || {
            format!("{:?}, writable={writable}, create={create}", path.display())
        })
}

/// Close `file`, reporting the error `Drop` would swallow.
pub fn close(file: File) -> Result<()> {
    let fd = file.into_raw_fd();
    // SAFETY: `fd` was just released by `File` and is closed exactly once.
    let rc = unsafe { libc::close(fd) };
    if rc != 0 {
        return Err(io::Error::last_os_error()).syscall("close", || fd.to_string());
    }
    Ok(())
}

/// Read into `buf` from `file` at `offset`.
pub fn read_at(file: &File, buf: &mut [u8], offset: u64) -> Result<usize> {
    file.read_at(buf, offset).syscall("pread", || {
        format!("fd {}, {} bytes, offset {offset}", file.as_raw_fd(), buf.len())
    })
}

/// Write `buf` to `file` at `offset`.
pub fn write_at(file: &File, buf: &[u8], offset: u64) -> Result<usize> {
    file.write_at(buf, offset).syscall("pwrite", || {
        format!("fd {}, {} bytes, offset {offset}", file.as_raw_fd(), buf.len())
    })
}

/// Set the length of `file`.
pub fn truncate(file: &File, len: u64) -> Result<()> {
    file.set_len(len)
        .syscall("ftruncate", || format!("fd {}, {len}", file.as_raw_fd()))
}

/// Stat an open file.
pub fn stat(file: &File) -> Result<Metadata> {
    file.metadata()
        .syscall("fstat", || format!("fd {}", file.as_raw_fd()))
}

/// Take an exclusive advisory lock on `file` without blocking.
///
/// The lock is released when the file is closed.
pub fn lock_exclusive(file: &File, path: &Path) -> Result<()> {
    file.try_lock_exclusive()
        .map_err(|source| VmError::BackingFileLocked {
            path: path.to_path_buf(),
            source,
        })
}

/// Check whether `[addr, addr + len)` is readable without touching it from
/// user space.
///
/// The bytes are copied by the kernel into a pipe, which fails with
/// `EFAULT` instead of raising a fault. At most one page is probed.
pub fn probe_readable(addr: Address, len: usize) -> bool {
    let len = len.clamp(1, crate::types::PAGE_SIZE);
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: `fds` has room for the two descriptors pipe writes.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return false;
    }
    // SAFETY: the kernel validates the source range and reports EFAULT.
    let written = unsafe { libc::write(fds[1], addr.as_mut_ptr().cast_const().cast(), len) };
    // SAFETY: both descriptors were created above and are closed once.
    unsafe {
        libc::close(fds[0]);
        libc::close(fds[1]);
    }
    written > 0
}

/// Allocation-free primitives for signal context.
pub mod raw {
    use super::{ANON_FLAGS, Protection};
    use crate::types::Address;

    /// `mmap(MAP_FIXED | MAP_ANONYMOUS)`; `false` on failure with errno set.
    ///
    /// # Safety
    ///
    /// See [`super::map_anonymous_fixed`].
    pub unsafe fn map_anonymous_fixed(addr: Address, len: usize, prot: Protection) -> bool {
        // SAFETY: forwarded from the caller.
        let ptr = unsafe {
            libc::mmap(
                addr.as_mut_ptr().cast(),
                len,
                prot.as_prot(),
                ANON_FLAGS | libc::MAP_FIXED,
                -1,
                0,
            )
        };
        ptr != libc::MAP_FAILED
    }

    /// `mprotect`; `false` on failure with errno set.
    ///
    /// # Safety
    ///
    /// See [`super::protect`].
    pub unsafe fn protect(addr: Address, len: usize, prot: Protection) -> bool {
        // SAFETY: forwarded from the caller.
        unsafe { libc::mprotect(addr.as_mut_ptr().cast(), len, prot.as_prot()) == 0 }
    }

    /// Write `bytes` to stderr, ignoring errors.
    pub fn write_stderr(bytes: &[u8]) {
        // SAFETY: `bytes` is a valid readable slice.
        unsafe {
            libc::write(libc::STDERR_FILENO, bytes.as_ptr().cast(), bytes.len());
        }
    }

    /// Format `value` as `0x`-prefixed hex into `buf`, returning the used
    /// prefix of `buf`.
    pub fn format_hex(value: usize, buf: &mut [u8; 18]) -> &[u8] {
        const DIGITS: &[u8; 16] = b"0123456789abcdef";
        buf[0] = b'0';
        buf[1] = b'x';
        let mut digits = [0u8; 16];
        let mut n = value;
        let mut count = 0;
        loop {
            digits[count] = DIGITS[n & 0xf];
            count += 1;
            n >>= 4;
            if n == 0 {
                break;
            }
        }
        for i in 0..count {
            buf[2 + i] = digits[count - 1 - i];
        }
        &buf[..2 + count]
    }
}
