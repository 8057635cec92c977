//! Single-instance enforcement.
//!
//! The lock is an OS advisory lock held on an open file descriptor, so it
//! is released by the kernel the moment the owning process dies. A crashed
//! instance can therefore never leave a lock behind that blocks the next
//! launch; the file body is only informational.

use crate::worker::{Result, WorkerError};

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::panic::Location;
use std::path::Path;

use error_location::ErrorLocation;

const LOCK_FILENAME: &str = "instance.lock";

/// Outcome of an acquisition attempt. Contention is control flow, not an
/// error: the second instance forwards activation and exits.
pub enum LockResult {
    Acquired(InstanceGuard),
    AlreadyHeld { holder_pid: Option<u32> },
}

/// Held for the lifetime of the application process.
pub struct InstanceGuard {
    file: Option<File>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct LockInfo {
    pid: u32,
    started_at: String,
}

impl InstanceGuard {
    /// Try to become the single running instance.
    pub fn acquire(data_dir: &Path) -> Result<LockResult> {
        let path = data_dir.join(LOCK_FILENAME);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| WorkerError::LockAcquisition {
                path: path.clone(),
                source: e,
                location: ErrorLocation::from(Location::caller()),
            })?;

        if !Self::try_lock_exclusive(&file) {
            let holder_pid = Self::read_holder_pid(&mut file);
            return Ok(LockResult::AlreadyHeld { holder_pid });
        }

        let mut guard = Self { file: Some(file) };
        guard.write_info()?;

        Ok(LockResult::Acquired(guard))
    }

    /// Non-blocking exclusive lock on the open descriptor.
    #[cfg(unix)]
    fn try_lock_exclusive(file: &File) -> bool {
        use std::os::fd::AsRawFd;
        unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) == 0 }
    }

    #[cfg(windows)]
    fn try_lock_exclusive(file: &File) -> bool {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::Storage::FileSystem::{
            LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx,
        };

        let mut overlapped: windows_sys::Win32::System::IO::OVERLAPPED =
            unsafe { std::mem::zeroed() };
        unsafe {
            LockFileEx(
                file.as_raw_handle() as HANDLE,
                LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
                0,
                u32::MAX,
                u32::MAX,
                &mut overlapped,
            ) != 0
        }
    }

    /// Record who holds the lock. Advisory locks do not block reads, so a
    /// second instance can still address the holder.
    fn write_info(&mut self) -> Result<()> {
        let info = LockInfo {
            pid: std::process::id(),
            started_at: chrono::Utc::now().to_rfc3339(),
        };

        let content = serde_json::to_string_pretty(&info)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        if let Some(ref mut file) = self.file {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }

        Ok(())
    }

    fn read_holder_pid(file: &mut File) -> Option<u32> {
        let mut content = String::new();
        file.seek(SeekFrom::Start(0)).ok()?;
        file.read_to_string(&mut content).ok()?;
        serde_json::from_str::<LockInfo>(&content)
            .ok()
            .map(|info| info.pid)
    }

    /// Release the lock explicitly. Dropping the guard (or dying) has the
    /// same effect: the kernel releases the lock when the descriptor
    /// closes. The file is never unlinked; removing it would let a waiter
    /// that already opened the old path lock an orphaned inode while a
    /// third instance locks a fresh file under the same name.
    pub fn release(&mut self) {
        self.file.take();
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Ask the running instance to present itself (show window, focus).
///
/// The payload is a plain OS-level signal; the holder's shell maps it to
/// an activation event. Best effort: a dead holder is simply ignored.
#[cfg(unix)]
pub fn forward_activation(holder_pid: Option<u32>) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    if let Some(pid) = holder_pid {
        tracing::info!("Forwarding activation to running instance (pid {pid})");
        kill(Pid::from_raw(pid as i32), Signal::SIGUSR1).ok();
    }
}

#[cfg(windows)]
pub fn forward_activation(_holder_pid: Option<u32>) {
    use windows_sys::Win32::System::Threading::{CreateEventW, SetEvent};

    let name: Vec<u16> = "Local\\FeedVoxActivate\0".encode_utf16().collect();
    unsafe {
        let event = CreateEventW(std::ptr::null(), 0, 0, name.as_ptr());
        if !event.is_null() {
            SetEvent(event);
        }
    }
}
