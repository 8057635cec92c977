//! Best-effort cleanup of orphaned worker processes.
//!
//! A previous supervisor that died without stopping its worker leaves a
//! process holding the worker port. Before spawning we scan the process
//! table for command lines that name our entry script and ask them to
//! terminate. Absence is fine; refusal is fine; the subsequent liveness
//! re-check decides what actually happens.

use sysinfo::System;

/// An orphan candidate found in the process table.
#[derive(Debug, Clone)]
pub struct OrphanProcess {
    pub pid: u32,
    pub name: String,
}

/// Scan the process table for workers spawned by an earlier instance.
///
/// Matches on the command line containing the entry-script name, never on
/// the interpreter name alone (every Python process would match).
fn find_orphans(entry_script: &str, own_pid: u32) -> Vec<OrphanProcess> {
    let pattern = entry_script.to_lowercase();
    let mut sys = System::new_all();
    sys.refresh_all();

    sys.processes()
        .iter()
        .filter(|(pid, process)| {
            if pid.as_u32() == own_pid {
                return false;
            }
            let cmdline = process.cmd().join(" ").to_lowercase();
            cmdline.contains(&pattern)
        })
        .map(|(pid, process)| OrphanProcess {
            pid: pid.as_u32(),
            name: process.name().to_string(),
        })
        .collect()
}

fn terminate(pid: u32) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).ok();
    }

    #[cfg(windows)]
    {
        std::process::Command::new("taskkill")
            .args(["/F", "/PID", &pid.to_string()])
            .output()
            .ok();
    }
}

/// Find and terminate orphaned workers. Returns how many were signaled.
///
/// The process-table scan is a synchronous walk of the whole table, so it
/// runs on the blocking pool rather than a runtime worker thread.
pub async fn cleanup(entry_script: &str) -> usize {
    let script = entry_script.to_string();
    let own_pid = std::process::id();

    let orphans = tokio::task::spawn_blocking(move || find_orphans(&script, own_pid))
        .await
        .unwrap_or_default();

    if orphans.is_empty() {
        return 0;
    }

    for orphan in &orphans {
        tracing::info!("Terminating orphaned worker {} (pid {})", orphan.name, orphan.pid);
        terminate(orphan.pid);
    }
    orphans.len()
}
