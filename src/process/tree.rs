use tracing::{debug, warn};

/// Kills a spawned process together with everything it started.
///
/// Lighthouse launches Chrome as its own child, so signalling only the direct
/// child leaves the browser running. On unix the child is spawned as the
/// leader of a fresh process group and the whole group is killed. On Windows
/// `taskkill /T` walks the tree.
///
/// Armed until [`disarm`](Self::disarm) is called; dropping an armed guard
/// kills the tree.
pub struct ProcessTreeGuard {
    pid: Option<u32>,
}

impl ProcessTreeGuard {
    pub fn new(pid: Option<u32>) -> Self {
        Self { pid }
    }

    /// Kill the tree now. Later calls and the drop are no-ops.
    pub fn kill(&mut self) {
        if let Some(pid) = self.pid.take() {
            kill_tree(pid);
        }
    }

    /// The process exited on its own; leave its group alone.
    pub fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for ProcessTreeGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_tree(pid: u32) {
    let Ok(pgid) = i32::try_from(pid) else {
        warn!("PID {} out of range, cannot signal its group", pid);
        return;
    };
    // SAFETY: kill(2) with a negative pid only sends a signal to that group.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc == 0 {
        debug!("Killed process group {}", pgid);
    } else {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!("Failed to kill process group {}: {}", pgid, err);
        }
    }
}

#[cfg(windows)]
fn kill_tree(pid: u32) {
    use std::process::{Command, Stdio};

    // Runs from Drop, so fire and forget instead of awaiting taskkill.
    match Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(_) => debug!("taskkill /T issued for PID {}", pid),
        Err(e) => warn!("taskkill failed for PID {}: {}", pid, e),
    }
}
