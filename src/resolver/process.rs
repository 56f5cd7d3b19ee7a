//! Process tree access through `/proc`.

use std::path::Path;

/// Read-only view of the OS process tree.
///
/// The resolver only needs parent links and executable names; tests
/// substitute a fixed tree.
pub trait ProcessTree {
    /// Parent pid of `pid`, or `None` if the process is gone.
    fn parent_of(&self, pid: u32) -> Option<u32>;

    /// Executable file name of `pid` (no directory), if readable.
    fn executable_of(&self, pid: u32) -> Option<String>;
}

/// The live tree as exposed by procfs.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcFs;

impl ProcessTree for ProcFs {
    fn parent_of(&self, pid: u32) -> Option<u32> {
        let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
        parent_from_stat(&stat)
    }

    fn executable_of(&self, pid: u32) -> Option<String> {
        // The `exe` link needs ptrace-level access for other users'
        // processes; `comm` is world-readable but truncated to 15 bytes.
        if let Ok(target) = std::fs::read_link(format!("/proc/{pid}/exe")) {
            if let Some(name) = exe_name(&target) {
                return Some(name);
            }
        }
        let comm = std::fs::read_to_string(format!("/proc/{pid}/comm")).ok()?;
        let comm = comm.trim();
        (!comm.is_empty()).then(|| comm.to_string())
    }
}

/// File name of an `exe` link target, minus the ` (deleted)` suffix the
/// kernel appends after the binary is replaced by an upgrade.
fn exe_name(target: &Path) -> Option<String> {
    let name = target.file_name()?.to_str()?;
    Some(name.trim_end_matches(" (deleted)").to_string())
}

/// Fourth field of a `stat` line. `comm` sits in parentheses and may
/// itself contain spaces or `)`, so fields are counted from the last `)`.
fn parent_from_stat(stat: &str) -> Option<u32> {
    let (_, rest) = stat.rsplit_once(')')?;
    let mut fields = rest.split_whitespace();
    let _state = fields.next()?;
    fields.next()?.parse().ok()
}

/// In-memory tree for tests: pid -> (parent, executable).
#[cfg(test)]
#[derive(Default)]
pub(crate) struct FakeTree {
    procs: std::cell::RefCell<std::collections::HashMap<u32, (u32, String)>>,
}

#[cfg(test)]
impl FakeTree {
    pub(crate) fn with(self, pid: u32, parent: u32, exe: &str) -> Self {
        self.insert(pid, parent, exe);
        self
    }

    pub(crate) fn insert(&self, pid: u32, parent: u32, exe: &str) {
        self.procs.borrow_mut().insert(pid, (parent, exe.to_string()));
    }
}

#[cfg(test)]
impl ProcessTree for FakeTree {
    fn parent_of(&self, pid: u32) -> Option<u32> {
        self.procs.borrow().get(&pid).map(|(parent, _)| *parent)
    }

    fn executable_of(&self, pid: u32) -> Option<String> {
        self.procs.borrow().get(&pid).map(|(_, exe)| exe.clone())
    }
}
