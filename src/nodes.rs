//! Storage nodes: which configured machines are this host, and how bytes
//! reach the others
//!
//! Machine names are resolved once when a bucket opens. Every remote copy
//! goes through a [`Transport`], addressed by the remote's `user@host`
//! string and a path relative to the bucket root.

use std::collections::HashSet;
use std::ffi::OsString;
use std::net::{IpAddr, ToSocketAddrs};
use std::path::Path;
use std::process::{Command, Output};

use tracing::{debug, warn};

use crate::error::{Result, StorageError};

/// Local/remote partition of a bucket's machines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSet {
    local: bool,
    remotes: Vec<String>,
}

impl NodeSet {
    pub fn new(local: bool, remotes: Vec<String>) -> Self {
        Self { local, remotes }
    }

    /// Split `machines` into this host and remote addresses. `user` is
    /// prefixed to remote addresses that don't already name one.
    pub fn resolve(machines: &[String], user: &str) -> Result<Self> {
        if machines.is_empty() {
            return Err(StorageError::Config("machines is empty".to_string()));
        }

        let own = own_addresses();
        let mut set = NodeSet::default();
        for machine in machines {
            let machine = machine.trim();
            if machine.is_empty() {
                return Err(StorageError::Config("empty machine address".to_string()));
            }
            if is_local(machine, &own) {
                set.local = true;
            } else if user.is_empty() || machine.contains('@') {
                set.remotes.push(machine.to_string());
            } else {
                set.remotes.push(format!("{}@{}", user, machine));
            }
        }
        debug!(local = set.local, remotes = ?set.remotes, "Resolved storage nodes");
        Ok(set)
    }

    /// Whether this host stores a replica
    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn remotes(&self) -> &[String] {
        &self.remotes
    }
}

struct OwnAddresses {
    hostname: Option<String>,
    ips: HashSet<IpAddr>,
}

fn own_addresses() -> OwnAddresses {
    let hostname = hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().to_string())
        .filter(|h| !h.is_empty());
    let ips = hostname
        .as_deref()
        .map(|h| lookup(h).into_iter().collect())
        .unwrap_or_default();
    OwnAddresses { hostname, ips }
}

fn lookup(host: &str) -> Vec<IpAddr> {
    match (host, 0).to_socket_addrs() {
        Ok(addrs) => addrs.map(|a| a.ip()).collect(),
        Err(e) => {
            debug!(host = %host, error = %e, "Address lookup failed");
            Vec::new()
        }
    }
}

fn is_local(machine: &str, own: &OwnAddresses) -> bool {
    let host = machine.rsplit('@').next().unwrap_or(machine);
    let host = host.trim_start_matches('[').trim_end_matches(']');

    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || own.ips.contains(&ip);
    }
    if own
        .hostname
        .as_deref()
        .is_some_and(|h| h.eq_ignore_ascii_case(host))
    {
        return true;
    }

    let resolved = lookup(host);
    if resolved.is_empty() {
        warn!(machine = %machine, "Cannot resolve machine, treating it as remote");
        return false;
    }
    resolved
        .iter()
        .any(|ip| ip.is_loopback() || own.ips.contains(ip))
}

/// Moves bytes to and from remote nodes.
///
/// Paths are relative to the bucket root `root`, which is the same on every
/// node.
pub trait Transport: Send + Sync {
    /// Copy the local file `src` to `root/path` on `addr`, creating parent
    /// directories as needed.
    fn push(&self, addr: &str, root: &Path, path: &Path, src: &Path) -> Result<()>;

    /// Whether `root/path` exists on `addr`.
    fn exists(&self, addr: &str, root: &Path, path: &Path) -> Result<bool>;

    /// Remove `root/path` on `addr` along with any parent directories it
    /// leaves empty, never `root` itself. A missing file is not an error.
    fn remove(&self, addr: &str, root: &Path, path: &Path) -> Result<()>;
}

/// [`Transport`] over the `ssh` and `scp` commands. Authentication is left
/// to the ssh client configuration (keys, agent, `~/.ssh/config`).
#[derive(Debug, Clone, Default)]
pub struct Ssh;

impl Ssh {
    fn ssh(&self, addr: &str, script: &str) -> Result<Output> {
        debug!(addr = %addr, script = %script, "ssh");
        ssh_command(addr, script)
            .output()
            .map_err(|e| remote_error(addr, format!("failed to run ssh: {}", e)))
    }
}

impl Transport for Ssh {
    fn push(&self, addr: &str, root: &Path, path: &Path, src: &Path) -> Result<()> {
        let dest = root.join(path);
        if let Some(dir) = dest.parent() {
            let output = self.ssh(addr, &format!("mkdir -p {}", quote(dir)))?;
            check(addr, &output)?;
        }

        debug!(src = %src.display(), addr = %addr, dest = %dest.display(), "scp");
        let output = scp_command(addr, src, &dest)
            .output()
            .map_err(|e| remote_error(addr, format!("failed to run scp: {}", e)))?;
        check(addr, &output)
    }

    fn exists(&self, addr: &str, root: &Path, path: &Path) -> Result<bool> {
        let output = self.ssh(addr, &format!("test -e {}", quote(&root.join(path))))?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(failure(addr, &output)),
        }
    }

    fn remove(&self, addr: &str, root: &Path, path: &Path) -> Result<()> {
        let output = self.ssh(addr, &remove_script(root, path))?;
        check(addr, &output)
    }
}

fn ssh_command(addr: &str, script: &str) -> Command {
    let mut command = Command::new("ssh");
    command.args(["-o", "BatchMode=yes", addr, script]);
    command
}

/// scp runs over SFTP on current OpenSSH, so the remote path reaches the
/// server verbatim and must not be shell-quoted.
fn scp_command(addr: &str, src: &Path, dest: &Path) -> Command {
    let mut target = OsString::from(format!("{}:", addr));
    target.push(dest.as_os_str());
    let mut command = Command::new("scp");
    command.args(["-B", "-q"]).arg(src).arg(target);
    command
}

/// `rm -f`, then `rmdir -p` on the relative directory from inside `root`;
/// it stops at the first directory that is not empty.
fn remove_script(root: &Path, path: &Path) -> String {
    let mut script = format!("rm -f {}", quote(&root.join(path)));
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        script.push_str(&format!(
            " && cd {} && {{ rmdir -p {} 2>/dev/null; true; }}",
            quote(root),
            quote(dir)
        ));
    }
    script
}

/// Single-quote `path` for a remote shell.
fn quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

fn check(addr: &str, output: &Output) -> Result<()> {
    if output.status.success() {
        Ok(())
    } else {
        Err(failure(addr, output))
    }
}

fn failure(addr: &str, output: &Output) -> StorageError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    remote_error(addr, format!("{} ({})", stderr.trim(), output.status))
}

fn remote_error(addr: &str, message: String) -> StorageError {
    StorageError::Remote {
        addr: addr.to_string(),
        message,
    }
}
