//! OS-level mount plumbing: invoking the platform mount/umount
//! commands, spawning the detached server process, and pid-file
//! handling for `umount`.

use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{Error, Result};

pub const PID_FILE_PATH: &str = ".cz/server.pid";

fn exec_mount_command(name: &str, args: &[String]) -> Result<()> {
    let output = Command::new(name)
        .args(args)
        .output()
        .map_err(|err| Error::Command(format!("{name}: {err}")))?;
    if !output.status.success() {
        let command_text = format!("{name} {}", args.join(" "));
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Command(format!("\"{command_text}\":\n{stdout}{stderr}")));
    }
    Ok(())
}

/// Run unprivileged first; on failure retry under sudo and, if that
/// fails too, surface the original error.
fn try_then_sudo(name: &str, args: &[String]) -> Result<()> {
    let original = match exec_mount_command(name, args) {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };
    let mut sudo_args = vec![name.to_string()];
    sudo_args.extend_from_slice(args);
    match exec_mount_command("sudo", &sudo_args) {
        Ok(()) => Ok(()),
        Err(_) => Err(original),
    }
}

fn split_addr(addr: &str) -> Result<(&str, &str)> {
    addr.rsplit_once(':')
        .ok_or_else(|| Error::Command(format!("could not parse address: {addr}")))
}

/// Invoke the platform NFS mount command against the server address.
pub fn nfs_mount(addr: &str, location: &Path) -> Result<()> {
    let (host, port) = split_addr(addr)?;
    let target = location.display().to_string();
    if cfg!(target_os = "macos") {
        let opts = format!(
            "nolocks,vers=3,tcp,rsize=1048576,actimeo=120,port={port},mountport={port}"
        );
        try_then_sudo(
            "mount_nfs",
            &["-o".to_string(), opts, format!("{host}:/"), target],
        )
    } else if cfg!(target_os = "linux") {
        let opts = format!(
            "user,noacl,nolock,tcp,vers=3,nconnect=8,rsize=1048576,port={port},mountport={port}"
        );
        try_then_sudo(
            "mount",
            &["-t".to_string(), "nfs".to_string(), "-o".to_string(), opts, format!("{host}:/"), target],
        )
    } else {
        Err(Error::Command(format!(
            "don't know how to mount NFS on OS: {}",
            std::env::consts::OS
        )))
    }
}

/// Invoke the platform WebDAV mount command against the server address.
pub fn webdav_mount(addr: &str, location: &Path) -> Result<()> {
    let (host, port) = split_addr(addr)?;
    let mount_url = format!("http://{host}:{port}/mount/");
    let target = location.display().to_string();
    if cfg!(target_os = "macos") {
        try_then_sudo("mount_webdav", &["-S".to_string(), mount_url, target])
    } else if cfg!(target_os = "linux") {
        try_then_sudo("mount", &["-t".to_string(), "davfs".to_string(), mount_url, target])
    } else if cfg!(windows) {
        try_then_sudo(
            "cmd",
            &[
                "/c".to_string(),
                "mklink".to_string(),
                "/d".to_string(),
                target,
                format!("\\\\{host}@{port}\\mount"),
            ],
        )
    } else {
        Err(Error::Command(format!(
            "don't know how to mount WebDAV on OS: {}",
            std::env::consts::OS
        )))
    }
}

fn os_umount(location: &Path) -> Result<()> {
    let target = location.display().to_string();
    if cfg!(unix) {
        try_then_sudo("umount", &[target])
    } else if cfg!(windows) {
        try_then_sudo("cmd", &["/c".to_string(), "rd".to_string(), target])
    } else {
        Err(Error::Command(format!(
            "don't know how to unmount on OS: {}",
            std::env::consts::OS
        )))
    }
}

/// Read the server pid recorded under the mount point.
///
/// A missing pid file means the directory is not one of our mounts; a
/// malformed one is a command error.
pub fn read_pid_file(location: &Path) -> Result<u32> {
    let pid_path = location.join(PID_FILE_PATH);
    let data = match std::fs::read_to_string(&pid_path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotOurMount(location.display().to_string()))
        }
        Err(err) => return Err(err.into()),
    };
    data.trim()
        .parse()
        .map_err(|_| Error::Command("could not read mount server pid file".to_string()))
}

/// Politely stop the mount server: SIGINT on Unix so it can drain and
/// clean its cache dir; a hard kill elsewhere.
pub fn interrupt_server(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
        if rc != 0 {
            return Err(Error::Command(format!("could not signal pid {pid}")));
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        kill_process(pid)
    }
}

/// Hard-kill a process; used when the server never became ready.
pub fn kill_process(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) };
        if rc != 0 {
            return Err(Error::Command(format!("could not kill pid {pid}")));
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        exec_mount_command(
            "taskkill",
            &["/F".to_string(), "/PID".to_string(), pid.to_string()],
        )
    }
}

/// Unmount `location` and interrupt the server recorded in its pid file.
pub fn umount(location: &Path) -> Result<()> {
    let pid = read_pid_file(location)?;
    os_umount(location)?;
    interrupt_server(pid)
}

/// Re-spawn this executable detached, with stdio disconnected, and
/// return the child pid. The child inherits the environment.
pub fn daemonize(args: &[String]) -> Result<u32> {
    let exe = std::env::current_exe()?;
    let child = Command::new(exe)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(child.id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_pid_file_is_not_our_mount() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_pid_file(dir.path()).unwrap_err();
        assert!(matches!(err, Error::NotOurMount(_)));
    }

    #[test]
    fn malformed_pid_file_is_command_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".cz")).unwrap();
        std::fs::write(dir.path().join(PID_FILE_PATH), "not-a-pid").unwrap();
        let err = read_pid_file(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Command(_)));
    }

    #[test]
    fn pid_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".cz")).unwrap();
        std::fs::write(dir.path().join(PID_FILE_PATH), "4242\n").unwrap();
        assert_eq!(read_pid_file(dir.path()).unwrap(), 4242);
    }

    #[test]
    fn addr_split() {
        assert_eq!(split_addr("127.0.0.1:2049").unwrap(), ("127.0.0.1", "2049"));
        assert!(split_addr("nonsense").is_err());
    }
}
