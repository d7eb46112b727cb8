//! OS-specific helpers, summarized by the contract in spec §6: binary
//! discovery, generated interface scripts, key generation, privilege drop
//! and platform post-configuration (TAP install on Windows, free `/dev/tapN`
//! selection on Darwin, no-op on Linux).

use crate::store::Network;
use meshd_common::model::ConfigFile;
use meshd_common::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

/// Locate the vpn engine binary (`tincd`) on `PATH`, falling back to the
/// common install locations.
pub fn discover_engine_binary() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("MESHD_ENGINE_BINARY") {
        return Ok(PathBuf::from(path));
    }
    let candidates = ["/usr/sbin/tincd", "/usr/bin/tincd", "/usr/local/sbin/tincd"];
    if let Ok(path_var) = std::env::var("PATH") {
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join("tincd");
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }
    for candidate in candidates {
        if Path::new(candidate).is_file() {
            return Ok(PathBuf::from(candidate));
        }
    }
    Err(Error::InvalidConfig(
        "could not locate the vpn engine binary (tincd) on PATH".to_string(),
    ))
}

#[cfg(unix)]
const UP_SCRIPT: &str = "tinc-up";
#[cfg(unix)]
const DOWN_SCRIPT: &str = "tinc-down";
#[cfg(unix)]
const SUBNET_UP_SCRIPT: &str = "subnet-up";
#[cfg(unix)]
const SUBNET_DOWN_SCRIPT: &str = "subnet-down";

#[cfg(windows)]
const UP_SCRIPT: &str = "tinc-up.bat";
#[cfg(windows)]
const DOWN_SCRIPT: &str = "tinc-down.bat";
#[cfg(windows)]
const SUBNET_UP_SCRIPT: &str = "subnet-up.bat";
#[cfg(windows)]
const SUBNET_DOWN_SCRIPT: &str = "subnet-down.bat";

/// Write the four generated interface scripts from platform templates.
pub async fn write_scripts(net: &Network) -> Result<()> {
    let config = net.read_config().await?;
    let (up, down, subnet_up, subnet_down) = render_scripts(&config);

    write_script(&net.dir().join(UP_SCRIPT), &up).await?;
    write_script(&net.dir().join(DOWN_SCRIPT), &down).await?;
    write_script(&net.dir().join(SUBNET_UP_SCRIPT), &subnet_up).await?;
    write_script(&net.dir().join(SUBNET_DOWN_SCRIPT), &subnet_down).await?;
    Ok(())
}

#[cfg(unix)]
fn render_scripts(config: &ConfigFile) -> (String, String, String, String) {
    let up = format!(
        "#!/bin/sh\nifconfig $INTERFACE {} netmask 255.255.255.0 up\n",
        config.ip
    );
    let down = "#!/bin/sh\nifconfig $INTERFACE down\n".to_string();
    // Switch-mode networks route via the interface directly; subnet-up/down
    // are no-ops for our one supported mode.
    (up, down, String::new(), String::new())
}

#[cfg(windows)]
fn render_scripts(config: &ConfigFile) -> (String, String, String, String) {
    let up = format!(
        "netsh interface ip set address name=\"%INTERFACE%\" static {} 255.255.255.0\r\n",
        config.ip
    );
    let down = "netsh interface set interface name=\"%INTERFACE%\" admin=disable\r\n".to_string();
    (up, down, String::new(), String::new())
}

async fn write_script(path: &Path, content: &str) -> Result<()> {
    tokio::fs::write(path, content).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = tokio::fs::metadata(path).await?.permissions();
        perms.set_mode(0o755);
        tokio::fs::set_permissions(path, perms).await?;
    }
    Ok(())
}

/// Generate an RSA key pair by invoking the vpn engine with `-K 4096 -c <dir>`.
pub async fn generate_keypair(engine_binary: &Path, dir: &Path) -> Result<()> {
    debug!(?dir, "generating RSA key pair");
    let status = Command::new(engine_binary)
        .arg("-K")
        .arg("4096")
        .arg("-c")
        .arg(dir)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::piped())
        .status()
        .await?;
    if !status.success() {
        return Err(Error::Transient(format!(
            "key generation exited with {status}"
        )));
    }
    Ok(())
}

/// Platform-specific post-configuration run after `ConnectTo` recomputation.
#[cfg(target_os = "windows")]
pub async fn post_configure(_net: &Network, config: &mut ConfigFile) -> Result<()> {
    // Install the TAP device and rename the newly created interface to match
    // `config.interface`. Delegated to the installer shipped alongside the
    // vpn engine; opaque beyond this contract per spec §6.
    debug!(interface = %config.interface, "would install TAP device and rename interface");
    Ok(())
}

#[cfg(target_os = "macos")]
pub async fn post_configure(_net: &Network, config: &mut ConfigFile) -> Result<()> {
    // Select a free /dev/tapN and point the config at it.
    for n in 0..16 {
        let candidate = format!("/dev/tap{n}");
        if Path::new(&candidate).exists() {
            config.device = candidate;
            return Ok(());
        }
    }
    warn!("no free /dev/tapN device found");
    Ok(())
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub async fn post_configure(_net: &Network, _config: &mut ConfigFile) -> Result<()> {
    Ok(())
}

/// Resolve the interface name the engine will actually create: on Darwin,
/// `post_configure` points `device` at a dynamically-chosen `/dev/tapN` and
/// the resulting interface is named after that basename (`tapN`), not
/// `config.interface`. Every other platform names the interface after
/// `Interface` directly — Linux's `/dev/net/tun` is a static multiplexer
/// shared by every interface, and Windows renames the newly-installed TAP
/// device to `config.interface` itself (see `post_configure`) — so deriving
/// from the device basename there would be wrong.
#[cfg(target_os = "macos")]
pub fn resolve_interface_name(config: &ConfigFile) -> String {
    if config.device.is_empty() || config.device_type != "tap" {
        return config.interface.clone();
    }
    Path::new(&config.device)
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| config.interface.clone())
}

#[cfg(not(target_os = "macos"))]
pub fn resolve_interface_name(config: &ConfigFile) -> String {
    config.interface.clone()
}

/// Change owner of `path` to the invoking unprivileged user, if the process
/// was started via `sudo` (`SUDO_UID`/`SUDO_GID` set).
#[cfg(unix)]
pub fn fix_owner(path: &Path) -> Result<()> {
    let (Ok(uid), Ok(gid)) = (std::env::var("SUDO_UID"), std::env::var("SUDO_GID")) else {
        return Ok(());
    };
    let uid: u32 = uid.parse().map_err(|_| Error::Internal("invalid SUDO_UID".to_string()))?;
    let gid: u32 = gid.parse().map_err(|_| Error::Internal("invalid SUDO_GID".to_string()))?;
    nix::unistd::chown(
        path,
        Some(nix::unistd::Uid::from_raw(uid)),
        Some(nix::unistd::Gid::from_raw(gid)),
    )
    .map_err(|e| Error::Internal(format!("chown {path:?} failed: {e}")))?;
    Ok(())
}

#[cfg(not(unix))]
pub fn fix_owner(_path: &Path) -> Result<()> {
    Ok(())
}

/// Whether the current process was invoked via privilege elevation and
/// therefore owes a privilege-drop fix-up to the daemon's log/pid files.
#[cfg(unix)]
pub fn was_elevated() -> bool {
    std::env::var("SUDO_USER").is_ok()
}

#[cfg(not(unix))]
pub fn was_elevated() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_os = "macos")]
    #[test]
    fn resolve_interface_name_uses_device_basename_for_tap_on_darwin() {
        let config = ConfigFile {
            name: "n".to_string(),
            port: 655,
            interface: "tinc0".to_string(),
            mode: "switch".to_string(),
            auto_start: false,
            device_type: "tap".to_string(),
            device: "/dev/tap3".to_string(),
            ip: "10.0.0.1".to_string(),
            mask: 16,
            broadcast: "direct".to_string(),
            connect_to: vec![],
        };
        assert_eq!(resolve_interface_name(&config), "tap3");
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn resolve_interface_name_uses_interface_field_for_tap() {
        let config = ConfigFile {
            name: "n".to_string(),
            port: 655,
            interface: "tinc0".to_string(),
            mode: "switch".to_string(),
            auto_start: false,
            device_type: "tap".to_string(),
            device: "/dev/net/tun".to_string(),
            ip: "10.0.0.1".to_string(),
            mask: 16,
            broadcast: "direct".to_string(),
            connect_to: vec![],
        };
        assert_eq!(resolve_interface_name(&config), "tinc0");
    }

    #[test]
    fn resolve_interface_name_falls_back_for_non_tap() {
        let mut config = ConfigFile {
            name: "n".to_string(),
            port: 655,
            interface: "tinc0".to_string(),
            mode: "switch".to_string(),
            auto_start: false,
            device_type: "tun".to_string(),
            device: "/dev/net/tun".to_string(),
            ip: "10.0.0.1".to_string(),
            mask: 16,
            broadcast: "direct".to_string(),
            connect_to: vec![],
        };
        assert_eq!(resolve_interface_name(&config), "tinc0");
        config.device = String::new();
        assert_eq!(resolve_interface_name(&config), "tinc0");
    }
}
