//! `run`: launch the `meshd` daemon as a child process in the foreground.
//!
//! Convenience wrapper so a single `meshctl` invocation can stand up both
//! halves of the system; meshctl itself never supervises a network.

use anyhow::{bail, Result};
use std::path::PathBuf;
use tokio::process::Command;

pub async fn run(config: Option<PathBuf>, debug: bool) -> Result<()> {
    let binary = which_meshd()?;
    let mut cmd = Command::new(binary);
    cmd.arg("--foreground");
    if let Some(config) = config {
        cmd.arg("--config").arg(config);
    }
    if debug {
        cmd.arg("--debug");
    }
    let status = cmd.status().await?;
    if !status.success() {
        bail!("meshd exited with {status}");
    }
    Ok(())
}

fn which_meshd() -> Result<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join("meshd");
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }
    Ok(PathBuf::from("meshd"))
}
