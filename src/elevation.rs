//! Privileged command construction
//!
//! tpgate programs kernel state through three external binaries, each of
//! which needs CAP_NET_ADMIN (or root):
//!
//! - **nft**: loading and deleting the interception table
//! - **ip**: policy-routing rules and the loopback route table
//! - **sysctl**: forwarding/rp_filter knobs in gateway mode
//!
//! When the manager itself runs as root (the common deployment), commands
//! run directly. Otherwise:
//!
//! - **Preferred (all modes)**: `run0` when available (systemd v256+, no SUID)
//! - **CLI fallback**: `sudo` for terminal environments
//! - **GUI fallback**: `pkexec` for graphical authentication
//!
//! # Environment Variables
//!
//! - `TPGATE_ELEVATION_METHOD`: Force a specific elevation method (`sudo`,
//!   `run0`, or `pkexec`). Useful for scripts with sudoers NOPASSWD rules.
//! - `TPGATE_TEST_NO_ELEVATION`: Bypass elevation entirely (testing only).
//! - `TPGATE_NFT_COMMAND`: Alternate nft binary (mock scripts in tests).
//!
//! # Security
//!
//! Only the three binaries above can be elevated, and arguments are passed
//! directly without shell interpretation.

use std::io;
use tokio::process::Command;

/// Error type for privilege elevation operations
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    /// pkexec binary not found in PATH
    #[error("pkexec not found - please install PolicyKit")]
    PkexecNotFound,

    /// Requested elevation method is not available (binary not found)
    #[error("Elevation method '{0}' is not available (binary not found)")]
    MethodNotAvailable(String),

    /// Invalid value for `TPGATE_ELEVATION_METHOD`
    #[error("Invalid TPGATE_ELEVATION_METHOD '{0}'. Valid options: sudo, run0, pkexec")]
    InvalidMethod(String),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Checks if a binary exists in PATH
fn binary_exists(name: &str) -> bool {
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths).find_map(|dir| {
                let full_path = dir.join(name);
                if full_path.is_file() {
                    Some(full_path)
                } else {
                    None
                }
            })
        })
        .is_some()
}

/// Internal helper to build an elevated command for a specific program.
///
/// Not exposed publicly - callers must use the specific functions
/// (`create_elevated_nft_command`, `create_elevated_ip_command`,
/// `create_elevated_sysctl_command`) so only approved binaries can be
/// elevated.
fn build_elevated_command(program: &str, args: &[&str]) -> Result<Command, ElevationError> {
    use std::os::fd::AsFd;

    // 1. Strict Test Mode Override (Highest Priority)
    if std::env::var("TPGATE_TEST_NO_ELEVATION").is_ok() {
        let mut cmd = Command::new(program);
        cmd.args(args);
        return Ok(cmd);
    }

    // 2. Direct Root Execution (No prompt needed)
    if nix::unistd::getuid().is_root() {
        let mut cmd = Command::new(program);
        cmd.args(args);
        return Ok(cmd);
    }

    // 3. Explicit elevation method override (for scripts with sudoers NOPASSWD, etc.)
    if let Ok(method) = std::env::var("TPGATE_ELEVATION_METHOD") {
        let method = method.to_lowercase();
        if !method.is_empty() {
            return match method.as_str() {
                "sudo" | "run0" | "pkexec" => {
                    if !binary_exists(&method) {
                        return Err(ElevationError::MethodNotAvailable(method));
                    }
                    let mut cmd = Command::new(&method);
                    cmd.arg(program).args(args);
                    Ok(cmd)
                }
                _ => Err(ElevationError::InvalidMethod(method)),
            };
        }
    }

    // 4. Automatic detection - prefer run0 (modern, no SUID), fallback to sudo/pkexec

    if binary_exists("run0") {
        let mut cmd = Command::new("run0");
        cmd.arg(program).args(args);
        return Ok(cmd);
    }

    let is_atty = nix::unistd::isatty(std::io::stdin().as_fd()).unwrap_or(false);

    if is_atty {
        // CLI: Standard sudo elevation
        let mut cmd = Command::new("sudo");
        cmd.arg(program).args(args);
        Ok(cmd)
    } else {
        // GUI/service context: pkexec elevation
        if !binary_exists("pkexec") {
            return Err(ElevationError::PkexecNotFound);
        }

        let mut cmd = Command::new("pkexec");
        cmd.arg(program).args(args);
        Ok(cmd)
    }
}

/// Creates an elevated `nft` command with the specified arguments.
///
/// Honors `TPGATE_NFT_COMMAND` so tests can point all firewall operations
/// at a mock script instead of real nftables.
///
/// # Errors
///
/// Returns `Err` if the requested elevation method is unavailable.
pub fn create_elevated_nft_command(args: &[&str]) -> Result<Command, ElevationError> {
    let program =
        std::env::var("TPGATE_NFT_COMMAND").unwrap_or_else(|_| "nft".to_string());
    build_elevated_command(&program, args)
}

/// Creates an elevated `ip` command for policy-routing changes.
///
/// # Errors
///
/// Returns `Err` if the requested elevation method is unavailable.
pub fn create_elevated_ip_command(args: &[&str]) -> Result<Command, ElevationError> {
    build_elevated_command("ip", args)
}

/// Creates an elevated `sysctl` command for forwarding knobs.
///
/// # Errors
///
/// Returns `Err` if the requested elevation method is unavailable.
pub fn create_elevated_sysctl_command(args: &[&str]) -> Result<Command, ElevationError> {
    build_elevated_command("sysctl", args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that mutate process-global environment variables.
    static ENV_VAR_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_binary_exists() {
        // sh should exist on all Unix systems
        assert!(binary_exists("sh"));
        // This should not exist
        assert!(!binary_exists("tpgate_nonexistent_binary_xyz"));
    }

    #[tokio::test]
    async fn test_create_nft_command_test_mode() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();

        unsafe {
            std::env::set_var("TPGATE_TEST_NO_ELEVATION", "1");
        }

        assert!(create_elevated_nft_command(&["list", "ruleset"]).is_ok());
        assert!(create_elevated_ip_command(&["rule", "show"]).is_ok());

        unsafe {
            std::env::remove_var("TPGATE_TEST_NO_ELEVATION");
        }
    }

    #[test]
    fn test_invalid_elevation_method() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();

        unsafe {
            std::env::remove_var("TPGATE_TEST_NO_ELEVATION");
            std::env::set_var("TPGATE_ELEVATION_METHOD", "invalid_method");
        }

        let result = create_elevated_nft_command(&["list", "ruleset"]);

        unsafe {
            std::env::remove_var("TPGATE_ELEVATION_METHOD");
        }

        // Root runs commands directly and never consults the method override
        if nix::unistd::getuid().is_root() {
            assert!(result.is_ok());
        } else {
            assert!(matches!(result, Err(ElevationError::InvalidMethod(_))));
        }
    }

    #[test]
    fn test_elevation_method_case_insensitive() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();

        unsafe {
            std::env::remove_var("TPGATE_TEST_NO_ELEVATION");
            std::env::set_var("TPGATE_ELEVATION_METHOD", "SUDO");
        }

        let result = create_elevated_sysctl_command(&["-w", "net.ipv4.ip_forward=1"]);

        unsafe {
            std::env::remove_var("TPGATE_ELEVATION_METHOD");
        }

        // Should succeed (sudo exists) or fail with MethodNotAvailable,
        // but never InvalidMethod
        assert!(!matches!(result, Err(ElevationError::InvalidMethod(_))));
    }
}
