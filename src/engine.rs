//! Engine seams between the rule applier and the host
//!
//! The applier never speaks nft or iproute2 syntax itself. It depends on
//! two narrow collaborator traits, [`FirewallEngine`] and
//! [`RoutePolicyEngine`], implemented here as thin process-invocation
//! adapters ([`NftCli`], [`IpRouteCli`]) and implemented in tests as
//! recording fakes. Keeping the seams this small is what makes the whole
//! apply/teardown lifecycle unit-testable without touching a real host.

#![allow(async_fn_in_trait)]

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::core::error::{Error, Result};
use crate::elevation;

/// Address family selector for policy-routing commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    /// Both families, in the fixed order commands are issued.
    pub const ALL: [IpFamily; 2] = [IpFamily::V4, IpFamily::V6];
}

/// Declarative firewall engine: load a table description atomically, delete
/// a table by name, query table existence.
pub trait FirewallEngine {
    /// Loads a libnftables JSON batch in a single transaction.
    async fn load(&self, batch: &Value) -> Result<()>;

    /// Deletes a table by name. Deleting an absent table is an error at this
    /// level; callers that want idempotence check `table_exists` first or
    /// swallow the result.
    async fn delete_table(&self, name: &str) -> Result<()>;

    /// Whether a table with this name currently exists.
    async fn table_exists(&self, name: &str) -> Result<bool>;
}

/// Policy-routing engine: mark-selector rules and the local loopback route
/// inside a dedicated table.
pub trait RoutePolicyEngine {
    async fn add_mark_rule(&self, family: IpFamily, mark: u32, table: u32) -> Result<()>;
    async fn delete_mark_rule(&self, family: IpFamily, mark: u32, table: u32) -> Result<()>;
    async fn add_local_route(&self, family: IpFamily, table: u32) -> Result<()>;
    async fn delete_local_route(&self, family: IpFamily, table: u32) -> Result<()>;
}

/// Production firewall engine driving the `nft` binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct NftCli;

impl NftCli {
    pub fn new() -> Self {
        Self
    }

    async fn run(args: &[&str], stdin_payload: Option<&[u8]>) -> Result<std::process::Output> {
        let mut command = elevation::create_elevated_nft_command(args)
            .map_err(|e| Error::Elevation(e.to_string()))?;
        command
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = command.spawn().map_err(|e| Error::Nftables {
            message: format!("failed to spawn nft: {e}"),
            stderr: None,
            exit_code: None,
        })?;

        if let Some(payload) = stdin_payload
            && let Some(mut stdin) = child.stdin.take()
        {
            stdin.write_all(payload).await?;
        } else {
            drop(child.stdin.take());
        }

        Ok(child.wait_with_output().await?)
    }
}

impl FirewallEngine for NftCli {
    async fn load(&self, batch: &Value) -> Result<()> {
        let payload = serde_json::to_string(batch)?;
        let output = Self::run(&["--json", "-f", "-"], Some(payload.as_bytes())).await?;

        if output.status.success() {
            debug!("nft batch loaded");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            Err(Error::Nftables {
                message: "ruleset load failed".to_string(),
                stderr: Some(stderr),
                exit_code: output.status.code(),
            })
        }
    }

    async fn delete_table(&self, name: &str) -> Result<()> {
        let output = Self::run(&["delete", "table", "inet", name], None).await?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            Err(Error::Nftables {
                message: format!("delete table inet {name} failed"),
                stderr: Some(stderr),
                exit_code: output.status.code(),
            })
        }
    }

    async fn table_exists(&self, name: &str) -> Result<bool> {
        let output = Self::run(&["list", "table", "inet", name], None).await?;
        if output.status.success() {
            return Ok(true);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        // nft reports an absent table as a lookup failure on the name
        if stderr.contains("No such file or directory") || stderr.contains("does not exist") {
            Ok(false)
        } else {
            Err(Error::Nftables {
                message: format!("list table inet {name} failed"),
                stderr: Some(stderr.to_string()),
                exit_code: output.status.code(),
            })
        }
    }
}

/// Production policy-routing engine driving the `ip` binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpRouteCli;

impl IpRouteCli {
    pub fn new() -> Self {
        Self
    }

    async fn run(family: IpFamily, args: &[&str]) -> Result<()> {
        let mut full_args: Vec<&str> = Vec::with_capacity(args.len() + 1);
        if family == IpFamily::V6 {
            full_args.push("-6");
        }
        full_args.extend_from_slice(args);

        let command_line = format!("ip {}", full_args.join(" "));
        let output = elevation::create_elevated_ip_command(&full_args)
            .map_err(|e| Error::Elevation(e.to_string()))?
            .output()
            .await
            .map_err(|e| Error::Route {
                command: command_line.clone(),
                message: format!("failed to spawn: {e}"),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(Error::Route {
                command: command_line,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl RoutePolicyEngine for IpRouteCli {
    async fn add_mark_rule(&self, family: IpFamily, mark: u32, table: u32) -> Result<()> {
        let mark = mark.to_string();
        let table = table.to_string();
        Self::run(family, &["rule", "add", "fwmark", &mark, "table", &table]).await
    }

    async fn delete_mark_rule(&self, family: IpFamily, mark: u32, table: u32) -> Result<()> {
        let mark = mark.to_string();
        let table = table.to_string();
        Self::run(family, &["rule", "del", "fwmark", &mark, "table", &table]).await
    }

    async fn add_local_route(&self, family: IpFamily, table: u32) -> Result<()> {
        let table = table.to_string();
        Self::run(
            family,
            &["route", "add", "local", "default", "dev", "lo", "table", &table],
        )
        .await
    }

    async fn delete_local_route(&self, family: IpFamily, table: u32) -> Result<()> {
        let table = table.to_string();
        Self::run(
            family,
            &["route", "del", "local", "default", "dev", "lo", "table", &table],
        )
        .await
    }
}

/// Sysctl knobs a gateway needs: forwarding on, strict reverse-path
/// filtering off (TPROXY delivers packets whose return path is the proxy,
/// which strict rp_filter drops), and ICMP redirects off so LAN clients
/// keep sending through this host.
const FORWARDING_SYSCTLS: &[(&str, &str)] = &[
    ("net.ipv4.ip_forward", "1"),
    ("net.ipv4.conf.all.rp_filter", "0"),
    ("net.ipv4.conf.default.rp_filter", "0"),
    ("net.ipv4.conf.all.send_redirects", "0"),
];

const FORWARDING_SYSCTLS_V6: &[(&str, &str)] = &[("net.ipv6.conf.all.forwarding", "1")];

/// Applies the gateway sysctl knobs, best-effort.
///
/// Failures are logged and never abort the run: the interception rules are
/// still correct for host-local traffic even when forwarding cannot be
/// enabled.
pub async fn apply_forwarding_sysctls(ipv6: bool) {
    let mut knobs: Vec<(&str, &str)> = FORWARDING_SYSCTLS.to_vec();
    if ipv6 {
        knobs.extend_from_slice(FORWARDING_SYSCTLS_V6);
    }

    for (key, value) in knobs {
        let assignment = format!("{key}={value}");
        let result = match elevation::create_elevated_sysctl_command(&["-w", &assignment]) {
            Ok(mut command) => command.output().await.map_err(Error::Io),
            Err(e) => Err(Error::Elevation(e.to_string())),
        };

        match result {
            Ok(output) if output.status.success() => debug!(%assignment, "sysctl applied"),
            Ok(output) => warn!(
                %assignment,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "sysctl failed; continuing"
            ),
            Err(e) => warn!(%assignment, error = %e, "sysctl unavailable; continuing"),
        }
    }
}
