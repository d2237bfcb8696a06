//! Interception parameter resolution
//!
//! This module turns CLI input plus the proxy's own configuration document
//! into the one immutable [`InterceptParams`] value a run operates on.
//! Resolution happens before any firewall or routing state is touched, so
//! every failure here is guaranteed to leave the host unchanged.
//!
//! # Rules
//!
//! - The LAN CIDR is mandatory. Without it the interception scope would be
//!   implicit, and an implicit scope on a gateway is how operators lock
//!   themselves out of their own management session.
//! - The proxy config must contain a `tproxy` inbound; its listen port is
//!   the redirect target. Programming a redirect without a listener would
//!   black-hole all matched traffic, so absence is a hard refusal.
//! - The DNS inbound (`dns-in` tag) is optional and falls back to port 53.
//! - IPv6 handling is an explicit tri-state flag, never sniffed from the
//!   host, so compilation stays deterministic.

use ipnetwork::IpNetwork;

use crate::config::ProxyConfig;
use crate::core::error::{Error, Result};
use crate::validators;

/// Fallback DNS redirect port when the config carries no `dns-in` inbound.
pub const DEFAULT_DNS_PORT: u16 = 53;

/// IPv6 interception mode, an explicit tri-state CLI input
/// (enable / disable / unspecified, which defaults to disable).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum Ipv6Mode {
    /// Mirror the ruleset and policy routing for IPv6
    Enable,
    /// IPv4 interception only
    #[default]
    Disable,
}

impl Ipv6Mode {
    pub const fn is_enabled(self) -> bool {
        matches!(self, Ipv6Mode::Enable)
    }
}

/// Naming constants a ruleset is compiled against.
///
/// Injected into the compiler instead of living as process-wide globals,
/// so tests can run with isolated names that never collide with a real
/// host's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleNaming {
    /// nftables table owning all generated chains and sets
    pub table: String,
    /// Mark set on intercepted packets and matched by the policy-routing rule
    pub fw_mark: u32,
    /// Mark the proxy applies to its own egress; must stay distinct from
    /// `fw_mark` or the proxy's outbound connections get re-intercepted
    pub self_mark: u32,
    /// Policy-routing table holding the local loopback route
    pub route_table: u32,
}

impl Default for RuleNaming {
    fn default() -> Self {
        Self {
            table: "tpgate".to_string(),
            fw_mark: 1,
            self_mark: 0xff,
            route_table: 100,
        }
    }
}

/// Table names earlier releases installed. Teardown sweeps these too, so a
/// new version cleans up state a differently-named predecessor left behind.
pub const LEGACY_TABLE_NAMES: &[&str] = &["singbox_tproxy", "singbox_auto", "sb_auto"];

/// Resolved interception parameters. Immutable, constructed once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptParams {
    /// TPROXY listen port of the proxy (from the `tproxy` inbound)
    pub tproxy_port: u16,
    /// DNS hijack target port (from the `dns-in` inbound, default 53)
    pub dns_port: u16,
    /// LAN network whose clients are routed through the proxy
    pub lan: IpNetwork,
    /// IPv6 interception mode
    pub ipv6: Ipv6Mode,
    /// Whether to source-NAT forwarded LAN traffic to the host's address
    pub masquerade: bool,
}

/// Resolves [`InterceptParams`] from CLI input and the raw proxy
/// configuration document.
///
/// # Errors
///
/// - [`Error::MissingParameter`] when no LAN CIDR was given
/// - [`Error::InvalidParameter`] when the LAN CIDR is malformed or unbounded,
///   or the tproxy inbound carries an unusable port
/// - [`Error::NoInterceptInbound`] when the config has no `tproxy` inbound
/// - [`Error::Serialization`] when the config document is not valid JSON
pub fn resolve(
    lan: Option<&str>,
    ipv6: Ipv6Mode,
    masquerade: bool,
    config_bytes: &[u8],
) -> Result<InterceptParams> {
    let lan = lan
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(Error::MissingParameter("lan"))?;

    let lan = validators::validate_lan(lan).map_err(|message| Error::InvalidParameter {
        field: "lan",
        message,
    })?;

    let config = ProxyConfig::from_slice(config_bytes)?;

    let tproxy_port = config
        .tproxy_inbound()
        .ok_or(Error::NoInterceptInbound)
        .map(|inbound| inbound.listen_port)?;
    let tproxy_port =
        validators::validate_port(tproxy_port).map_err(|message| Error::InvalidParameter {
            field: "tproxy listen_port",
            message,
        })?;

    let dns_port = match config.dns_inbound() {
        Some(inbound) => {
            validators::validate_port(inbound.listen_port).map_err(|message| {
                Error::InvalidParameter {
                    field: "dns-in listen_port",
                    message,
                }
            })?
        }
        None => DEFAULT_DNS_PORT,
    };

    Ok(InterceptParams {
        tproxy_port,
        dns_port,
        lan,
        ipv6,
        masquerade,
    })
}
