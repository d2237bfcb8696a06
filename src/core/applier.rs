//! Rule application and teardown
//!
//! The applier owns the two-phase contract around kernel state:
//!
//! - [`RuleApplier::teardown`] never fails observably. Every deletion is
//!   best-effort, because "resource already absent" is the expected common
//!   case - a clean host, a crashed previous run, or a second invocation.
//!   It also sweeps the table names earlier releases used, so upgrades
//!   clean up after their predecessors.
//! - [`RuleApplier::apply`] always tears down first (reapplication with
//!   changed ports, LAN or IPv6 mode must never stack on stale state),
//!   loads the compiled batch as one transaction, then installs the
//!   policy-routing entries in fixed order. Any failure after the load
//!   starts triggers one rollback teardown before the error surfaces, so a
//!   half-applied ruleset never outlives a failed startup.

use tracing::{debug, info, warn};

use crate::core::error::Result;
use crate::core::params::{LEGACY_TABLE_NAMES, RuleNaming};
use crate::core::ruleset::RuleSet;
use crate::engine::{FirewallEngine, IpFamily, RoutePolicyEngine};

pub struct RuleApplier<F: FirewallEngine, R: RoutePolicyEngine> {
    firewall: F,
    routes: R,
}

impl<F: FirewallEngine, R: RoutePolicyEngine> RuleApplier<F, R> {
    pub fn new(firewall: F, routes: R) -> Self {
        Self { firewall, routes }
    }

    /// Removes all interception state this tool (or any earlier release of
    /// it) may have installed. Safe to call any number of times, including
    /// on a clean system.
    pub async fn teardown(&self, naming: &RuleNaming) {
        debug!(table = %naming.table, "tearing down interception state");

        let mut tables: Vec<&str> = Vec::with_capacity(1 + LEGACY_TABLE_NAMES.len());
        tables.push(naming.table.as_str());
        tables.extend_from_slice(LEGACY_TABLE_NAMES);

        for table in tables {
            match self.firewall.table_exists(table).await {
                Ok(false) => {}
                Ok(true) => {
                    if let Err(e) = self.firewall.delete_table(table).await {
                        warn!(table, error = %e, "failed to delete firewall table");
                    } else {
                        info!(table, "firewall table removed");
                    }
                }
                // Existence query unsupported or failed: fall back to
                // delete-and-ignore
                Err(query_err) => {
                    debug!(table, error = %query_err, "existence query failed; deleting blind");
                    if let Err(e) = self.firewall.delete_table(table).await {
                        debug!(table, error = %e, "blind table delete failed (likely absent)");
                    }
                }
            }
        }

        // Route entries are removed for both families regardless of the
        // current IPv6 mode; a previous run may have mirrored them
        for family in IpFamily::ALL {
            if let Err(e) = self
                .routes
                .delete_mark_rule(family, naming.fw_mark, naming.route_table)
                .await
            {
                debug!(?family, error = %e, "mark rule delete failed (likely absent)");
            }
            if let Err(e) = self
                .routes
                .delete_local_route(family, naming.route_table)
                .await
            {
                debug!(?family, error = %e, "local route delete failed (likely absent)");
            }
        }
    }

    /// Installs the compiled ruleset and its policy-routing entries as one
    /// logical unit.
    ///
    /// # Errors
    ///
    /// Returns `Err` when the firewall load or a routing command fails; in
    /// both cases everything partially applied has already been rolled back.
    pub async fn apply(&self, ruleset: &RuleSet) -> Result<()> {
        // Never layer a new ruleset on top of a potentially stale one
        self.teardown(&ruleset.naming).await;

        info!(
            table = %ruleset.naming.table,
            tproxy_port = ruleset.tproxy_port,
            dns_port = ruleset.dns_port,
            lan = %ruleset.lan,
            ipv6 = ruleset.ipv6_enabled(),
            "applying interception ruleset"
        );

        if let Err(e) = self.firewall.load(&ruleset.to_nftables_json()).await {
            warn!(error = %e, "firewall load failed; rolling back");
            self.teardown(&ruleset.naming).await;
            return Err(e);
        }

        // Policy routing references the mark the loaded rules set, so it is
        // installed strictly after the firewall table
        let families: &[IpFamily] = if ruleset.ipv6_enabled() {
            &IpFamily::ALL
        } else {
            &[IpFamily::V4]
        };

        for &family in families {
            let installed = async {
                self.routes
                    .add_mark_rule(family, ruleset.naming.fw_mark, ruleset.naming.route_table)
                    .await?;
                self.routes
                    .add_local_route(family, ruleset.naming.route_table)
                    .await
            }
            .await;

            if let Err(e) = installed {
                warn!(?family, error = %e, "policy routing install failed; rolling back");
                self.teardown(&ruleset.naming).await;
                return Err(e);
            }
        }

        info!(table = %ruleset.naming.table, "interception ruleset active");
        Ok(())
    }
}
