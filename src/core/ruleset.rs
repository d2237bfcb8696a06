//! Ruleset compilation
//!
//! This module turns resolved [`InterceptParams`] into the declarative
//! firewall description that gets loaded into the kernel: one inet table
//! with an ingress classification chain (prerouting, mangle priority), a
//! local-egress classification chain (output, route type) and, when
//! masquerade is on, a source-NAT chain (postrouting).
//!
//! Compilation is a total, pure function. All validation happens during
//! parameter resolution, and equal inputs always produce byte-identical
//! output in both the JSON and text renderings.
//!
//! # Clause ordering
//!
//! The order of clauses inside each chain is a correctness contract, not a
//! style choice:
//!
//! 1. DNS hijack precedes every bypass, so even destinations exempted below
//!    still resolve through the proxy's resolver.
//! 2. Reserved/special-purpose ranges return before anything is marked.
//! 3. The configured LAN returns next (authoritative even when the LAN is
//!    carved out of public space).
//! 4. Packets carrying the proxy's own egress mark return before any clause
//!    that sets a mark. In the output chain this exclusion must come first
//!    of all, because the DNS hijack there is itself a mark-setting clause.
//! 5. Only then is the remaining TCP/UDP traffic marked (and, on ingress,
//!    handed to the TPROXY listener).
//!
//! Reordering 2/3 after 5 leaks LAN and management traffic into the proxy;
//! dropping 4 creates an interception loop on the proxy's own connections.

use std::fmt::Write;

use ipnetwork::IpNetwork;
use serde_json::{Value, json};

use crate::core::params::{InterceptParams, RuleNaming};
use crate::validators;

/// IPv4 ranges that must never be routed through the proxy: loopback,
/// link-local, RFC1918, RFC6598 shared space, benchmarking and
/// documentation blocks, multicast and reserved space.
pub const RESERVED_V4: &[(&str, u8)] = &[
    ("0.0.0.0", 8),
    ("10.0.0.0", 8),
    ("100.64.0.0", 10),
    ("127.0.0.0", 8),
    ("169.254.0.0", 16),
    ("172.16.0.0", 12),
    ("192.0.0.0", 24),
    ("192.0.2.0", 24),
    ("192.168.0.0", 16),
    ("198.18.0.0", 15),
    ("198.51.100.0", 24),
    ("203.0.113.0", 24),
    ("224.0.0.0", 4),
    ("240.0.0.0", 4),
    ("255.255.255.255", 32),
];

/// IPv6 analogues: unspecified, loopback, IPv4-mapped, NAT64 well-known
/// prefix, discard-only, TEREDO/ORCHID/documentation, 6to4, unique-local,
/// link-local and multicast.
pub const RESERVED_V6: &[(&str, u8)] = &[
    ("::", 128),
    ("::1", 128),
    ("::ffff:0:0", 96),
    ("64:ff9b::", 96),
    ("100::", 64),
    ("2001::", 32),
    ("2001:20::", 28),
    ("2001:db8::", 32),
    ("2002::", 16),
    ("fc00::", 7),
    ("fe80::", 10),
    ("ff00::", 8),
];

/// Names of the generated nftables objects inside the table.
pub const PREROUTING_CHAIN: &str = "prerouting";
pub const OUTPUT_CHAIN: &str = "output";
pub const POSTROUTING_CHAIN: &str = "postrouting";
pub const RESERVED_V4_SET: &str = "reserved4";
pub const RESERVED_V6_SET: &str = "reserved6";

/// A compiled ruleset. Derived deterministically from its inputs; two
/// compilations from equal inputs are byte-identical in both renderings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    pub naming: RuleNaming,
    pub tproxy_port: u16,
    pub dns_port: u16,
    pub lan: IpNetwork,
    pub masquerade: bool,
    pub reserved_v4: &'static [(&'static str, u8)],
    /// Present only when IPv6 interception is enabled
    pub reserved_v6: Option<&'static [(&'static str, u8)]>,
}

/// Compiles the declarative ruleset for the given parameters and naming
/// constants. Total function: no I/O, no failure path.
pub fn compile(params: &InterceptParams, naming: &RuleNaming) -> RuleSet {
    debug_assert!(validators::validate_marks(naming.fw_mark, naming.self_mark).is_ok());

    RuleSet {
        naming: naming.clone(),
        tproxy_port: params.tproxy_port,
        dns_port: params.dns_port,
        lan: params.lan,
        masquerade: params.masquerade,
        reserved_v4: RESERVED_V4,
        reserved_v6: params.ipv6.is_enabled().then_some(RESERVED_V6),
    }
}

impl RuleSet {
    pub fn ipv6_enabled(&self) -> bool {
        self.reserved_v6.is_some()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // JSON Helper Functions
    // ═══════════════════════════════════════════════════════════════════════

    /// Creates a match expression for nft meta keys (l4proto, mark, ...)
    fn meta_match(key: &str, right: impl serde::Serialize) -> Value {
        json!({
            "match": {
                "left": { "meta": { "key": key } },
                "op": "==",
                "right": right
            }
        })
    }

    /// Creates a match expression for a payload field (daddr, dport, ...)
    fn payload_match(protocol: &str, field: &str, right: impl serde::Serialize) -> Value {
        json!({
            "match": {
                "left": { "payload": { "protocol": protocol, "field": field } },
                "op": "==",
                "right": right
            }
        })
    }

    /// Sets the packet mark
    fn mark_set(value: u32) -> Value {
        json!({ "mangle": { "key": { "meta": { "key": "mark" } }, "value": value } })
    }

    /// Redirects to a local TPROXY listener port
    fn tproxy_to(port: u16) -> Value {
        json!({ "tproxy": { "port": port } })
    }

    /// Prefix literal for a CIDR
    fn prefix(addr: &str, len: u8) -> Value {
        json!({ "prefix": { "addr": addr, "len": len } })
    }

    fn lan_prefix(&self) -> Value {
        Self::prefix(&self.lan.ip().to_string(), self.lan.prefix())
    }

    /// Protocol keyword matching the LAN CIDR's address family
    fn lan_protocol(&self) -> &'static str {
        if self.lan.is_ipv6() { "ip6" } else { "ip" }
    }

    /// Creates a rule add wrapper inside this ruleset's table
    fn rule_add(&self, chain: &str, expr: Vec<Value>, comment: &str) -> Value {
        json!({
            "add": {
                "rule": {
                    "family": "inet",
                    "table": self.naming.table.as_str(),
                    "chain": chain,
                    "expr": expr,
                    "comment": comment
                }
            }
        })
    }

    // ═══════════════════════════════════════════════════════════════════════

    /// Generates the libnftables JSON batch for this ruleset.
    ///
    /// The batch is loaded in a single `nft --json -f -` transaction, so the
    /// kernel never observes a state where only part of the bypass logic is
    /// active.
    pub fn to_nftables_json(&self) -> Value {
        let mut batch = Vec::with_capacity(24);

        // 1. Table (add + flush keeps reloads idempotent)
        batch.push(json!({ "add": { "table": { "family": "inet", "name": self.naming.table.as_str() } } }));
        batch.push(json!({ "flush": { "table": { "family": "inet", "name": self.naming.table.as_str() } } }));

        // 2. Reserved-range sets
        self.add_sets(&mut batch);

        // 3. Chains
        self.add_chains(&mut batch);

        // 4. Classification rules
        self.add_prerouting_rules(&mut batch);
        self.add_output_rules(&mut batch);
        if self.masquerade {
            self.add_postrouting_rules(&mut batch);
        }

        json!({ "nftables": batch })
    }

    fn set_elements(ranges: &[(&str, u8)]) -> Vec<Value> {
        ranges
            .iter()
            .map(|&(addr, len)| Self::prefix(addr, len))
            .collect()
    }

    fn add_sets(&self, batch: &mut Vec<Value>) {
        batch.push(json!({
            "add": {
                "set": {
                    "family": "inet",
                    "table": self.naming.table.as_str(),
                    "name": RESERVED_V4_SET,
                    "type": "ipv4_addr",
                    "flags": ["interval"],
                    "elem": Self::set_elements(self.reserved_v4)
                }
            }
        }));

        if let Some(reserved_v6) = self.reserved_v6 {
            batch.push(json!({
                "add": {
                    "set": {
                        "family": "inet",
                        "table": self.naming.table.as_str(),
                        "name": RESERVED_V6_SET,
                        "type": "ipv6_addr",
                        "flags": ["interval"],
                        "elem": Self::set_elements(reserved_v6)
                    }
                }
            }));
        }
    }

    fn add_chains(&self, batch: &mut Vec<Value>) {
        // mangle priority for both classification chains; the output chain
        // is route-type so re-marked packets get a fresh routing decision
        let chains: &[(&str, &str, &str, i32)] = if self.masquerade {
            &[
                (PREROUTING_CHAIN, "filter", "prerouting", -150),
                (OUTPUT_CHAIN, "route", "output", -150),
                (POSTROUTING_CHAIN, "nat", "postrouting", 100),
            ]
        } else {
            &[
                (PREROUTING_CHAIN, "filter", "prerouting", -150),
                (OUTPUT_CHAIN, "route", "output", -150),
            ]
        };

        for &(name, kind, hook, priority) in chains {
            batch.push(json!({
                "add": {
                    "chain": {
                        "family": "inet",
                        "table": self.naming.table.as_str(),
                        "name": name,
                        "type": kind,
                        "hook": hook,
                        "prio": priority,
                        "policy": "accept"
                    }
                }
            }));
        }
    }

    /// Bypass clauses shared by both classification chains: reserved ranges
    /// first, then the configured LAN.
    fn bypass_rules(&self, batch: &mut Vec<Value>, chain: &str) {
        batch.push(self.rule_add(
            chain,
            vec![
                Self::payload_match("ip", "daddr", format!("@{RESERVED_V4_SET}")),
                json!({ "return": null }),
            ],
            "bypass reserved ranges",
        ));

        if self.reserved_v6.is_some() {
            batch.push(self.rule_add(
                chain,
                vec![
                    Self::payload_match("ip6", "daddr", format!("@{RESERVED_V6_SET}")),
                    json!({ "return": null }),
                ],
                "bypass reserved ranges (v6)",
            ));
        }

        batch.push(self.rule_add(
            chain,
            vec![
                Self::payload_match(self.lan_protocol(), "daddr", self.lan_prefix()),
                json!({ "return": null }),
            ],
            "bypass lan",
        ));
    }

    fn add_prerouting_rules(&self, batch: &mut Vec<Value>) {
        // DNS hijack ahead of every bypass: bypassed destinations still
        // resolve through the proxy's resolver
        for proto in ["udp", "tcp"] {
            batch.push(self.rule_add(
                PREROUTING_CHAIN,
                vec![
                    Self::payload_match(proto, "dport", 53),
                    Self::tproxy_to(self.dns_port),
                    json!({ "accept": null }),
                ],
                &format!("dns hijack ({proto})"),
            ));
        }

        self.bypass_rules(batch, PREROUTING_CHAIN);

        batch.push(self.rule_add(
            PREROUTING_CHAIN,
            vec![
                Self::meta_match("mark", self.naming.self_mark),
                json!({ "return": null }),
            ],
            "proxy self-traffic",
        ));

        batch.push(self.rule_add(
            PREROUTING_CHAIN,
            vec![
                Self::meta_match("l4proto", json!({ "set": ["tcp", "udp"] })),
                Self::mark_set(self.naming.fw_mark),
                Self::tproxy_to(self.tproxy_port),
            ],
            "intercept",
        ));
    }

    fn add_output_rules(&self, batch: &mut Vec<Value>) {
        // Self-mark exclusion leads this chain: the DNS hijack below sets a
        // mark, and marking the proxy's own resolver egress would loop it
        // straight back into the proxy
        batch.push(self.rule_add(
            OUTPUT_CHAIN,
            vec![
                Self::meta_match("mark", self.naming.self_mark),
                json!({ "return": null }),
            ],
            "proxy self-traffic",
        ));

        for proto in ["udp", "tcp"] {
            batch.push(self.rule_add(
                OUTPUT_CHAIN,
                vec![
                    Self::payload_match(proto, "dport", 53),
                    Self::mark_set(self.naming.fw_mark),
                    json!({ "accept": null }),
                ],
                &format!("dns hijack ({proto})"),
            ));
        }

        self.bypass_rules(batch, OUTPUT_CHAIN);

        batch.push(self.rule_add(
            OUTPUT_CHAIN,
            vec![
                Self::meta_match("mark", self.naming.fw_mark),
                json!({ "return": null }),
            ],
            "already marked",
        ));

        batch.push(self.rule_add(
            OUTPUT_CHAIN,
            vec![
                Self::meta_match("l4proto", json!({ "set": ["tcp", "udp"] })),
                Self::mark_set(self.naming.fw_mark),
            ],
            "mark for interception",
        ));
    }

    fn add_postrouting_rules(&self, batch: &mut Vec<Value>) {
        batch.push(self.rule_add(
            POSTROUTING_CHAIN,
            vec![
                Self::payload_match(self.lan_protocol(), "saddr", self.lan_prefix()),
                json!({ "masquerade": null }),
            ],
            "lan source nat",
        ));
    }

    /// Generates human-readable .nft text for preview and export.
    pub fn to_nft_text(&self) -> String {
        let mut out = String::new();
        let table = &self.naming.table;
        let lan = &self.lan;
        let fw_mark = self.naming.fw_mark;
        let self_mark = self.naming.self_mark;
        let ip = self.lan_protocol();

        let _ = writeln!(out, "table inet {table} {{");

        let _ = writeln!(out, "    set {RESERVED_V4_SET} {{");
        let _ = writeln!(out, "        type ipv4_addr; flags interval;");
        let _ = writeln!(out, "        elements = {{ {} }}", render_ranges(self.reserved_v4));
        let _ = writeln!(out, "    }}\n");

        if let Some(reserved_v6) = self.reserved_v6 {
            let _ = writeln!(out, "    set {RESERVED_V6_SET} {{");
            let _ = writeln!(out, "        type ipv6_addr; flags interval;");
            let _ = writeln!(out, "        elements = {{ {} }}", render_ranges(reserved_v6));
            let _ = writeln!(out, "    }}\n");
        }

        let _ = writeln!(out, "    chain {PREROUTING_CHAIN} {{");
        let _ = writeln!(
            out,
            "        type filter hook prerouting priority mangle; policy accept;"
        );
        let _ = writeln!(out, "        udp dport 53 tproxy to :{} accept", self.dns_port);
        let _ = writeln!(out, "        tcp dport 53 tproxy to :{} accept", self.dns_port);
        let _ = writeln!(out, "        ip daddr @{RESERVED_V4_SET} return");
        if self.reserved_v6.is_some() {
            let _ = writeln!(out, "        ip6 daddr @{RESERVED_V6_SET} return");
        }
        let _ = writeln!(out, "        {ip} daddr {lan} return");
        let _ = writeln!(out, "        meta mark {self_mark:#x} return");
        let _ = writeln!(
            out,
            "        meta l4proto {{ tcp, udp }} meta mark set {fw_mark} tproxy to :{}",
            self.tproxy_port
        );
        let _ = writeln!(out, "    }}\n");

        let _ = writeln!(out, "    chain {OUTPUT_CHAIN} {{");
        let _ = writeln!(
            out,
            "        type route hook output priority mangle; policy accept;"
        );
        let _ = writeln!(out, "        meta mark {self_mark:#x} return");
        let _ = writeln!(out, "        udp dport 53 meta mark set {fw_mark} accept");
        let _ = writeln!(out, "        tcp dport 53 meta mark set {fw_mark} accept");
        let _ = writeln!(out, "        ip daddr @{RESERVED_V4_SET} return");
        if self.reserved_v6.is_some() {
            let _ = writeln!(out, "        ip6 daddr @{RESERVED_V6_SET} return");
        }
        let _ = writeln!(out, "        {ip} daddr {lan} return");
        let _ = writeln!(out, "        meta mark {fw_mark} return");
        let _ = writeln!(out, "        meta l4proto {{ tcp, udp }} meta mark set {fw_mark}");
        let _ = writeln!(out, "    }}");

        if self.masquerade {
            let _ = writeln!(out);
            let _ = writeln!(out, "    chain {POSTROUTING_CHAIN} {{");
            let _ = writeln!(
                out,
                "        type nat hook postrouting priority srcnat; policy accept;"
            );
            let _ = writeln!(out, "        {ip} saddr {lan} masquerade");
            let _ = writeln!(out, "    }}");
        }

        let _ = writeln!(out, "}}");
        out
    }
}

fn render_ranges(ranges: &[(&str, u8)]) -> String {
    ranges
        .iter()
        .map(|&(addr, len)| format!("{addr}/{len}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::Ipv6Mode;
    use proptest::prelude::*;

    fn params(tproxy: u16, dns: u16, lan: &str, ipv6: Ipv6Mode) -> InterceptParams {
        InterceptParams {
            tproxy_port: tproxy,
            dns_port: dns,
            lan: lan.parse().unwrap(),
            ipv6,
            masquerade: true,
        }
    }

    /// Rules of one chain, in batch order.
    fn chain_rules(batch: &Value, chain: &str) -> Vec<Value> {
        batch["nftables"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|op| op.get("add").and_then(|a| a.get("rule")))
            .filter(|rule| rule["chain"] == chain)
            .cloned()
            .collect()
    }

    /// Index of the first rule whose expression list contains a mangle
    /// (mark-set) statement.
    fn first_mark_set(rules: &[Value]) -> usize {
        rules
            .iter()
            .position(|rule| {
                rule["expr"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .any(|e| e.get("mangle").is_some())
            })
            .expect("chain has a mark-setting clause")
    }

    fn comment_index(rules: &[Value], comment: &str) -> usize {
        rules
            .iter()
            .position(|rule| rule["comment"] == comment)
            .unwrap_or_else(|| panic!("missing rule comment {comment}"))
    }

    #[test]
    fn test_compile_deterministic() {
        let p = params(7893, 1053, "10.0.0.0/24", Ipv6Mode::Enable);
        let naming = RuleNaming::default();

        let a = compile(&p, &naming);
        let b = compile(&p, &naming);

        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a.to_nftables_json()).unwrap(),
            serde_json::to_string(&b.to_nftables_json()).unwrap()
        );
        assert_eq!(a.to_nft_text(), b.to_nft_text());
    }

    #[test]
    fn test_prerouting_bypasses_precede_mark_set() {
        let rs = compile(
            &params(7893, 1053, "10.0.0.0/24", Ipv6Mode::Disable),
            &RuleNaming::default(),
        );
        let rules = chain_rules(&rs.to_nftables_json(), PREROUTING_CHAIN);
        let mark_set = first_mark_set(&rules);

        assert!(comment_index(&rules, "dns hijack (udp)") < mark_set);
        assert!(comment_index(&rules, "dns hijack (tcp)") < mark_set);
        assert!(comment_index(&rules, "bypass reserved ranges") < mark_set);
        assert!(comment_index(&rules, "bypass lan") < mark_set);
        assert!(comment_index(&rules, "proxy self-traffic") < mark_set);
        // The mark-setting clause is the redirect itself and comes last
        assert_eq!(mark_set, rules.len() - 1);
    }

    #[test]
    fn test_output_self_mark_precedes_every_mark_set() {
        let rs = compile(
            &params(7893, 1053, "10.0.0.0/24", Ipv6Mode::Disable),
            &RuleNaming::default(),
        );
        let rules = chain_rules(&rs.to_nftables_json(), OUTPUT_CHAIN);

        // The self-mark return must lead the chain: the DNS clauses below it
        // are mark-setting
        assert_eq!(comment_index(&rules, "proxy self-traffic"), 0);
        assert!(comment_index(&rules, "proxy self-traffic") < first_mark_set(&rules));
        // Packets already carrying the interception mark are returned before
        // the final mark-set clause
        assert_eq!(comment_index(&rules, "already marked"), rules.len() - 2);
    }

    #[test]
    fn test_scenario_ports_and_exemptions() {
        let rs = compile(
            &params(7893, 1053, "10.0.0.0/24", Ipv6Mode::Disable),
            &RuleNaming::default(),
        );
        let batch = rs.to_nftables_json();
        let rules = chain_rules(&batch, PREROUTING_CHAIN);

        // DNS redirected to 1053
        let dns = &rules[comment_index(&rules, "dns hijack (udp)")];
        assert_eq!(dns["expr"][1]["tproxy"]["port"], 1053);

        // 10.0.0.0/8 is covered by the reserved set, 10.0.0.0/24 by the lan rule
        assert!(rs.reserved_v4.contains(&("10.0.0.0", 8)));
        let lan = &rules[comment_index(&rules, "bypass lan")];
        assert_eq!(lan["expr"][0]["match"]["right"]["prefix"]["addr"], "10.0.0.0");
        assert_eq!(lan["expr"][0]["match"]["right"]["prefix"]["len"], 24);

        // Everything else marked and redirected to 7893
        let intercept = &rules[comment_index(&rules, "intercept")];
        assert_eq!(intercept["expr"][1]["mangle"]["value"], 1);
        assert_eq!(intercept["expr"][2]["tproxy"]["port"], 7893);

        // v4-only compilation carries no v6 set and no v6 bypass
        assert!(rs.reserved_v6.is_none());
        assert!(!rs.to_nft_text().contains(RESERVED_V6_SET));
    }

    #[test]
    fn test_ipv6_mirror() {
        let rs = compile(
            &params(7893, 53, "10.0.0.0/24", Ipv6Mode::Enable),
            &RuleNaming::default(),
        );
        let batch = rs.to_nftables_json();

        let sets: Vec<&str> = batch["nftables"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|op| op.get("add").and_then(|a| a.get("set")))
            .filter_map(|set| set["name"].as_str())
            .collect();
        assert_eq!(sets, vec![RESERVED_V4_SET, RESERVED_V6_SET]);

        let rules = chain_rules(&batch, PREROUTING_CHAIN);
        assert!(
            comment_index(&rules, "bypass reserved ranges (v6)") < first_mark_set(&rules)
        );
    }

    #[test]
    fn test_masquerade_chain_only_when_enabled() {
        let mut p = params(7893, 53, "10.0.0.0/24", Ipv6Mode::Disable);
        let naming = RuleNaming::default();

        let with_nat = compile(&p, &naming);
        assert_eq!(
            chain_rules(&with_nat.to_nftables_json(), POSTROUTING_CHAIN).len(),
            1
        );
        assert!(with_nat.to_nft_text().contains("masquerade"));

        p.masquerade = false;
        let without_nat = compile(&p, &naming);
        assert!(
            chain_rules(&without_nat.to_nftables_json(), POSTROUTING_CHAIN).is_empty()
        );
        assert!(!without_nat.to_nft_text().contains("masquerade"));
    }

    #[test]
    fn test_isolated_naming_flows_through() {
        let naming = RuleNaming {
            table: "tpgate_test".to_string(),
            fw_mark: 7,
            self_mark: 0xfe,
            route_table: 107,
        };
        let rs = compile(&params(9000, 53, "192.168.5.0/24", Ipv6Mode::Disable), &naming);
        let batch = rs.to_nftables_json();

        assert_eq!(batch["nftables"][0]["add"]["table"]["name"], "tpgate_test");
        let rules = chain_rules(&batch, OUTPUT_CHAIN);
        let last = rules.last().unwrap();
        assert_eq!(last["expr"][1]["mangle"]["value"], 7);
        assert!(rs.to_nft_text().contains("meta mark 0xfe return"));
    }

    proptest! {
        #[test]
        fn prop_compile_is_pure_and_ordered(
            tproxy in 1u16..,
            dns in 1u16..,
            octet in 0u8..=255,
            prefix in 8u8..=30,
            ipv6 in prop::bool::ANY,
            masquerade in prop::bool::ANY,
        ) {
            let p = InterceptParams {
                tproxy_port: tproxy,
                dns_port: dns,
                lan: format!("172.16.{octet}.0/{prefix}")
                    .parse::<IpNetwork>()
                    .unwrap(),
                ipv6: if ipv6 { Ipv6Mode::Enable } else { Ipv6Mode::Disable },
                masquerade,
            };
            let naming = RuleNaming::default();

            let a = compile(&p, &naming);
            let b = compile(&p, &naming);
            prop_assert_eq!(
                serde_json::to_string(&a.to_nftables_json()).unwrap(),
                serde_json::to_string(&b.to_nftables_json()).unwrap()
            );

            // The bypass clauses precede the general interception clause in
            // both chains; in the output chain the DNS hijack legitimately
            // sets a mark earlier, guarded by the leading self-mark return.
            for (chain, intercept) in
                [(PREROUTING_CHAIN, "intercept"), (OUTPUT_CHAIN, "mark for interception")]
            {
                let rules = chain_rules(&a.to_nftables_json(), chain);
                let mark_set = comment_index(&rules, intercept);
                prop_assert!(comment_index(&rules, "bypass reserved ranges") < mark_set);
                prop_assert!(comment_index(&rules, "bypass lan") < mark_set);
                prop_assert!(comment_index(&rules, "proxy self-traffic") < mark_set);
                prop_assert!(comment_index(&rules, "proxy self-traffic") <= first_mark_set(&rules));
            }
        }
    }
}
