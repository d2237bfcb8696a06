//! Proxy configuration document
//!
//! The manager treats the proxy's configuration as an opaque document except
//! for the `inbounds` array, from which it reads exactly three fields per
//! record: `type`, `tag` and `listen_port`. Everything else is preserved by
//! serde's ignore-unknown-fields default and never interpreted here; the
//! proxy process itself is the authority on the rest of the file.

use serde::Deserialize;

use crate::core::error::Result;

/// Inbound type identifying the transparent-interception listener.
pub const TPROXY_INBOUND_TYPE: &str = "tproxy";

/// Inbound tag identifying the DNS hijack listener.
pub const DNS_INBOUND_TAG: &str = "dns-in";

/// The subset of the proxy configuration the manager consumes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub inbounds: Vec<Inbound>,
}

/// A single inbound record.
#[derive(Debug, Clone, Deserialize)]
pub struct Inbound {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub listen_port: u16,
}

impl ProxyConfig {
    /// Decodes the configuration document from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `Err` when the document is not valid JSON.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// The transparent-interception inbound, if the config declares one.
    pub fn tproxy_inbound(&self) -> Option<&Inbound> {
        self.inbounds
            .iter()
            .find(|inbound| inbound.kind == TPROXY_INBOUND_TYPE)
    }

    /// The DNS hijack inbound, if the config declares one.
    pub fn dns_inbound(&self) -> Option<&Inbound> {
        self.inbounds
            .iter()
            .find(|inbound| inbound.tag == DNS_INBOUND_TAG)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_lookup() {
        let config = ProxyConfig::from_slice(
            br#"{
                "inbounds": [
                    { "type": "mixed", "tag": "socks-in", "listen_port": 2080 },
                    { "type": "tproxy", "tag": "tproxy-in", "listen_port": 7893 },
                    { "type": "direct", "tag": "dns-in", "listen_port": 1053 }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.tproxy_inbound().unwrap().listen_port, 7893);
        assert_eq!(config.dns_inbound().unwrap().listen_port, 1053);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let config = ProxyConfig::from_slice(
            br#"{
                "log": { "level": "warn" },
                "inbounds": [
                    { "type": "tproxy", "tag": "t", "listen": "::", "listen_port": 9000,
                      "sniff": true, "udp_timeout": "5m" }
                ],
                "route": { "rules": [] }
            }"#,
        )
        .unwrap();
        assert_eq!(config.tproxy_inbound().unwrap().listen_port, 9000);
    }

    #[test]
    fn test_empty_document() {
        let config = ProxyConfig::from_slice(b"{}").unwrap();
        assert!(config.tproxy_inbound().is_none());
        assert!(config.dns_inbound().is_none());
    }
}
