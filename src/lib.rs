//! tpgate - Transparent Proxy Gateway Manager
//!
//! Turns a Linux host into a transparent traffic interceptor: LAN and local
//! traffic is redirected into a user-space proxy (sing-box or equivalent)
//! via TPROXY, using packet-marking nftables rules plus policy routing, and
//! the firewall/routing state is guaranteed to be removed when the proxy
//! stops for any reason.
//!
//! # Architecture
//!
//! - [`core`] - Parameter resolution, ruleset compilation, apply/teardown
//! - [`engine`] - The narrow firewall/routing seams and their nft/ip adapters
//! - [`supervisor`] - Proxy child-process supervision
//! - [`lifecycle`] - The single-shot state machine tying it all together
//! - [`elevation`] - Privileged command construction (root/run0/sudo/pkexec)
//! - [`audit`] - JSON-lines trail of all privileged operations
//! - [`validators`] - Input validation before anything touches the kernel
//!
//! # Safety Features
//!
//! - Pre-apply verification with `nft --check`
//! - Atomic single-transaction ruleset loads, rollback on partial failure
//! - Idempotent teardown that also sweeps tables from earlier releases
//! - Exactly-once cleanup no matter which termination path fires
//! - PR_SET_PDEATHSIG so a crashed manager never orphans the proxy

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod elevation;
pub mod engine;
pub mod lifecycle;
pub mod supervisor;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use crate::core::error::{Error, Result};
pub use crate::core::params::{InterceptParams, Ipv6Mode, RuleNaming};
pub use crate::core::ruleset::RuleSet;
