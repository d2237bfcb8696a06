//! Core interception lifecycle functionality
//!
//! This module contains the types and logic at the heart of the manager:
//!
//! - [`params`]: Parameter resolution from CLI input and the proxy config
//! - [`ruleset`]: Pure compilation of the nftables interception ruleset
//! - [`applier`]: Idempotent apply/teardown against the engine seams
//! - [`verify`]: Pre-apply validation via `nft --check`
//! - [`error`]: Error taxonomy and nft error translation

pub mod applier;
pub mod error;
pub mod params;
pub mod ruleset;
pub mod verify;
