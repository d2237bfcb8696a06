//! Input validation for tpgate
//!
//! Centralized validation for everything that ends up inside a privileged
//! command line or a kernel-loaded ruleset. All checks happen during
//! resolution, before any system state is touched.

use ipnetwork::IpNetwork;

/// Validates a single port number.
///
/// # Errors
///
/// Returns `Err` if port is 0 (reserved).
pub fn validate_port(port: u16) -> Result<u16, String> {
    if port == 0 {
        Err("Port must be between 1 and 65535".to_string())
    } else {
        Ok(port)
    }
}

/// Validates the LAN CIDR argument.
///
/// The LAN scope bounds interception: an unbounded scope (`0.0.0.0/0`,
/// `::/0`) would exempt the entire address space in the bypass clauses and
/// is rejected outright.
///
/// # Errors
///
/// Returns `Err` if the string is not a valid CIDR or has a zero-length
/// prefix.
pub fn validate_lan(input: &str) -> Result<IpNetwork, String> {
    let network: IpNetwork = input
        .parse()
        .map_err(|e| format!("not a valid CIDR ({e})"))?;

    if network.prefix() == 0 {
        return Err("unbounded scope; use a concrete network like 10.0.0.0/24".to_string());
    }

    Ok(network)
}

/// Validates the interception/self mark pair.
///
/// The interception mark must be non-zero (mark 0 is every packet's default
/// and would match all traffic in the policy-routing rule), and must differ
/// from the proxy's self mark or the proxy's own egress gets re-intercepted.
///
/// # Errors
///
/// Returns `Err` on a zero or colliding mark value.
pub fn validate_marks(fw_mark: u32, self_mark: u32) -> Result<(), String> {
    if fw_mark == 0 {
        return Err("interception mark must be non-zero".to_string());
    }
    if fw_mark == self_mark {
        return Err("interception mark must differ from the proxy self mark".to_string());
    }
    Ok(())
}
