use thiserror::Error;

/// Core error types for tpgate
///
/// Every variant maps to one of the failure categories a caller can react
/// to: resolution failures happen before any rule is touched, apply-time
/// failures guarantee rollback before they surface, and process-start
/// failures guarantee rollback as well. A proxy crash is deliberately NOT
/// represented here - it is a normal cleanup trigger, not an error.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A required input was absent (e.g. the LAN CIDR)
    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),

    /// The proxy configuration has no tproxy inbound to redirect to
    #[error(
        "proxy configuration contains no tproxy inbound; refusing to install \
         interception rules without a concrete redirect target"
    )]
    NoInterceptInbound,

    /// An input was present but malformed
    #[error("invalid {field}: {message}")]
    InvalidParameter {
        field: &'static str,
        message: String,
    },

    /// nftables command execution failed
    #[error("nftables error: {message}")]
    Nftables {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    /// A policy-routing command failed
    #[error("route command failed ({command}): {message}")]
    Route { command: String, message: String },

    /// The proxy executable could not be started
    #[error("failed to start proxy {executable}: {source}")]
    ProcessStart {
        executable: String,
        source: std::io::Error,
    },

    /// Privilege escalation failed
    #[error("elevation error: {0}")]
    Elevation(String),

    /// Internal logic error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Process exit code for this error category, for scripting/monitoring.
    ///
    /// 2 = resolution failure (no rules were touched), 3 = rule application
    /// failure (rolled back), 4 = proxy start failure (rolled back),
    /// 1 = anything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::MissingParameter(_)
            | Error::NoInterceptInbound
            | Error::InvalidParameter { .. }
            | Error::Io(_)
            | Error::Serialization(_) => 2,
            Error::Nftables { .. } | Error::Route { .. } | Error::Elevation(_) => 3,
            Error::ProcessStart { .. } => 4,
            Error::Internal(_) => 1,
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Database of nftables error patterns and their translations
pub struct NftablesErrorPattern;

impl NftablesErrorPattern {
    /// Matches an error message against known patterns and returns a user-friendly translation.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        if lower.contains("permission denied") || lower.contains("operation not permitted") {
            return ErrorTranslation::new("Insufficient permissions to modify firewall rules")
                .with_suggestion("Run as root, or make sure sudo/run0/pkexec is configured")
                .with_suggestion("Check if CAP_NET_ADMIN capability is available");
        }

        if lower.contains("no such file") || lower.contains("command not found") {
            return ErrorTranslation::new("nftables is not installed or not found in PATH")
                .with_suggestion("Install nftables: sudo apt install nftables  (Debian/Ubuntu)")
                .with_suggestion("Or: sudo dnf install nftables  (Fedora/RHEL)")
                .with_suggestion("Or: sudo pacman -S nftables  (Arch)");
        }

        if lower.contains("could not process rule") || lower.contains("syntax error") {
            return ErrorTranslation::new("The kernel rejected the generated ruleset")
                .with_suggestion("Verify the nft version supports tproxy and mark statements")
                .with_suggestion("Run the check subcommand to see the rejected batch");
        }

        if lower.contains("netlink") || lower.contains("cache initialization failed") {
            return ErrorTranslation::new("Communication error with kernel netlink interface")
                .with_suggestion("Check kernel modules: lsmod | grep nf_tables")
                .with_suggestion("Load nf_tables module: sudo modprobe nf_tables");
        }

        ErrorTranslation::new(format!("Firewall error: {msg}"))
            .with_suggestion("Verify nftables is working: sudo nft list ruleset")
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_categories() {
        assert_eq!(Error::MissingParameter("lan").exit_code(), 2);
        assert_eq!(Error::NoInterceptInbound.exit_code(), 2);
        assert_eq!(
            Error::Nftables {
                message: "load failed".into(),
                stderr: None,
                exit_code: Some(1),
            }
            .exit_code(),
            3
        );
        assert_eq!(
            Error::Route {
                command: "ip rule add".into(),
                message: "exit 2".into(),
            }
            .exit_code(),
            3
        );
        assert_eq!(
            Error::ProcessStart {
                executable: "/usr/bin/sing-box".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
            }
            .exit_code(),
            4
        );
    }

    #[test]
    fn test_nftables_missing_command() {
        let translation = NftablesErrorPattern::match_error("command not found: nft");
        assert!(translation.user_message.contains("not installed"));
        assert!(translation.suggestions.len() >= 3); // Multiple distro options
    }

    #[test]
    fn test_nftables_permission_error() {
        let translation = NftablesErrorPattern::match_error("Operation not permitted");
        assert!(translation.user_message.contains("permissions"));
        assert!(
            translation
                .suggestions
                .iter()
                .any(|s| s.contains("CAP_NET_ADMIN"))
        );
    }

    #[test]
    fn test_netlink_error() {
        let translation = NftablesErrorPattern::match_error("netlink error occurred");
        assert!(translation.user_message.contains("netlink"));
        assert!(
            translation
                .suggestions
                .iter()
                .any(|s| s.contains("modprobe"))
        );
    }

    #[test]
    fn test_generic_fallback() {
        let translation = NftablesErrorPattern::match_error("something odd");
        assert!(translation.user_message.contains("something odd"));
    }
}
