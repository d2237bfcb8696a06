/// Verification module for compiled rulesets
///
/// Runs the compiled batch through `nft --json --check` before anything is
/// applied, so a kernel or nft version that cannot express the interception
/// rules is reported before the host's state is touched.
use tracing::{info, warn};

use crate::core::error::{Error, Result};

/// Result of a ruleset verification operation
#[derive(Debug, Clone)]
pub struct VerifyResult {
    pub success: bool,
    pub errors: Vec<String>,
}

impl VerifyResult {
    /// Creates a successful verification result
    pub fn success() -> Self {
        Self {
            success: true,
            errors: Vec::new(),
        }
    }

    /// Creates a failed verification result with errors
    pub fn failure(errors: Vec<String>) -> Self {
        Self {
            success: false,
            errors,
        }
    }
}

/// Verifies a compiled batch without applying it using `nft --json --check`.
///
/// # Errors
///
/// Returns `Err` if:
/// - nft command cannot be executed
/// - JSON serialization fails
/// - Communication with the nft process fails
pub async fn verify_ruleset(batch: serde_json::Value) -> Result<VerifyResult> {
    let json_string = serde_json::to_string(&batch)?;

    info!("verifying ruleset via nft --json --check");

    let mut child =
        crate::elevation::create_elevated_nft_command(&["--json", "--check", "-f", "-"])
            .map_err(|e| Error::Elevation(e.to_string()))?
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| Error::Internal(format!("Failed to spawn nft: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        use tokio::io::AsyncWriteExt;
        stdin
            .write_all(json_string.as_bytes())
            .await
            .map_err(|e| Error::Internal(format!("Failed to write to nft stdin: {e}")))?;
    }

    let output = child.wait_with_output().await?;

    if output.status.success() {
        info!("ruleset verification passed");
        Ok(VerifyResult::success())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!("ruleset verification failed: {}", stderr);

        Ok(VerifyResult::failure(parse_nft_errors(&stderr)))
    }
}

/// Parses nft error output into user-friendly messages
///
/// Attempts to extract meaningful error information from nft's
/// stderr output, falling back to raw output if parsing fails.
pub fn parse_nft_errors(stderr: &str) -> Vec<String> {
    // Try to parse JSON error format first
    if let Ok(json_err) = serde_json::from_str::<serde_json::Value>(stderr)
        && let Some(errors) = json_err.get("errors").and_then(|e| e.as_array())
    {
        return errors
            .iter()
            .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
            .map(String::from)
            .collect();
    }

    // Fall back to line-by-line parsing
    stderr
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.trim()
                .trim_start_matches("Error: ")
                .trim_start_matches("nft: ")
                .to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nft_errors_plain_text() {
        let stderr = "Error: syntax error, unexpected $end\nError: invalid expression\n";
        let errors = parse_nft_errors(stderr);

        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0], "syntax error, unexpected $end");
        assert_eq!(errors[1], "invalid expression");
    }

    #[test]
    fn test_parse_nft_errors_empty() {
        assert!(parse_nft_errors("").is_empty());
    }

    #[test]
    fn test_parse_nft_errors_json() {
        let stderr = r#"{"errors": [{"message": "unknown statement tproxy"}]}"#;
        let errors = parse_nft_errors(stderr);
        assert_eq!(errors, vec!["unknown statement tproxy".to_string()]);
    }

    #[test]
    fn test_verify_result_constructors() {
        assert!(VerifyResult::success().success);
        let failure = VerifyResult::failure(vec!["error 1".to_string()]);
        assert!(!failure.success);
        assert_eq!(failure.errors.len(), 1);
    }
}
