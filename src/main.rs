//! tpgate - Transparent Proxy Gateway Manager
//!
//! Single-shot supervisor around a TPROXY-capable proxy process: derives
//! interception parameters from the proxy's own configuration, compiles and
//! applies the nftables + policy-routing state, runs the proxy, and
//! guarantees the state is removed again when the proxy stops for any
//! reason.
//!
//! # Usage
//!
//! ```bash
//! # Run as a side gateway for 10.0.0.0/24
//! sudo tpgate --lan 10.0.0.0/24 -c /etc/sing-box/config.json
//!
//! # IPv6 interception and a custom proxy binary
//! sudo tpgate --lan 10.0.0.0/24 --ipv6 enable --bin /opt/sing-box -c config.json
//!
//! # Remove any leftover interception state and exit
//! sudo tpgate clean
//!
//! # Inspect what would be loaded
//! tpgate --lan 10.0.0.0/24 -c config.json export --format nft
//! tpgate --lan 10.0.0.0/24 -c config.json check
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use tpgate::core::applier::RuleApplier;
use tpgate::core::error::{Error, NftablesErrorPattern};
use tpgate::core::params::{self, Ipv6Mode, RuleNaming};
use tpgate::core::ruleset::{self, RuleSet};
use tpgate::core::verify;
use tpgate::engine::{self, IpRouteCli, NftCli};
use tpgate::lifecycle::Coordinator;
use tpgate::supervisor::ProxyCommand;
use tpgate::{audit, utils};

#[derive(Parser)]
#[command(name = "tpgate")]
#[command(about = "Transparent proxy gateway manager (TPROXY + nftables)", long_about = None)]
#[command(version)]
struct Cli {
    /// LAN CIDR whose clients are routed through the proxy (e.g. 10.0.0.0/24)
    #[arg(long, value_name = "CIDR", global = true)]
    lan: Option<String>,

    /// IPv6 interception mode
    #[arg(long, value_name = "MODE", default_value = "disable", global = true)]
    ipv6: Ipv6Mode,

    /// Path to the proxy configuration file
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Proxy executable to supervise
    #[arg(long, value_name = "PATH", default_value = "/usr/bin/sing-box", global = true)]
    bin: PathBuf,

    /// Skip the LAN source-NAT (masquerade) rule and forwarding sysctls
    #[arg(long, global = true)]
    no_masquerade: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply rules, start the proxy and supervise it (the default)
    Run,
    /// Tear down any interception state left on this host and exit
    Clean,
    /// Compile the ruleset and validate it with nft --check
    Check,
    /// Print the compiled ruleset without touching the system
    Export {
        /// Export format (nft or json)
        #[arg(short, long, default_value = "nft")]
        format: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();
    let _ = utils::ensure_dirs();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to create runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(handle_cli(cli)) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            report_error(&e);
            ExitCode::from(e.exit_code())
        }
    }
}

/// Prints the failure with translated suggestions where the firewall engine
/// produced the error.
fn report_error(error: &Error) {
    eprintln!("Error: {error}");

    if let Error::Nftables {
        stderr: Some(stderr),
        ..
    } = error
    {
        let translation = NftablesErrorPattern::match_error(stderr);
        eprintln!("  {}", translation.user_message);
        for suggestion in &translation.suggestions {
            eprintln!("  - {suggestion}");
        }
    }
}

async fn handle_cli(mut cli: Cli) -> Result<u8, Error> {
    let command = cli.command.take();
    match command {
        None | Some(Commands::Run) => run(cli).await,
        Some(Commands::Clean) => {
            let naming = RuleNaming::default();
            let applier = RuleApplier::new(NftCli::new(), IpRouteCli::new());
            applier.teardown(&naming).await;
            audit::log_teardown(&naming.table).await;
            println!("Interception state removed.");
            Ok(0)
        }
        Some(Commands::Check) => {
            let ruleset = resolve_and_compile(&cli).await?;
            let result = verify::verify_ruleset(ruleset.to_nftables_json()).await?;
            audit::log_verify(result.success, result.errors.len(), None).await;
            if result.success {
                println!("Ruleset OK.");
                Ok(0)
            } else {
                Err(Error::Nftables {
                    message: format!("verification failed:\n{}", result.errors.join("\n")),
                    stderr: None,
                    exit_code: None,
                })
            }
        }
        Some(Commands::Export { ref format }) => {
            let ruleset = resolve_and_compile(&cli).await?;
            match format.as_str() {
                "nft" => print!("{}", ruleset.to_nft_text()),
                "json" => println!(
                    "{}",
                    serde_json::to_string_pretty(&ruleset.to_nftables_json())?
                ),
                other => {
                    return Err(Error::InvalidParameter {
                        field: "format",
                        message: format!("'{other}' is not supported; use 'nft' or 'json'"),
                    });
                }
            }
            Ok(0)
        }
    }
}

/// Resolves parameters from the CLI and the proxy config, then compiles the
/// ruleset. No system state is touched here.
async fn resolve_and_compile(cli: &Cli) -> Result<RuleSet, Error> {
    let config_path = cli
        .config
        .as_deref()
        .ok_or(Error::MissingParameter("config"))?;
    let config_bytes = tokio::fs::read(config_path).await?;

    let params = params::resolve(
        cli.lan.as_deref(),
        cli.ipv6,
        !cli.no_masquerade,
        &config_bytes,
    )?;

    info!(
        lan = %params.lan,
        tproxy_port = params.tproxy_port,
        dns_port = params.dns_port,
        ipv6 = %params.ipv6,
        masquerade = params.masquerade,
        "parameters resolved"
    );

    Ok(ruleset::compile(&params, &RuleNaming::default()))
}

async fn run(cli: Cli) -> Result<u8, Error> {
    let config_path = cli
        .config
        .clone()
        .ok_or(Error::MissingParameter("config"))?;
    let ruleset = resolve_and_compile(&cli).await?;

    if !nix::unistd::getuid().is_root() {
        warn!("not running as root; nft/ip/sysctl will go through sudo, run0 or pkexec");
    }

    // Refuse to touch the host if the local nft cannot even parse the batch
    let verification = verify::verify_ruleset(ruleset.to_nftables_json()).await?;
    audit::log_verify(verification.success, verification.errors.len(), None).await;
    if !verification.success {
        return Err(Error::Nftables {
            message: format!(
                "verification failed:\n{}",
                verification.errors.join("\n")
            ),
            stderr: None,
            exit_code: None,
        });
    }

    if ruleset.masquerade {
        engine::apply_forwarding_sysctls(ruleset.ipv6_enabled()).await;
    }

    let proxy = ProxyCommand {
        executable: cli.bin.clone(),
        config_path,
    };

    let applier = RuleApplier::new(NftCli::new(), IpRouteCli::new());
    let mut coordinator = Coordinator::new(applier);
    let code = coordinator.run(&ruleset, &proxy).await?;

    info!(exit_code = code, "shutdown complete");
    Ok(code)
}
