use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vconverge")]
#[command(version)]
#[command(about = "Desired-state compliance checks and remediation for virtualization hosts", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: ~/.config/vconverge/config.toml)
    #[arg(long, global = true, env = "VCONVERGE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Report deviations from the desired state without changing anything
    Check(TargetArgs),

    /// Inspect, plan and apply remediation for every host in scope
    Remediate(RemediateArgs),

    /// Check first, then remediate only non-compliant hosts
    Apply(ApplyArgs),

    /// Run as a declarative state and print its return
    State(StateArgs),

    /// Validate a desired-state document against the category registry
    Validate(ValidateArgs),

    /// List the registered configuration categories
    Categories {
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Where to run and against what
#[derive(Args, Clone)]
pub struct TargetArgs {
    /// Desired-state document (YAML, JSON or TOML; `-` reads stdin)
    #[arg(short, long)]
    pub desired: PathBuf,

    /// Cluster path, e.g. /Datacenter/host/Cluster-01 (repeatable)
    #[arg(short, long = "cluster")]
    pub clusters: Vec<String>,

    /// Only these hosts of the resolved clusters (repeatable)
    #[arg(long = "host", value_name = "HOST_ID")]
    pub hosts: Vec<String>,

    /// Inventory file backing the management plane
    #[arg(short, long, env = "VCONVERGE_INVENTORY")]
    pub inventory: Option<String>,

    /// Hosts processed in parallel
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Per-call timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Reject categories the registry does not know
    #[arg(long)]
    pub reject_unknown: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Exit non-zero unless every host ends compliant
    #[arg(long)]
    pub strict: bool,
}

#[derive(Args, Clone)]
pub struct RemediateArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Plan and simulate without making changes
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Do not write the updated inventory back to disk
    #[arg(long)]
    pub no_save: bool,
}

#[derive(Args, Clone)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub remediate: RemediateArgs,

    /// Remediate every host without checking compliance first
    #[arg(long)]
    pub no_check_first: bool,
}

#[derive(Args, Clone)]
pub struct StateArgs {
    /// State name reported in the return
    #[arg(long, default_value = "compliance-control")]
    pub name: String,

    #[command(flatten)]
    pub target: TargetArgs,

    /// Test mode: report what would change without changing it
    #[arg(long)]
    pub test: bool,

    /// Do not write the updated inventory back to disk
    #[arg(long)]
    pub no_save: bool,
}

#[derive(Args, Clone)]
pub struct ValidateArgs {
    /// Desired-state document (`-` reads stdin)
    pub desired: PathBuf,

    /// Reject categories the registry does not know
    #[arg(long)]
    pub reject_unknown: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_apply() {
        let cli = Cli::try_parse_from([
            "vconverge",
            "-vv",
            "apply",
            "--desired",
            "desired.yaml",
            "--cluster",
            "/DC/host/A",
            "--cluster",
            "/DC/host/B",
            "--dry-run",
            "--no-check-first",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Command::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert!(args.no_check_first);
        assert!(args.remediate.dry_run);
        assert_eq!(args.remediate.target.clusters, ["/DC/host/A", "/DC/host/B"]);
        assert_eq!(args.remediate.target.format, OutputFormat::Json);
    }

    #[test]
    fn test_parse_host_filter() {
        let cli = Cli::try_parse_from([
            "vconverge",
            "check",
            "-d",
            "desired.yaml",
            "-c",
            "/Datacenter 1/host/Prod Cluster",
            "--host",
            "esxi-01",
            "--host",
            "esxi-03",
        ])
        .unwrap();
        let Command::Check(args) = cli.command else {
            panic!("expected check");
        };
        assert_eq!(args.clusters, ["/Datacenter 1/host/Prod Cluster"]);
        assert_eq!(args.hosts, ["esxi-01", "esxi-03"]);
    }

    #[test]
    fn test_desired_is_required() {
        assert!(Cli::try_parse_from(["vconverge", "check", "--cluster", "/DC/host/A"]).is_err());
    }
}
