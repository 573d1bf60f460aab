use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use stack_apply::{DeployReport, Deployer, DryRunTarget, HelmCli, KubeTarget};
use stack_core::{StackConfig, StackPlan};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod output;

/// Compose, synthesize and apply the EKS stack
#[derive(Parser, Debug)]
#[command(name = "eks-stack", version, about, long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the template, manifests and chart releases to a directory
    Synth(SynthArgs),

    /// Apply the cluster workloads to the current cluster
    Apply(ApplyArgs),

    /// Compose the secrets mount self-test and apply it with the stack
    SelfTest(ApplyArgs),

    /// Print the configuration JSON schema
    Schema,
}

#[derive(Args, Debug)]
struct StackArgs {
    /// Stack configuration file (YAML). Defaults apply when omitted.
    #[arg(short = 'f', long = "config", env = "EKS_STACK_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured environment label
    #[arg(short, long, env = "EKS_STACK_ENVIRONMENT")]
    environment: Option<String>,

    /// Include the secrets mount self-test
    #[arg(long)]
    with_self_test: bool,
}

#[derive(Args, Debug)]
struct SynthArgs {
    #[command(flatten)]
    stack: StackArgs,

    /// Output directory
    #[arg(short, long, default_value = "stack.out")]
    out: PathBuf,
}

#[derive(Args, Debug)]
struct ApplyArgs {
    #[command(flatten)]
    stack: StackArgs,

    /// Log every step instead of touching the cluster
    #[arg(long)]
    dry_run: bool,

    /// kubeconfig context to apply to
    #[arg(long)]
    kube_context: Option<String>,

    /// helm binary to run
    #[arg(long, default_value = "helm")]
    helm: PathBuf,

    /// Also write the artifacts the cloud resources need
    #[arg(short, long)]
    out: Option<PathBuf>,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

fn load_config(args: &StackArgs) -> Result<StackConfig> {
    let mut config = match &args.config {
        Some(path) => {
            StackConfig::load(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => StackConfig::default(),
    };
    if let Some(environment) = &args.environment {
        config.environment = environment.clone();
    }
    if config.has_placeholder_account() {
        warn!(
            account = %config.account_id,
            "Using the placeholder account id; set accountId before deploying"
        );
    }
    Ok(config)
}

fn compose(args: &StackArgs, self_test: bool) -> Result<StackPlan> {
    let config = load_config(args)?;
    let plan = if self_test || args.with_self_test {
        stack_provision::compose_with_self_test(&config)
    } else {
        stack_provision::compose(&config)
    };
    plan.context("composing stack")
}

async fn apply(args: &ApplyArgs, self_test: bool) -> Result<()> {
    let plan = compose(&args.stack, self_test)?;
    if let Some(out) = &args.out {
        output::write_artifacts(&plan, out)?;
    }

    let report = if args.dry_run {
        let target = DryRunTarget::new();
        Deployer::new(&target).deploy(&plan).await
    } else {
        let helm = HelmCli::new()
            .with_binary(&args.helm)
            .with_context(args.kube_context.clone());
        let target = KubeTarget::connect(args.kube_context.clone(), helm)
            .await
            .context("connecting to the cluster")?;
        Deployer::new(&target).deploy(&plan).await
    };

    summarize(&report)
}

fn summarize(report: &DeployReport) -> Result<()> {
    for step in report.failed() {
        error!("{}", step);
    }
    for step in report.skipped() {
        warn!("{}", step);
    }

    if report.aborted {
        bail!("deployment aborted after a fatal error");
    }
    let failed = report.failed().count();
    if failed > 0 {
        bail!(
            "{} step(s) failed, {} skipped",
            failed,
            report.skipped().count()
        );
    }
    info!(applied = report.applied().count(), "Deployment complete");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Synth(args) => {
            let plan = compose(&args.stack, false)?;
            for path in output::write_artifacts(&plan, &args.out)? {
                println!("{}", path.display());
            }
        }
        Commands::Apply(args) => apply(&args, false).await?,
        Commands::SelfTest(args) => apply(&args, true).await?,
        Commands::Schema => {
            let schema = schemars::schema_for!(StackConfig);
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
    }

    Ok(())
}
