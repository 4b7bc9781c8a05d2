//! Run one `create_with_residency` statement on a simulated cluster.
//!
//! ```text
//! residency-sim --instances 6 --servers 3 --dead 5 --array lab.events --residency servers=0,1
//! residency-sim --instances 4 --temp --instance-list 1,3
//! ```

use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use clap::Parser;
use residency::CreateArrayRequest;
use residency::InstanceId;
use residency::ResidencyConfig;
use residency::ResidencyInput;
use residency::schema::ArrayShape;
use residency::sim::SimCluster;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "residency-sim")]
struct Args {
    /// Path to TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of instances in the cluster.
    #[arg(long, default_value_t = 4)]
    instances: u64,

    /// Number of servers; instances are assigned round-robin.
    #[arg(long, default_value_t = 2)]
    servers: u64,

    /// Instances to mark dead before the statement runs.
    #[arg(long, value_delimiter = ',')]
    dead: Vec<u64>,

    /// Target array, `name` or `namespace.name`.
    #[arg(long, default_value = "demo")]
    array: String,

    /// Create a transient array.
    #[arg(long)]
    temp: bool,

    /// Residency string, `servers=<csv>` or `instances=<csv>`.
    #[arg(long, conflicts_with = "instance_list")]
    residency: Option<String>,

    /// Residency as a direct list of instance ids.
    #[arg(long, value_delimiter = ',')]
    instance_list: Vec<u64>,

    /// Redundancy for the default partitioning.
    #[arg(long)]
    redundancy: Option<u32>,

    /// Upper bound on the creation barrier wait.
    #[arg(long)]
    barrier_timeout_ms: Option<u64>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
}

fn load_config(args: &Args) -> Result<ResidencyConfig> {
    let mut config = ResidencyConfig::from_env();

    if let Some(path) = &args.config {
        let file_config = ResidencyConfig::from_toml_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?;
        config.merge(file_config);
    }

    let mut cli = ResidencyConfig::default();
    if let Some(redundancy) = args.redundancy {
        cli.redundancy = redundancy;
    }
    cli.barrier_timeout_ms = args.barrier_timeout_ms;
    config.merge(cli);

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn residency_input(args: &Args) -> Result<ResidencyInput> {
    match (&args.residency, args.instance_list.is_empty()) {
        (Some(spec), _) => Ok(ResidencyInput::StringForm(spec.clone())),
        (None, false) => Ok(ResidencyInput::InstanceList(args.instance_list.clone())),
        (None, true) => bail!("one of --residency or --instance-list is required"),
    }
}

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    if args.servers == 0 {
        bail!("--servers must be positive");
    }

    let config = load_config(&args)?;
    let input = residency_input(&args)?;

    let cluster = SimCluster::with_layout(args.instances, args.servers, config).await?;
    for &id in &args.dead {
        cluster.set_alive(InstanceId(id), false);
    }

    let shape = ArrayShape::new().attribute("value", "double").dimension("i", 0, None, 1_000_000);
    let request = CreateArrayRequest::new(args.array.clone(), shape, args.temp, input);

    let outcomes = match cluster.create_with_residency(request).await {
        Ok(outcomes) => outcomes,
        Err(err) => {
            bail!("create_with_residency failed ({:?}): {err}", err.kind());
        }
    };

    for outcome in &outcomes {
        info!(
            instance = %outcome.instance,
            states = ?outcome.states,
            registered = outcome.registered.is_some(),
            "instance finished"
        );
    }

    let committed = outcomes
        .iter()
        .find_map(|o| o.committed.as_ref())
        .context("coordinator reported no committed schema")?;
    println!("{}", serde_json::to_string_pretty(committed)?);
    Ok(())
}
