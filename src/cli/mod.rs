/*
* fleet-dispatch command line interface
* -------------------------------------
*
* Command Structure:
* ---------------
* fleet-dispatch
* ├── init [--force]                  // writes config/default.toml
* ├── discover [--host H]... [-o F]   // asks every daemon who it is, saves the cluster
* ├── nodes [filters]                 // lists nodes a filter selects
* └── run [filters] [-e] [-t S] -- CMD ARGS...
*                                     // reserves node(s), runs CMD against one of them
*
* Filters (all given filters must hold; none selects every node):
*   --os linux  --platform windows/amd64  --native  --manager
*   --legacy-controller  --experimental | --stable  --api-version 1.41
*
* `run` sets the chosen node's environment (DOCKER_HOST, ...) on CMD, so
* `fleet-dispatch run --os windows -- docker version` talks to a Windows
* daemon that nobody else is using right now. With --exclusive every
* matching node stays reserved until CMD exits.
*/

use anyhow::{bail, Context as _};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cluster::{Cluster, Predicate};
use crate::config::{generate_default_config, Settings};
use crate::core::discovery::{discover_cluster, host_env, DockerDiscovery};
use crate::core::node::Node;
use crate::core::version::ApiVersion;
use crate::scheduler::{Context, Dispatcher};
use crate::utils::os::current_platform;
use crate::utils::platform::{Os, Platform};

#[derive(Parser, Debug)]
#[command(name = "fleet-dispatch")]
#[command(about = "Run jobs on a fleet of container hosts without stepping on each other", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to $CONFIG_PATH/default + local)
    #[arg(short, long, value_name = "CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Cluster description file (overrides cluster.description_path)
    #[arg(long, value_name = "FILE", global = true)]
    cluster: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate default configuration
    Init {
        #[arg(short, long)]
        force: bool,
    },
    /// Query daemons and write the cluster description
    Discover {
        /// Daemon address, repeatable (defaults to discovery.hosts, then the local daemon)
        #[arg(long = "host", value_name = "HOST")]
        hosts: Vec<String>,
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// List nodes matching the filters
    Nodes {
        #[command(flatten)]
        filter: NodeFilter,
    },
    /// Reserve matching node(s) and run a command against one of them
    Run {
        #[command(flatten)]
        filter: NodeFilter,
        /// Reserve every matching node, not just one
        #[arg(short, long)]
        exclusive: bool,
        /// Give up if no reservation is possible within this many seconds
        #[arg(short, long, value_name = "SECS")]
        timeout: Option<u64>,
        #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

#[derive(Args, Debug, Default, Clone)]
pub struct NodeFilter {
    /// Host or additional platform runs this OS
    #[arg(long)]
    os: Option<String>,
    /// Host or additional platform is exactly os/arch
    #[arg(long, value_name = "OS/ARCH")]
    platform: Option<Platform>,
    /// Supports the platform of this machine
    #[arg(long)]
    native: bool,
    #[arg(long)]
    manager: bool,
    #[arg(long)]
    legacy_controller: bool,
    #[arg(long, conflicts_with = "stable")]
    experimental: bool,
    /// Only nodes without experimental features
    #[arg(long)]
    stable: bool,
    /// API version the node must support
    #[arg(long, value_name = "MAJOR.MINOR")]
    api_version: Option<ApiVersion>,
}

impl NodeFilter {
    pub fn predicate(&self) -> Predicate {
        let mut all = Vec::new();
        if let Some(os) = &self.os {
            all.push(Predicate::SupportsOs(Os::normalize(os)));
        }
        if let Some(platform) = &self.platform {
            all.push(Predicate::SupportsPlatform(platform.clone()));
        }
        if self.native {
            all.push(Predicate::SupportsPlatform(current_platform()));
        }
        if self.manager {
            all.push(Predicate::Manager);
        }
        if self.legacy_controller {
            all.push(Predicate::LegacyController);
        }
        if self.experimental {
            all.push(Predicate::Experimental);
        }
        if self.stable {
            all.push(!Predicate::Experimental);
        }
        if let Some(version) = self.api_version {
            all.push(Predicate::SupportsApiVersion(version));
        }

        if all.is_empty() {
            Predicate::Any
        } else {
            Predicate::all(all)
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let settings = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::new()?,
    };
    init_tracing(&settings.logging.filter);

    let cluster_path = cli
        .cluster
        .clone()
        .unwrap_or_else(|| settings.cluster.description_path.clone());

    match cli.command {
        Commands::Init { force } => handle_init_command(force)?,
        Commands::Discover { hosts, output } => {
            let output = output.unwrap_or(cluster_path);
            handle_discover_command(&settings, hosts, &output).await?;
        }
        Commands::Nodes { filter } => handle_nodes_command(&cluster_path, &filter)?,
        Commands::Run {
            filter,
            exclusive,
            timeout,
            command,
        } => {
            let wait = timeout
                .map(Duration::from_secs)
                .or_else(|| settings.dispatch.wait_timeout());
            handle_run_command(&cluster_path, &filter, exclusive, wait, command).await?;
        }
    }

    Ok(())
}

/// RUST_LOG wins; otherwise the configured filter.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    // a second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Context cancelled on Ctrl-C.
fn install_shutdown_handler() -> Context {
    let ctx = Context::background();
    let on_signal = ctx.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, cancelling"),
            Err(e) => {
                warn!("Failed to listen for Ctrl-C: {}", e);
                return;
            }
        }
        on_signal.cancel();
    });

    ctx
}

fn handle_init_command(force: bool) -> anyhow::Result<()> {
    let config_dir = PathBuf::from("config");
    let target = config_dir.join("default.toml");
    if target.exists() && !force {
        bail!("{} already exists. Use --force to overwrite.", target.display());
    }

    std::fs::create_dir_all(&config_dir)?;
    let config_str = toml::to_string_pretty(&generate_default_config())?;
    std::fs::write(&target, config_str)?;

    println!("{} Default configuration written to {}", "✓".green(), target.display());
    Ok(())
}

async fn handle_discover_command(
    settings: &Settings,
    hosts: Vec<String>,
    output: &Path,
) -> anyhow::Result<()> {
    let hosts = if hosts.is_empty() {
        settings.discovery.hosts.clone()
    } else {
        hosts
    };
    let envs = if hosts.is_empty() {
        info!("No hosts configured, discovering the local daemon");
        vec![Default::default()]
    } else {
        hosts.iter().map(|h| host_env(h)).collect()
    };

    let discovery = DockerDiscovery::new(settings.discovery.timeout_secs);
    let cluster = discover_cluster(&discovery, envs)
        .await
        .context("node discovery failed")?;
    cluster.save(output)?;

    println!(
        "{} Discovered {} node(s) (manager: {}, legacy controller: {}) -> {}",
        "✓".green(),
        cluster.len(),
        yes_no(cluster.has_manager()),
        yes_no(cluster.has_legacy_controller()),
        output.display()
    );
    Ok(())
}

fn handle_nodes_command(cluster_path: &Path, filter: &NodeFilter) -> anyhow::Result<()> {
    let cluster = load_cluster(cluster_path)?;
    let predicate = filter.predicate();

    let nodes = cluster.find_nodes(&predicate);
    println!("{} ({} of {})", "Nodes:".bold(), nodes.len(), cluster.len());
    for node in nodes {
        println!("- {}", describe(&node));
    }
    Ok(())
}

async fn handle_run_command(
    cluster_path: &Path,
    filter: &NodeFilter,
    exclusive: bool,
    wait: Option<Duration>,
    command: Vec<String>,
) -> anyhow::Result<()> {
    let cluster = Arc::new(load_cluster(cluster_path)?);
    let shutdown = install_shutdown_handler();
    let dispatcher = Dispatcher::with_context(shutdown.clone(), cluster);

    let ctx = match wait {
        Some(wait) => shutdown.with_timeout(wait),
        None => shutdown.child(),
    };
    let predicate = filter.predicate();
    info!(?predicate, exclusive, "Dispatching {:?}", command);

    dispatcher
        .run(&ctx, &predicate, exclusive, |_, node| {
            // the wait deadline only bounds the reservation; the command
            // itself runs until it exits or Ctrl-C
            exec_on_node(shutdown.clone(), node, command)
        })
        .await?;
    Ok(())
}

async fn exec_on_node(shutdown: Context, node: Arc<Node>, command: Vec<String>) -> anyhow::Result<()> {
    let (program, args) = command
        .split_first()
        .context("no command given")?;

    println!("{} {} on {}", "→".cyan(), command.join(" "), node.name.bold());
    let mut child = tokio::process::Command::new(program)
        .args(args)
        .envs(&node.env)
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to start {program}"))?;

    let status = tokio::select! {
        status = child.wait() => status?,
        err = shutdown.done() => bail!("{program} interrupted: {err}"),
    };
    if !status.success() {
        bail!("{program} exited with {status}");
    }

    println!("{} {} finished on {}", "✓".green(), program, node.name);
    Ok(())
}

fn load_cluster(path: &Path) -> anyhow::Result<Cluster> {
    Cluster::load(path).with_context(|| {
        format!(
            "cannot read cluster description {} (run `fleet-dispatch discover` first)",
            path.display()
        )
    })
}

fn describe(node: &Node) -> String {
    let mut line = format!("{} [{}", node.name.bold(), node.host_platform);
    for extra in node.supported_platforms.iter().filter(|p| **p != node.host_platform) {
        line.push_str(&format!(", {extra}"));
    }
    line.push_str(&format!(
        "] api {}..{}",
        node.min_api_version, node.max_api_version
    ));
    if node.is_manager {
        line.push_str(&format!(" {}", "manager".green()));
    }
    if node.is_legacy_controller {
        line.push_str(&format!(" {}", "legacy-controller".yellow()));
    }
    if node.experimental {
        line.push_str(&format!(" {}", "experimental".magenta()));
    }
    line
}

fn yes_no(value: bool) -> colored::ColoredString {
    if value {
        "yes".green()
    } else {
        "no".red()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::NodePredicate;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("fleet-dispatch").chain(args.iter().copied())).unwrap()
    }

    fn filter_of(cli: Cli) -> NodeFilter {
        match cli.command {
            Commands::Nodes { filter } | Commands::Run { filter, .. } => filter,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn no_filters_selects_everything() {
        let filter = filter_of(parse(&["nodes"]));
        assert!(matches!(filter.predicate(), Predicate::Any));
        assert!(filter.predicate().matches(&Node::new("anything")));
    }

    #[test]
    fn filters_are_anded() {
        let filter = filter_of(parse(&[
            "nodes",
            "--os",
            "Linux",
            "--manager",
            "--stable",
            "--api-version",
            "1.41",
        ]));
        let predicate = filter.predicate();

        let good = Node::new("good")
            .with_platform(Platform::new("linux", "x86_64"))
            .with_manager(true)
            .with_api_range(ApiVersion::new(1, 12), ApiVersion::new(1, 43));
        assert!(predicate.matches(&good));
        assert!(!predicate.matches(&good.clone().with_experimental(true)));
        assert!(!predicate.matches(&good.clone().with_manager(false)));
        assert!(!predicate.matches(
            &good.with_api_range(ApiVersion::new(1, 12), ApiVersion::new(1, 40))
        ));
    }

    #[test]
    fn bad_api_version_is_rejected() {
        let parsed = Cli::try_parse_from(["fleet-dispatch", "nodes", "--api-version", "1"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn run_takes_trailing_command() {
        let cli = parse(&["run", "--platform", "windows/x86_64", "-e", "--", "docker", "ps", "-a"]);
        match cli.command {
            Commands::Run {
                filter,
                exclusive,
                timeout,
                command,
            } => {
                assert!(exclusive);
                assert_eq!(timeout, None);
                assert_eq!(command, ["docker", "ps", "-a"]);
                assert_eq!(filter.platform, Some(Platform::new("windows", "amd64")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn experimental_and_stable_conflict() {
        let parsed = Cli::try_parse_from(["fleet-dispatch", "nodes", "--experimental", "--stable"]);
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn failing_command_is_a_job_error() {
        let node = Arc::new(Node::new("local"));
        let result = exec_on_node(Context::background(), node, vec!["false".into()]).await;
        #[cfg(unix)]
        assert!(result.unwrap_err().to_string().contains("false exited with"));
        #[cfg(not(unix))]
        assert!(result.is_err());
    }
}
