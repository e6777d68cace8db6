mod cluster;

use clap::{Parser, Subcommand, ValueEnum};
use cluster::ClusterFile;
use keel_core::PodKey;
use keel_scheduler::{Registry, ScheduleResult, Scheduler, SchedulerError, SchedulerProfile};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "keel", about = "Keel workload scheduler")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Place the pending pods of a cluster file and print the decisions
    Simulate {
        /// YAML file with `nodes` and `pods`
        #[arg(long)]
        cluster: PathBuf,
        /// Scheduler profile; the built-in default profile when omitted
        #[arg(long, env = "KEEL_PROFILE")]
        profile: Option<PathBuf>,
        /// Override the profile's Filter/Score parallelism
        #[arg(long)]
        parallelism: Option<usize>,
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Yaml,
}

/// Outcome of one pending pod
#[derive(Debug, Serialize)]
struct Placement {
    pod: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    score: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl Placement {
    fn new(key: &PodKey, outcome: &keel_scheduler::Result<ScheduleResult>) -> Self {
        match outcome {
            Ok(result) => Self {
                pod: key.to_string(),
                node: Some(result.suggested_host.clone()),
                score: result
                    .scores
                    .iter()
                    .find(|s| s.name == result.suggested_host)
                    .map(|s| s.score),
                reason: None,
            },
            Err(e) => Self {
                pod: key.to_string(),
                node: None,
                score: None,
                reason: Some(e.to_string()),
            },
        }
    }
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Simulate {
            cluster,
            profile,
            parallelism,
            output,
        } => run_simulate(&cluster, profile.as_deref(), parallelism, output).await,
    }
}

/// Load the profile, optionally overriding its parallelism
fn load_profile(path: Option<&Path>, parallelism: Option<usize>) -> miette::Result<SchedulerProfile> {
    let mut profile = match path {
        Some(path) => {
            info!("Loading scheduler profile from {}", path.display());
            SchedulerProfile::from_file(path)?
        }
        None => SchedulerProfile::default(),
    };
    if let Some(parallelism) = parallelism {
        profile.parallelism = parallelism;
    }
    Ok(profile)
}

/// Schedule every pending pod of a cluster
async fn simulate(
    cluster: ClusterFile,
    profile: &SchedulerProfile,
    token: &CancellationToken,
) -> miette::Result<Vec<Placement>> {
    let scheduler = Scheduler::new(profile, &Registry::in_tree())?;
    let pending = cluster.load_into(scheduler.cache())?;

    let sweeper_token = token.child_token();
    let sweeper = scheduler.run_sweeper(sweeper_token.clone());
    let outcomes = scheduler.schedule_pending(pending, token).await;

    let cancelled = outcomes
        .iter()
        .any(|(_, r)| matches!(r, Err(SchedulerError::Cancelled { .. })));
    if cancelled {
        warn!("Simulation interrupted before all pods were placed");
    }

    stop_sweeper(&sweeper_token, sweeper).await;
    Ok(outcomes
        .iter()
        .map(|(key, outcome)| Placement::new(key, outcome))
        .collect())
}

/// Cancel the sweeper and wait for its final sweep; false if it did not exit cleanly
async fn stop_sweeper(token: &CancellationToken, handle: JoinHandle<()>) -> bool {
    token.cancel();
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            warn!("Cache sweeper did not shut down cleanly: {}", e);
            false
        }
    }
}

async fn run_simulate(
    cluster_path: &Path,
    profile_path: Option<&Path>,
    parallelism: Option<usize>,
    output: OutputFormat,
) -> miette::Result<()> {
    let profile = load_profile(profile_path, parallelism)?;
    let cluster = ClusterFile::from_file(cluster_path)?;

    let token = CancellationToken::new();
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping");
            ctrl_c_token.cancel();
        }
    });

    let placements = simulate(cluster, &profile, &token).await?;

    match output {
        OutputFormat::Text => {
            for p in &placements {
                match (&p.node, &p.reason) {
                    (Some(node), _) => match p.score {
                        Some(score) => println!("{} -> {} (score {})", p.pod, node, score),
                        None => println!("{} -> {}", p.pod, node),
                    },
                    (None, reason) => {
                        println!("{} unschedulable: {}", p.pod, reason.as_deref().unwrap_or(""))
                    }
                }
            }
        }
        OutputFormat::Yaml => print!("{}", keel_core::to_yaml(&placements)?),
    }

    let placed = placements.iter().filter(|p| p.node.is_some()).count();
    info!("Placed {} of {} pending pods", placed, placements.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CLUSTER: &str = r#"
nodes:
  - metadata:
      name: small
    status:
      allocatable:
        cpu: "1"
        memory: 1Gi
  - metadata:
      name: large
    status:
      allocatable:
        cpu: "8"
        memory: 16Gi
pods:
  - metadata:
      name: api
      namespace: prod
    spec:
      containers:
        - name: app
          resources:
            requests:
              cpu: "2"
              memory: 2Gi
  - metadata:
      name: huge
      namespace: prod
    spec:
      containers:
        - name: app
          resources:
            requests:
              cpu: "64"
              memory: 1Gi
"#;

    fn cluster() -> ClusterFile {
        keel_core::from_yaml(CLUSTER).unwrap()
    }

    #[test]
    fn test_cli_parses_simulate() {
        let cli = Cli::try_parse_from([
            "keel",
            "simulate",
            "--cluster",
            "cluster.yaml",
            "--parallelism",
            "4",
            "--output",
            "yaml",
        ])
        .unwrap();
        assert!(!cli.log_json);
        match cli.command {
            Commands::Simulate {
                cluster,
                parallelism,
                output,
                ..
            } => {
                assert_eq!(cluster, PathBuf::from("cluster.yaml"));
                assert_eq!(parallelism, Some(4));
                assert_eq!(output, OutputFormat::Yaml);
            }
        }
    }

    #[test]
    fn test_load_profile_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"parallelism: 2\n").unwrap();

        let profile = load_profile(Some(file.path()), None).unwrap();
        assert_eq!(profile.parallelism, 2);

        let profile = load_profile(Some(file.path()), Some(8)).unwrap();
        assert_eq!(profile.parallelism, 8);

        let profile = load_profile(None, None).unwrap();
        assert_eq!(profile.parallelism, SchedulerProfile::default().parallelism);
    }

    #[tokio::test]
    async fn test_sweeper_drains_without_cancelling_the_run() {
        let scheduler = Scheduler::new(&SchedulerProfile::default(), &Registry::in_tree()).unwrap();
        let run_token = CancellationToken::new();
        let sweeper_token = run_token.child_token();
        let handle = scheduler.run_sweeper(sweeper_token.clone());

        assert!(stop_sweeper(&sweeper_token, handle).await);
        assert!(!run_token.is_cancelled());
    }

    #[tokio::test]
    async fn test_simulate_places_pending_pods() {
        let placements = simulate(cluster(), &SchedulerProfile::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(placements.len(), 2);
        assert_eq!(placements[0].pod, "prod/api");
        assert_eq!(placements[0].node.as_deref(), Some("large"));
        assert!(placements[0].reason.is_none());

        assert_eq!(placements[1].pod, "prod/huge");
        assert!(placements[1].node.is_none());
        assert!(placements[1]
            .reason
            .as_deref()
            .unwrap()
            .contains("0/2 nodes are available"));
    }
}
