// SPDX-License-Identifier: MIT OR Apache-2.0
//! The `skm-scanner` command-line interface.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use skm_crawler::CommitCrawler;
use skm_github::GithubClient;
use skm_parser::{BackendList, CodeParser, TcpBackend, TcpOracle, javascript_parser, python_parser};
use skm_population::{BlobPopulation, FsStore, PostgresRankings, Population as _};
use skm_scanner::{ScanConfig, ScanProgress, Scanner, Watchdog};
use skm_server::{CallbackServer, ServerConfig, sync_handler};
use skm_wire::ClientConfig;

/// Backend parser exchanges can take a while on big files.
const BACKEND_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(
    name = "skm-scanner",
    about = "Scan a user's repositories into a ranked knowledge model",
    version
)]
struct Cli {
    /// Optional TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan every repository of a user and publish the knowledge.
    Scan {
        /// User to scan; defaults to the token's own login.
        #[arg(long)]
        user: Option<String>,
        /// Re-scan even when stored knowledge is current.
        #[arg(long)]
        force: bool,
        /// Also mirror rankings into the relational store.
        #[arg(long)]
        publish_rankings: bool,
    },
    /// Analyze a single repository (no publishing).
    ScanRepo {
        /// Repository as `owner/name`.
        #[arg(long)]
        full_name: String,
        /// Author to attribute; defaults to the token's own login.
        #[arg(long)]
        user: Option<String>,
        /// Keep the clone directory around afterwards.
        #[arg(long)]
        keep_clone: bool,
    },
    /// Analyze a single commit (no publishing).
    ScanCommit {
        /// Repository as `owner/name`.
        #[arg(long)]
        full_name: String,
        /// Commit SHA.
        #[arg(long)]
        sha: String,
        /// Keep the clone directory around afterwards.
        #[arg(long)]
        keep_clone: bool,
    },
    /// Host the callback server (echo handler) for parser-service testing.
    Serve {
        /// Listen address.
        #[arg(long, default_value = "127.0.0.1")]
        address: String,
        /// Listen port.
        #[arg(long)]
        port: u16,
        /// Disable response memoization.
        #[arg(long)]
        no_memoize: bool,
        /// Offload handling to subprocess workers.
        #[arg(long)]
        parallel: bool,
        /// Worker count (defaults to the CPU count).
        #[arg(long)]
        workers: Option<usize>,
        /// Worker idle timeout in seconds.
        #[arg(long, default_value_t = 5)]
        idle_timeout_secs: u64,
        /// Worker subprocess command (parallel mode).
        #[arg(long = "worker-cmd", num_args = 1.., allow_hyphen_values = true)]
        worker_command: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    skm_telemetry::init();
    let cli = Cli::parse();
    let config = ScanConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Scan {
            user,
            force,
            publish_rankings,
        } => {
            let mut scanner = build_scanner(&config)?;
            let user = resolve_user(&mut scanner, user).await?;
            let outcome = scanner.scan_all(&user, force).await?;
            info!(
                user,
                published = outcome.published,
                commits = outcome.commits,
                names = outcome.names,
                "scan complete"
            );
            if publish_rankings && outcome.published {
                mirror_rankings(&config, &user).await?;
            }
        }
        Command::ScanRepo {
            full_name,
            user,
            keep_clone,
        } => {
            let mut scanner = build_scanner(&config)?;
            let user = resolve_user(&mut scanner, user).await?;
            let knowledge = scanner.scan_repo(&user, &full_name, !keep_clone).await?;
            info!(
                full_name,
                names = knowledge.len(),
                health = %scanner.parser_health(),
                "repository scan complete"
            );
        }
        Command::ScanCommit {
            full_name,
            sha,
            keep_clone,
        } => {
            let mut scanner = build_scanner(&config)?;
            let knowledge = scanner.scan_commit(&full_name, &sha, !keep_clone).await?;
            info!(
                full_name,
                sha,
                names = knowledge.len(),
                "commit scan complete"
            );
        }
        Command::Serve {
            address,
            port,
            no_memoize,
            parallel,
            workers,
            idle_timeout_secs,
            worker_command,
        } => {
            let mut server_config = ServerConfig::new(address, port);
            server_config.memoized = !no_memoize;
            server_config.parallel = parallel;
            if let Some(workers) = workers {
                server_config.workers = workers;
            }
            server_config.worker_idle_timeout = Duration::from_secs(idle_timeout_secs);
            server_config.worker_command = worker_command;
            CallbackServer::new(
                server_config,
                sync_handler(|value| Ok(value.to_string())),
            )
            .serve()
            .await?;
        }
    }
    Ok(())
}

fn build_scanner(config: &ScanConfig) -> anyhow::Result<Scanner> {
    let token = config
        .github_token
        .clone()
        .context("a platform token is required (GITHUB_TOKEN or config github_token)")?;
    let api = GithubClient::new(token, config.throttle());
    let crawler = CommitCrawler::new(api, config.clone_config());

    let mut parser = CodeParser::new();
    match connect_backends(&config.python_backends) {
        Ok(backends) => match TcpOracle::connect(&endpoint_config(&config.python_oracle)?) {
            Ok(oracle) => parser.register(Box::new(python_parser(backends, Box::new(oracle)))),
            Err(err) => warn!(error = %err, "python oracle unreachable, python disabled"),
        },
        Err(err) => warn!(error = %err, "python backends unreachable, python disabled"),
    }
    match connect_backends(&config.javascript_backends) {
        Ok(backends) => match TcpOracle::connect(&endpoint_config(&config.javascript_oracle)?) {
            Ok(oracle) => parser.register(Box::new(javascript_parser(backends, Box::new(oracle)))),
            Err(err) => warn!(error = %err, "javascript oracle unreachable, javascript disabled"),
        },
        Err(err) => warn!(error = %err, "javascript backends unreachable, javascript disabled"),
    }

    let population = BlobPopulation::new(FsStore::new(&config.blob_dir), config.knowledge());
    let watchdog = Watchdog::start(config.watchdog_interval(), || {
        // No callback fired for a whole interval: the scan is wedged.
        std::process::exit(42);
    });

    Ok(
        Scanner::new(crawler, parser, Box::new(population), ScanProgress::default())
            .with_watchdog(watchdog),
    )
}

fn connect_backends(endpoints: &[String]) -> anyhow::Result<BackendList> {
    let mut backends: Vec<Box<dyn skm_parser::ParserBackend>> = Vec::new();
    for endpoint in endpoints {
        let client_config = endpoint_config(endpoint)?;
        backends.push(Box::new(
            TcpBackend::connect(endpoint.clone(), &client_config)
                .with_context(|| format!("connecting backend {endpoint}"))?,
        ));
    }
    if backends.is_empty() {
        anyhow::bail!("no backends configured");
    }
    Ok(BackendList::new(backends))
}

fn endpoint_config(endpoint: &str) -> anyhow::Result<ClientConfig> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .with_context(|| format!("endpoint '{endpoint}' is not host:port"))?;
    let port: u16 = port
        .parse()
        .with_context(|| format!("endpoint '{endpoint}' has a bad port"))?;
    Ok(ClientConfig::new(host, port).with_read_timeout(BACKEND_TIMEOUT))
}

/// Explicit `--user` wins; otherwise the token's own login is scanned.
async fn resolve_user(scanner: &mut Scanner, user: Option<String>) -> anyhow::Result<String> {
    match user {
        Some(user) => Ok(user),
        None => Ok(scanner.authorized_login().await?),
    }
}

async fn mirror_rankings(config: &ScanConfig, user: &str) -> anyhow::Result<()> {
    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL is required for --publish-rankings")?;
    let population = BlobPopulation::new(FsStore::new(&config.blob_dir), config.knowledge());
    let stored = population
        .get_user_knowledge(user)
        .await?
        .context("no stored knowledge to rank")?;
    let rankings = population.calculate_rankings(&stored.knowledge).await?;
    let postgres = PostgresRankings::connect(&database_url).await?;
    postgres
        .publish(user, &rankings, config.knowledge_depth)
        .await?;
    info!(user, names = rankings.len(), "rankings mirrored");
    Ok(())
}
