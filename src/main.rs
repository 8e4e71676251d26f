use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use picoroute::common::{Network, Session};
use picoroute::config::link::{parse_share_links, to_share_links, LinkImport};
use picoroute::config::subscription::SubscriptionFetcher;
use picoroute::config::{load_config, save_config, Config};
use picoroute::router::geo::GeoData;
use picoroute::router::Router;

#[derive(Parser, Debug)]
#[command(name = "picoroute", version, about = "Routing table tools for the proxy engine config")]
struct Cli {
    /// Fallback log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate a config, printing warnings
    Check { config: PathBuf },
    /// Show which outbound a connection would take
    Route {
        config: PathBuf,
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        ip: Option<IpAddr>,
        #[arg(long, default_value_t = 443)]
        port: u16,
        #[arg(long, default_value = "tcp")]
        network: String,
        #[arg(long)]
        inbound: Option<String>,
        /// Sniffed protocol (http, tls, bittorrent, ...)
        #[arg(long)]
        protocol: Option<String>,
        #[arg(long)]
        source: Option<SocketAddr>,
        /// GeoIP dataset (.mmdb, or `CC cidr` text table)
        #[arg(long)]
        geoip: Option<PathBuf>,
        /// Directory of GeoSite category lists
        #[arg(long)]
        geosite: Option<PathBuf>,
    },
    /// Print the share link of every outbound that has one
    Links { config: PathBuf },
    /// Append outbounds from share links (a file, `-` for stdin, or --url)
    Import {
        config: PathBuf,
        source: Option<PathBuf>,
        #[arg(long, conflicts_with = "source")]
        url: Option<String>,
        /// Save the result back to the config file
        #[arg(long)]
        write: bool,
    },
    /// Wire or unwire the engine's metrics endpoint
    Metrics {
        #[command(subcommand)]
        action: MetricsAction,
    },
}

#[derive(Subcommand, Debug)]
enum MetricsAction {
    Enable {
        config: PathBuf,
        /// Port for the metrics inbound; a free one is picked when omitted
        #[arg(long)]
        port: Option<u16>,
    },
    Disable {
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    match cli.command {
        Command::Check { config } => check(&config),
        Command::Route {
            config,
            domain,
            ip,
            port,
            network,
            inbound,
            protocol,
            source,
            geoip,
            geosite,
        } => {
            let network: Network = network.parse().map_err(anyhow::Error::msg)?;
            let mut session = Session::new(network, port);
            if let Some(d) = domain.as_deref() {
                session = session.with_domain(d);
            }
            if let Some(ip) = ip {
                session = session.with_ip(ip);
            }
            if let Some(tag) = inbound.as_deref() {
                session = session.with_inbound(tag);
            }
            if let Some(p) = protocol.as_deref() {
                session = session.with_protocol(p);
            }
            if let Some(src) = source {
                session = session.with_source(src);
            }
            if session.domain.is_none() && session.ip.is_none() {
                bail!("one of --domain or --ip is required");
            }
            let geo = GeoData::load(geoip.as_deref(), geosite.as_deref())?;
            route(&config, geo, &session)
        }
        Command::Links { config } => {
            let config = load_config(&config)?;
            for link in to_share_links(&config.outbounds) {
                println!("{}", link);
            }
            Ok(())
        }
        Command::Import {
            config,
            source,
            url,
            write,
        } => import(&config, source.as_deref(), url.as_deref(), write).await,
        Command::Metrics { action } => metrics(action),
    }
}

fn check(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let diags = config.diagnostics();
    for d in diags.warnings() {
        println!("{}", d);
    }
    println!(
        "ok: {} inbounds, {} outbounds, {} rules, {} balancers",
        config.inbounds.len(),
        config.outbounds.len(),
        config.routing.rules.len(),
        config.routing.balancers.len()
    );
    Ok(())
}

fn route(path: &Path, geo: GeoData, session: &Session) -> Result<()> {
    let config = load_config(path)?;
    let router = Router::new(&config, geo)?;
    let decision = router.route(session)?;
    let out = json!({
        "destination": session.to_string(),
        "outbound": decision.outbound,
        "rule": decision.rule,
        "ruleIndex": decision.rule_index,
        "balancer": decision.balancer,
        "deferredStrategy": decision.deferred.map(|s| s.as_str()),
        "viaFallback": decision.via_fallback,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn import(path: &Path, source: Option<&Path>, url: Option<&str>, write: bool) -> Result<()> {
    let mut config = load_config(path)?;
    let LinkImport { outbounds, failures } = match (source, url) {
        (_, Some(url)) => {
            let fetcher = SubscriptionFetcher::new(Duration::from_secs(30))?;
            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c.cancel();
                }
            });
            fetcher.fetch(url, &cancel).await?
        }
        (Some(p), None) if p.as_os_str() == "-" => {
            parse_share_links(&std::io::read_to_string(std::io::stdin())?)
        }
        (Some(p), None) => parse_share_links(
            &std::fs::read_to_string(p).with_context(|| format!("failed to read {}", p.display()))?,
        ),
        (None, None) => bail!("give a links file, `-`, or --url"),
    };

    for f in &failures {
        eprintln!("line {}: {} ({})", f.line, f.error, f.text);
    }
    for ob in &outbounds {
        println!("{}\t{}", ob.tag, ob.protocol());
    }
    info!(imported = outbounds.len(), failed = failures.len(), "import finished");

    if write {
        config.outbounds.extend(outbounds);
        save_config(&config, path)?;
    }
    Ok(())
}

fn metrics(action: MetricsAction) -> Result<()> {
    match action {
        MetricsAction::Enable { config: path, port } => {
            let mut config: Config = load_config(&path)?;
            let port = match port {
                Some(p) => {
                    config.enable_metrics_on(p)?;
                    config.metrics_port().unwrap_or(p)
                }
                None => config.enable_metrics()?,
            };
            save_config(&config, &path)?;
            println!("{}", picoroute::config::metrics::metrics_endpoint(port));
        }
        MetricsAction::Disable { config: path } => {
            let mut config: Config = load_config(&path)?;
            config.disable_metrics();
            save_config(&config, &path)?;
        }
    }
    Ok(())
}
