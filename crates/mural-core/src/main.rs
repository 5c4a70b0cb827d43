use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use mural_canvas::{Palette, Point};
use mural_core::roster::{JsonRosterStore, MemoryRoster, RosterStore};
use mural_core::sim::{GradientImage, SimulatedCanvas, SimulatorConfig};
use mural_core::{AgentIdentity, Collaborators, Fleet, FleetConfig};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("mural")
        .version(mural_core::VERSION)
        .about("Cooperative pixel-canvas redraw dispatcher")
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .default_value("info")
                .help("Default log filter (RUST_LOG overrides)"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("simulate")
                .about("Redraw a gradient on an in-process simulated canvas")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("Fleet configuration (TOML); defaults tuned for a quick run"),
                )
                .arg(
                    Arg::new("roster")
                        .long("roster")
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON roster to use instead of generated agents"),
                )
                .arg(
                    Arg::new("agents")
                        .long("agents")
                        .default_value("4")
                        .value_parser(value_parser!(usize))
                        .help("Number of generated agents"),
                )
                .arg(
                    Arg::new("width")
                        .long("width")
                        .default_value("16")
                        .value_parser(value_parser!(u32))
                        .help("Target image width"),
                )
                .arg(
                    Arg::new("height")
                        .long("height")
                        .default_value("16")
                        .value_parser(value_parser!(u32))
                        .help("Target image height"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("server-cooldown-ms")
                        .long("server-cooldown-ms")
                        .default_value("200")
                        .value_parser(value_parser!(u64))
                        .help("Cooldown the simulated service enforces per account"),
                )
                .arg(
                    Arg::new("failure-rate")
                        .long("failure-rate")
                        .default_value("0.0")
                        .value_parser(value_parser!(f64))
                        .help("Probability of a simulated transport failure"),
                )
                .arg(
                    Arg::new("ban")
                        .long("ban")
                        .action(ArgAction::Append)
                        .help("Username the service reports as banned"),
                )
                .arg(
                    Arg::new("unverified")
                        .long("unverified")
                        .action(ArgAction::Append)
                        .help("Username the service refuses as unverified"),
                )
                .arg(
                    Arg::new("timeout-secs")
                        .long("timeout-secs")
                        .default_value("60")
                        .value_parser(value_parser!(u64))
                        .help("Stop after this long even if the image is unfinished"),
                ),
        )
        .subcommand(
            Command::new("check-config")
                .about("Load and validate a fleet configuration")
                .arg(
                    Arg::new("path")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to the TOML configuration"),
                ),
        )
        .subcommand(Command::new("palette").about("Print the reference palette"))
}

fn init_tracing(matches: &ArgMatches) {
    let level = matches
        .get_one::<String>("log-level")
        .map_or("info", String::as_str);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if matches.get_flag("log-json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(&matches);

    match matches.subcommand() {
        Some(("simulate", args)) => simulate(args).await,
        Some(("check-config", args)) => check_config(args).await,
        Some(("palette", _)) => {
            for entry in Palette::reference().iter() {
                println!("{:>2}  {}", entry.index, entry.color);
            }
            Ok(())
        }
        Some((other, _)) => anyhow::bail!("unknown command {other}"),
        None => anyhow::bail!("no command given"),
    }
}

async fn simulate(args: &ArgMatches) -> anyhow::Result<()> {
    let config = match args.get_one::<PathBuf>("config") {
        Some(path) => FleetConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => FleetConfig::new()
            .with_tick_interval(Duration::from_millis(50))
            .with_base_cooldown(Duration::from_millis(250))
            .with_jitter_max(Duration::from_millis(50))
            .with_write_timeout(Duration::from_secs(2))
            .with_target_origin(Point::new(-8, -8)),
    };
    let width = args.get_one::<u32>("width").copied().unwrap_or(16);
    let height = args.get_one::<u32>("height").copied().unwrap_or(16);
    let usernames = |id: &str| -> HashSet<String> {
        args.get_many::<String>(id)
            .map(|names| names.cloned().collect())
            .unwrap_or_default()
    };

    let sim = Arc::new(SimulatedCanvas::new(
        config.tile_layout()?,
        Palette::reference(),
        SimulatorConfig {
            seed: args.get_one::<u64>("seed").copied().unwrap_or(42),
            cooldown_ms: args.get_one::<u64>("server-cooldown-ms").copied().unwrap_or(0),
            transport_failure_rate: args.get_one::<f64>("failure-rate").copied().unwrap_or(0.0),
            banned: usernames("ban"),
            unverified: usernames("unverified"),
            ..SimulatorConfig::default()
        },
    ));

    let roster: Arc<dyn RosterStore> = match args.get_one::<PathBuf>("roster") {
        Some(path) => Arc::new(JsonRosterStore::new(path)),
        None => {
            let agents = args.get_one::<usize>("agents").copied().unwrap_or(4);
            Arc::new(MemoryRoster::new(
                (0..agents)
                    .map(|i| AgentIdentity::new(format!("agent-{i}")))
                    .collect(),
            ))
        }
    };

    let collab = Collaborators {
        feed: sim.clone(),
        writer: sim.clone(),
        sessions: sim.clone(),
        roster,
        image: Arc::new(GradientImage { width, height }),
    };
    let fleet = Fleet::bootstrap(config, collab).await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let deadline = Duration::from_secs(args.get_one::<u64>("timeout-secs").copied().unwrap_or(60));
    let watcher = {
        let canvas = Arc::clone(fleet.canvas());
        let period = fleet.config().tick_interval();
        tokio::spawn(async move {
            let started = Instant::now();
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Interrupted");
                        break;
                    }
                }
                if canvas.is_ready() && canvas.compute_diff().is_empty() {
                    tracing::info!("Target painted in {:?}", started.elapsed());
                    break;
                }
                if started.elapsed() >= deadline {
                    tracing::warn!("Giving up after {:?}", deadline);
                    break;
                }
            }
            let _ = stop_tx.send(true);
        })
    };

    let result = fleet.run(stop_rx).await;
    watcher.abort();
    let stats = result?;

    let remaining = fleet.canvas().compute_diff().len();
    let service = sim.stats();
    println!("Simulation summary:");
    println!("  Target pixels:      {}", fleet.canvas().target().len());
    println!("  Remaining diff:     {remaining}");
    println!("  Ticks:              {}", stats.ticks);
    println!("  Writes issued:      {}", stats.writes);
    println!("  Placed:             {}", stats.successes);
    println!("  Rate limited:       {}", stats.rate_limited);
    println!("  Banned:             {}", stats.banned);
    println!("  Unverified:         {}", stats.unverified);
    println!("  Transport failures: {}", stats.transport_failures);
    println!("  Service rejections: {}", service.rejected);
    println!("  Excluded agents:    {}", fleet.excluded().len());
    Ok(())
}

async fn check_config(args: &ArgMatches) -> anyhow::Result<()> {
    let path = args
        .get_one::<PathBuf>("path")
        .context("missing configuration path")?;
    let config =
        FleetConfig::from_file(path).with_context(|| format!("invalid configuration {}", path.display()))?;
    let layout = config.tile_layout()?;

    println!("Configuration OK: {}", path.display());
    println!("  Tiles:          {}", layout.len());
    println!("  Canvas origin:  {}", layout.canvas_origin());
    println!("  Target origin:  {}", config.target_origin);
    println!("  Tick interval:  {:?}", config.tick_interval());
    println!("  Base cooldown:  {}ms (+ up to {}ms jitter)", config.base_cooldown_ms, config.jitter_max_ms);
    println!("  Write timeout:  {:?}", config.write_timeout());
    println!(
        "  Queue capacity: {}",
        if config.queue_capacity == 0 {
            "growable".to_string()
        } else {
            config.queue_capacity.to_string()
        }
    );

    match JsonRosterStore::new(&config.roster_path).load().await {
        Ok(roster) => println!("  Roster:         {} identities", roster.len()),
        Err(e) => println!("  Roster:         unavailable ({e})"),
    }
    Ok(())
}
