//! parkcoord-sim: run a crowd of visitors through the raft race and the
//! lookout tower and report what happened.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use parkcoord::{
    LookoutTower, Park, ParkConfig, ParkError, ParkEvents, ParkSummary, Placement, RaceEvent,
    RaftRace, SimClock, Slide, TowerEvent, Visitor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Facility {
    Race,
    Tower,
    Both,
}

#[derive(Debug, Parser)]
#[command(name = "parkcoord-sim", about = "Simulate visitors at the raft race and lookout tower")]
struct Args {
    /// Number of visitors to admit.
    #[arg(short, long, default_value_t = 12)]
    visitors: usize,

    /// JSON park configuration. Missing fields take their defaults.
    #[arg(short, long, env = "PARK_CONFIG")]
    config: Option<PathBuf>,

    /// Which facilities each visitor goes to.
    #[arg(short, long, value_enum, default_value_t = Facility::Both)]
    facility: Facility,

    /// Simulated minutes between consecutive visitor arrivals.
    #[arg(long, default_value_t = 1)]
    arrival_gap: u64,

    /// Close the park after this many simulated minutes.
    #[arg(long)]
    close_after: Option<u64>,

    /// Override the real milliseconds per simulated minute.
    #[arg(long)]
    minute_ms: Option<u64>,

    /// Print the summary as JSON on stdout.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct VisitOutcome {
    visitor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    placement: Option<Placement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    slide: Option<Slide>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct Report {
    config: ParkConfig,
    visitors: Vec<VisitOutcome>,
    park: ParkSummary,
}

/// RUST_LOG takes precedence; otherwise PARK_LOG picks the base level.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("PARK_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!(
            "parkcoord={level},parkcoord_sim={level}",
            level = base_level
        ))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn load_config(args: &Args) -> anyhow::Result<ParkConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_json::from_str::<ParkConfig>(&raw)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => ParkConfig::default(),
    };
    if let Some(minute_ms) = args.minute_ms {
        config.clock = config.clock.with_minute_ms(minute_ms);
    }
    config.validate().context("invalid park configuration")?;
    Ok(config)
}

async fn visit(
    visitor: &Visitor,
    race: Option<&RaftRace>,
    tower: Option<&LookoutTower>,
) -> Result<(Option<Placement>, Option<Slide>), ParkError> {
    let placement = match race {
        Some(race) => race.visit(visitor).await?,
        None => None,
    };
    let slide = match tower {
        Some(tower) => tower.visit(visitor).await?,
        None => None,
    };
    Ok((placement, slide))
}

fn log_race_event(event: RaceEvent) {
    match event {
        RaceEvent::PhaseChanged { from, to } => {
            tracing::debug!(from = from.as_str(), to = to.as_str(), "Bag phase changed");
        }
        RaceEvent::HeatStarted { heat } => tracing::debug!(heat, "Heat started"),
        RaceEvent::Finished {
            heat,
            visitor,
            raft,
            placement,
        } => {
            tracing::debug!(heat, %visitor, %raft, ?placement, "Crossed the finish line");
        }
        RaceEvent::HeatCompleted(result) => {
            tracing::info!(
                heat = result.heat,
                launched = result.launched,
                partial = result.partial,
                winner = result.winner.as_deref().unwrap_or("-"),
                "Heat completed"
            );
        }
    }
}

fn log_tower_event(event: TowerEvent) {
    match event {
        TowerEvent::StairEntered { visitor, on_stair } => {
            tracing::debug!(%visitor, on_stair, "Stair entered");
        }
        TowerEvent::TurnedAway { visitor } => tracing::debug!(%visitor, "Turned away"),
        TowerEvent::PlatformEntered {
            visitor,
            on_platform,
        } => {
            tracing::debug!(%visitor, on_platform, "Platform entered");
        }
        TowerEvent::SlideAssigned { slide } => tracing::debug!(%slide, "Slide assigned"),
        TowerEvent::DescentStarted { visitor, slide } => {
            tracing::debug!(%visitor, %slide, "Descent started");
        }
        TowerEvent::DescentFinished { visitor, slide } => {
            tracing::debug!(%visitor, %slide, "Descent finished");
        }
    }
}

fn print_text(report: &Report) {
    println!("visitors:");
    for outcome in &report.visitors {
        let placement = outcome
            .placement
            .map(|p| format!("{p:?}"))
            .unwrap_or_else(|| "-".to_string());
        let slide = outcome
            .slide
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        match &outcome.error {
            Some(error) => println!("  {:<6} {error}", outcome.visitor),
            None => println!("  {:<6} race={placement:<12} slide={slide}", outcome.visitor),
        }
    }
    println!("heats:");
    for heat in &report.park.heats {
        println!(
            "  #{} launched={} partial={} winner={} raft={}",
            heat.heat,
            heat.launched,
            heat.partial,
            heat.winner.as_deref().unwrap_or("-"),
            heat.winning_raft
                .map(|r| r.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    let tower = &report.park.tower;
    println!(
        "tower: stair peak {}/{} platform peak {}/{} descents A={} B={}",
        tower.stair.peak(),
        tower.stair.capacity(),
        tower.platform.peak(),
        tower.platform.capacity(),
        tower.descents[0],
        tower.descents[1],
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();
    let config = load_config(&args)?;
    let clock = SimClock::new(config.clock);

    let (race_tx, mut race_rx) = mpsc::unbounded_channel();
    let (tower_tx, mut tower_rx) = mpsc::unbounded_channel();
    let race_log = tokio::spawn(async move {
        while let Some(event) = race_rx.recv().await {
            log_race_event(event);
        }
    });
    let tower_log = tokio::spawn(async move {
        while let Some(event) = tower_rx.recv().await {
            log_tower_event(event);
        }
    });

    let park = Park::start(
        config,
        ParkEvents {
            race: Some(race_tx),
            tower: Some(tower_tx),
        },
    )?;
    park.open();
    tracing::info!(visitors = args.visitors, facility = ?args.facility, "Park open");

    let closing_time = args.close_after.map(|minutes| {
        let race = park.race();
        let tower = park.tower();
        tokio::spawn(async move {
            clock.sleep_minutes(minutes).await;
            tracing::info!(minutes, "Closing time");
            race.close();
            tower.close();
        })
    });

    let interrupt = CancellationToken::new();
    let handles: Vec<_> = (0..args.visitors)
        .map(|i| {
            let visitor = Visitor::with_parent(format!("V{i}"), &interrupt);
            let race = matches!(args.facility, Facility::Race | Facility::Both).then(|| park.race());
            let tower =
                matches!(args.facility, Facility::Tower | Facility::Both).then(|| park.tower());
            let arrival = args.arrival_gap.saturating_mul(i as u64);
            tokio::spawn(async move {
                clock.sleep_minutes(arrival).await;
                let result = visit(&visitor, race.as_deref(), tower.as_deref()).await;
                (visitor, result)
            })
        })
        .collect();

    let visits = join_all(handles);
    tokio::pin!(visits);
    let joined = tokio::select! {
        joined = &mut visits => joined,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted - abandoning every visit");
            interrupt.cancel();
            visits.await
        }
    };

    let mut outcomes = Vec::with_capacity(joined.len());
    for join in joined {
        let (visitor, result) = join.context("visitor task panicked")?;
        let outcome = match result {
            Ok((placement, slide)) => VisitOutcome {
                visitor: visitor.name().to_string(),
                placement,
                slide,
                error: None,
            },
            Err(e) => {
                if e.is_abandoned() {
                    tracing::info!(%visitor, "Visit abandoned");
                } else {
                    tracing::warn!(%visitor, error = %e, "Visit cut short");
                }
                VisitOutcome {
                    visitor: visitor.name().to_string(),
                    placement: None,
                    slide: None,
                    error: Some(e.to_string()),
                }
            }
        };
        outcomes.push(outcome);
    }

    if let Some(task) = closing_time {
        task.abort();
        let _ = task.await;
    }
    let config = park.config().clone();
    let summary = park.shutdown().await;
    // Every sender is gone once the park and its tasks are dropped.
    let _ = race_log.await;
    let _ = tower_log.await;

    let report = Report {
        config,
        visitors: outcomes,
        park: summary,
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_text(&report);
    }
    Ok(())
}
