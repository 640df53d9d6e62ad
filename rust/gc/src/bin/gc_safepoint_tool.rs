use cdc_config::{registry::Registry, Configurable};
use cdc_gc::test_upstream::{InMemorySafepointService, TestTimeOracle};
use cdc_gc::{GcManager, GcManagerConfig, Upstream};
use cdc_types::{ChangeFeedId, Timestamp};
use clap::Parser;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
enum GcSafepointCommand {
    /// Drive an owner loop against an in-memory upstream and log how the
    /// service safepoint moves.
    Simulate {
        #[arg(long, default_value = "24")]
        ticks: usize,
        #[arg(long, default_value = "3")]
        changefeeds: usize,
        /// Keep one changefeed stuck at its start ts.
        #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
        with_failed_changefeed: bool,
        /// Wall-clock pause between ticks.
        #[arg(long, value_parser = humantime::parse_duration, default_value = "200ms")]
        tick_interval: Duration,
        /// Upstream time that passes on every tick.
        #[arg(long, value_parser = humantime::parse_duration, default_value = "2h")]
        upstream_time_per_tick: Duration,
        #[arg(long, value_parser = humantime::parse_duration, default_value = "1s")]
        update_interval: Duration,
    },
    /// Decode a timestamp into its physical and logical parts.
    InspectTs {
        #[arg(long)]
        ts: Timestamp,
    },
}

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: GcSafepointCommand,
}

#[derive(Debug)]
struct SimulatedChangefeed {
    id: ChangeFeedId,
    start_ts: Timestamp,
    lag: Duration,
    failed: bool,
}

impl SimulatedChangefeed {
    fn checkpoint(&self, now: Timestamp) -> Timestamp {
        if self.failed {
            return self.start_ts;
        }
        let physical = now.physical_millis().saturating_sub(self.lag.as_millis() as u64);
        Timestamp::compose(physical, 0).max(self.start_ts)
    }
}

#[allow(clippy::too_many_arguments)]
async fn simulate(
    config: &GcManagerConfig,
    cancel: CancellationToken,
    ticks: usize,
    changefeeds: usize,
    with_failed_changefeed: bool,
    tick_interval: Duration,
    upstream_time_per_tick: Duration,
    update_interval: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = InMemorySafepointService::new();
    let oracle = TestTimeOracle::new(Timestamp::from(SystemTime::now()));
    let registry = Registry::new();
    registry.register(Upstream::new(
        Arc::new(service.clone()),
        Arc::new(oracle.clone()),
    ));
    let manager = GcManager::try_from_config(config, &registry)
        .await?
        .with_update_interval(update_interval);

    // Like the storage layer, collect everything older than the gc life
    // time unless a service registration says otherwise.
    let gc_life_time = Duration::from_secs(10 * 60);
    let gc_candidate = |now: Timestamp| {
        Timestamp::compose(
            now.physical_millis()
                .saturating_sub(gc_life_time.as_millis() as u64),
            0,
        )
    };
    service.run_gc(gc_candidate(oracle.now()));

    let start_ts = oracle.now();
    let feeds = (0..changefeeds)
        .map(|i| SimulatedChangefeed {
            id: ChangeFeedId::with_default_namespace(format!("feed-{i}")),
            start_ts,
            lag: Duration::from_secs(30 * (i as u64 + 1)),
            failed: with_failed_changefeed && i == 0,
        })
        .collect::<Vec<_>>();

    for feed in &feeds {
        manager
            .ensure_changefeed_start_ts_safety(&cancel, &feed.id, config.gc_ttl, feed.start_ts)
            .await?;
    }
    manager
        .try_update_gc_safepoint(&cancel, start_ts, true)
        .await?;
    for feed in &feeds {
        manager
            .undo_ensure_changefeed_start_ts_safety(&cancel, &feed.id)
            .await?;
    }

    for tick in 0..ticks {
        if cancel.is_cancelled() {
            break;
        }
        oracle.advance(upstream_time_per_tick);
        let now = oracle.now();

        let mut min_checkpoint = now;
        let mut ignored = Vec::new();
        for feed in &feeds {
            let checkpoint = feed.checkpoint(now);
            if feed.failed && manager.ignore_failed_changefeed(&cancel, checkpoint).await {
                ignored.push(feed.id.to_string());
                continue;
            }
            min_checkpoint = min_checkpoint.min(checkpoint);
        }

        manager
            .try_update_gc_safepoint(&cancel, min_checkpoint, false)
            .await?;
        let gc_safepoint = service.run_gc(gc_candidate(now));
        tracing::info!(
            tick,
            gc_safepoint = %gc_safepoint,
            min_checkpoint = %min_checkpoint,
            safepoint = %manager.last_safepoint().await,
            upstream_calls = service.calls(),
            ignored = ?ignored,
            "Owner tick"
        );
        tokio::time::sleep(tick_interval).await;
    }

    for feed in feeds.iter().filter(|feed| feed.failed) {
        match manager
            .check_stale_checkpoint_ts(&cancel, &feed.id, feed.start_ts)
            .await
        {
            Ok(()) => tracing::info!(changefeed = %feed.id, "Failed changefeed can still resume"),
            Err(err) => tracing::warn!(changefeed = %feed.id, error = %err, "Failed changefeed cannot resume"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config_path {
        Some(path) => GcManagerConfig::load_from_path(path)?,
        None => GcManagerConfig::load()?,
    };
    cdc_tracing::init_otel_tracing(
        &config.service_name,
        &config.otel_filters,
        config.otel_endpoint.as_ref(),
    );

    match args.command {
        GcSafepointCommand::Simulate {
            ticks,
            changefeeds,
            with_failed_changefeed,
            tick_interval,
            upstream_time_per_tick,
            update_interval,
        } => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Received SIGINT, stopping simulation");
                    on_signal.cancel();
                }
            });
            simulate(
                &config,
                cancel,
                ticks,
                changefeeds,
                with_failed_changefeed,
                tick_interval,
                upstream_time_per_tick,
                update_interval,
            )
            .await?;
        }
        GcSafepointCommand::InspectTs { ts } => {
            println!("timestamp: {ts}");
            println!("physical:  {} ms", ts.physical_millis());
            println!("logical:   {}", ts.logical());
            match ts.physical_time() {
                Some(time) => println!("time:      {}", time.to_rfc3339()),
                None => println!("time:      out of range"),
            }
        }
    }
    Ok(())
}
