use clap::Parser;
use env_logger::Builder;
use log::{error, info, warn, LevelFilter};
use std::error::Error;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;

use windflow::config::DEFAULT_WS_URL;
use windflow::dashboard::core::units::{compass_direction, format_temperature, TemperatureUnit};
use windflow::{
    Dashboard, DashboardUpdate, ReconnectPolicy, StaticSource, StreamClient, StreamConfig,
};

#[derive(Parser, Debug)]
#[command(name = "windflow", about = "Live weather dashboard feed")]
struct Args {
    /// Push-channel endpoint
    #[arg(long, env = "WINDFLOW_WS_URL", default_value = DEFAULT_WS_URL)]
    url: String,

    /// JSON fixture to seed the dashboard with before connecting
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Reconnect with backoff when the connection drops
    #[arg(long)]
    reconnect: bool,

    /// Give up after this many reconnect attempts
    #[arg(long, requires = "reconnect")]
    max_retries: Option<u32>,

    /// Display unit for temperatures (C, F or K)
    #[arg(long, default_value = "C")]
    unit: TemperatureUnit,

    #[arg(long, env = "WINDFLOW_LOG", default_value = "info")]
    log_level: LevelFilter,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let args = Args::parse();

    Builder::new()
        .filter_level(args.log_level)
        .filter_module("windflow", args.log_level.max(LevelFilter::Debug))
        .format(|buf, record| {
            let ts = chrono::Local::now().format("%H:%M:%S%.3f");
            writeln!(
                buf,
                "[{} {:<5} {}] {}",
                ts,
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(env_logger::Target::Stderr)
        .write_style(env_logger::WriteStyle::Always)
        .init();

    info!("Starting Windflow...");

    let reconnect = if args.reconnect {
        ReconnectPolicy::backoff(args.max_retries)
    } else {
        ReconnectPolicy::Never
    };
    let config = StreamConfig::new(args.url.clone()).with_reconnect(reconnect);
    let dashboard = Dashboard::from_config(&config);

    if let Some(path) = &args.seed {
        let raw = tokio::fs::read_to_string(path).await?;
        let source = StaticSource::from_json(&raw)?;
        let report = dashboard.seed_from_source(&source).await?;
        info!("Seeded from {}: {:?}", path.display(), report);
    }

    // Print every change as it lands
    let printer = {
        let mut updates = dashboard.subscribe();
        let unit = args.unit;
        tokio::spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(update) => print_update(&update, unit),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Display fell behind, {} update(s) skipped", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    let mut session = match StreamClient::new(config, dashboard.clone()).connect().await {
        Ok(session) => session,
        Err(e) => {
            error!("WebSocket failed: {}", e);
            return Err(e.into());
        }
    };

    let interrupted = tokio::select! {
        _ = tokio::signal::ctrl_c() => true,
        _ = session.closed() => false,
    };
    if interrupted {
        info!("Received Ctrl+C, shutting down...");
    } else {
        info!("Stream ended in state {:?}", session.state());
    }
    session.close().await;

    printer.abort();
    info!("Windflow stopped");
    Ok(())
}

fn print_update(update: &DashboardUpdate, unit: TemperatureUnit) {
    match update {
        DashboardUpdate::Snapshots(map) => {
            for snapshot in map.values() {
                println!(
                    "{:<16} {:>10} feels {:>10}  {:>3.0}%  {:.1} m/s {:<3}  {}",
                    snapshot.city,
                    format_temperature(snapshot.temperature_c, unit),
                    format_temperature(snapshot.feels_like_c, unit),
                    snapshot.humidity_pct,
                    snapshot.wind_speed_ms,
                    compass_direction(snapshot.wind_degrees),
                    snapshot.condition
                );
            }
        }
        DashboardUpdate::Rollups { city, series } => {
            if let Some(last) = series.last() {
                println!(
                    "{:<16} {} day(s) through {}, avg {} ({})",
                    city,
                    series.len(),
                    last.date,
                    format_temperature(last.avg_temp_c, unit),
                    last.dominant_condition
                );
            }
        }
        DashboardUpdate::Alerts(reconciliation) => {
            for message in &reconciliation.to_notify {
                println!("ALERT  {}", message);
            }
        }
        DashboardUpdate::Connection(state) => info!("Connection: {:?}", state),
        DashboardUpdate::FetchInterval(interval) => {
            info!("Backend polls every {} {}", interval.every, interval.period)
        }
    }
}
