use anyhow::Result;
use clap::Parser;
use rover::{
    configuration::AppConfig,
    lidar::{ChannelObserver, Lidar, LidarConfig, LidarScan, LidarService},
    logging,
    navigation::avoidance::find_best_escape_direction,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::*;

#[derive(Parser, Debug)]
#[command(version, about = "Prints LIDAR scans and link health")]
struct Args {
    /// Serial port, auto detected when omitted
    #[arg(long)]
    port: Option<String>,

    /// path to config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop the motor and exit
    #[arg(long)]
    stop: bool,

    #[arg(long, default_value_t = 8)]
    sectors: usize,

    /// Print every scan as JSON
    #[arg(long)]
    json: bool,

    /// Sets the level of verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbosity: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::setup_tracing(args.verbosity);

    let mut lidar_config = if args.config.is_some() {
        AppConfig::load_config(&args.config)?.lidar
    } else {
        LidarConfig::default()
    };
    if let Some(port) = args.port {
        lidar_config.port = Some(port);
    }

    if args.stop {
        Lidar::stop_motor(&lidar_config).await?;
        info!("Lidar motor stopped");
        return Ok(());
    }

    let (sender, mut scans) = mpsc::channel(4);
    let lidar = Lidar::start(&lidar_config, Some(Box::new(ChannelObserver::new(sender))))?;
    let service = lidar.service();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            scan = scans.recv() => {
                let Some(scan) = scan else {
                    break;
                };
                if args.json {
                    println!("{}", serde_json::to_string(&scan.to_message())?);
                } else {
                    print_scan(&scan, &service, args.sectors);
                }
            }
        }
    }

    lidar.shutdown().await;
    Ok(())
}

fn print_scan(scan: &Arc<LidarScan>, service: &LidarService, sector_count: usize) {
    let health = service.health();
    println!(
        "{} points at {:.1} Hz, {} scans/s, link {}",
        scan.points().len(),
        scan.frequency_hz(),
        service.scans_per_second(),
        health.state
    );
    let cloud = service.point_cloud();
    if !cloud.is_empty() {
        let (min_x, max_x, min_y, max_y) = cloud.iter().fold(
            (f32::MAX, f32::MIN, f32::MAX, f32::MIN),
            |(min_x, max_x, min_y, max_y), point| {
                (
                    min_x.min(point.x),
                    max_x.max(point.x),
                    min_y.min(point.y),
                    max_y.max(point.y),
                )
            },
        );
        println!(
            "extent x {:.2}..{:.2} m, y {:.2}..{:.2} m",
            min_x, max_x, min_y, max_y
        );
    }
    if let Some(closest) = scan.closest_point() {
        println!(
            "closest {} mm at {:.1}°",
            closest.distance_mm, closest.angle
        );
    }
    let sectors = scan.sectors(sector_count);
    for sector in &sectors {
        println!(
            "  {:>5.1}°..{:>5.1}°  min {:>7.0}  avg {:>7.0}  n {}",
            sector.angle_start,
            sector.angle_end,
            sector.min_distance,
            sector.avg_distance,
            sector.point_count
        );
    }
    if let Some(escape) = find_best_escape_direction(&sectors) {
        println!(
            "most open {:.1}° ({:.0} mm)",
            escape.angle, escape.avg_distance
        );
    }
}
