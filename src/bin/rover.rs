use anyhow::Result;
use clap::Parser;
use rover::{
    configuration::AppConfig,
    control::{ControlLoop, MissionCommand},
    driver::hub_driver::HubDriver,
    lidar::Lidar,
    logging,
    navigation::{load_mission, WaypointNavigator},
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::*;

#[derive(Parser, Debug)]
#[command(version, about = "Autonomous rover")]
struct Args {
    /// path to config
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON waypoint list, overrides the configured mission
    #[arg(long)]
    mission: Option<PathBuf>,

    /// Start the mission right after loading it
    #[arg(long)]
    start: bool,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Sets the level of verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbosity: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::setup_tracing_with_format(args.verbosity, args.json_logs);

    let app_config = AppConfig::load_config(&args.config)?;

    let mission = match args.mission.or(app_config.mission.clone()) {
        Some(path) => {
            let waypoints = load_mission(&path)?;
            info!("Loaded {} waypoints from {:?}", waypoints.len(), path);
            Some(waypoints)
        }
        None => None,
    };

    let hub = HubDriver::open(&app_config.hub)?;
    let telemetry = hub.telemetry();

    // nothing fallible may return past this point without stopping the lidar
    let lidar = match Lidar::start(&app_config.lidar, None) {
        Ok(lidar) => Some(lidar),
        Err(err) => {
            warn!("Running without lidar: {}", err);
            None
        }
    };

    let navigator = WaypointNavigator::new(app_config.navigation.clone());
    let (control, missions) = ControlLoop::new(
        app_config.control.clone(),
        hub,
        navigator,
        telemetry,
        lidar.as_ref().map(Lidar::service),
    );
    let status = control.status();
    let cancel = CancellationToken::new();
    let mut control_task = tokio::spawn(control.run(cancel.clone()));

    let startup = async {
        if let Some(waypoints) = mission {
            for waypoint in waypoints {
                missions.send(MissionCommand::AddWaypoint(waypoint)).await?;
            }
            if args.start {
                missions.send(MissionCommand::Start).await?;
            }
        }
        anyhow::Ok(())
    }
    .await;

    let reporter = tokio::spawn(async move {
        let mut report_rate = interval(Duration::from_secs(5));
        loop {
            report_rate.tick().await;
            let status = status.borrow().clone();
            if let Some(progress) = status.progress {
                info!(
                    "Waypoint {}/{}, {:.0}% done, {:.1} m left",
                    progress.current_waypoint,
                    progress.total_waypoints,
                    progress.progress_percent,
                    progress.remaining_distance
                );
            }
        }
    });

    let control_result = if startup.is_ok() {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    error!("Failed to listen for ctrl-c: {}", err);
                }
                info!("Shutting down");
                cancel.cancel();
                (&mut control_task).await
            }
            finished = &mut control_task => finished,
        }
    } else {
        cancel.cancel();
        control_task.await
    };
    reporter.abort();

    let control_result = match control_result {
        Ok(result) => result.map_err(anyhow::Error::from),
        Err(err) => Err(err.into()),
    };
    if let Err(err) = &control_result {
        error!("Control loop failed: {}", err);
    }
    if let Some(lidar) = lidar {
        lidar.shutdown().await;
    }

    startup.and(control_result)
}
