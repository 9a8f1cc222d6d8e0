//! Fixed rate control loop tying the navigator, avoidance and the drive together.

use crate::driver::hub_driver::HubTelemetry;
use crate::driver::{DriveCommand, RoverDriver};
use crate::error::Result;
use crate::geo::GeoPoint;
use crate::lidar::service::DEFAULT_SECTOR_COUNT;
use crate::lidar::LidarService;
use crate::navigation::avoidance::{
    avoidance_command, lidar_avoidance_command, AvoidanceAction, NO_READING_CM,
};
use crate::navigation::{MissionProgress, WaypointNavigator};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::*;

const MISSION_QUEUE_SIZE: usize = 16;

#[derive(Deserialize, Debug, Clone)]
pub struct ControlConfig {
    #[serde(default = "default_rate_hz")]
    pub rate_hz: f64,
    /// Sectors handed to LIDAR avoidance
    #[serde(default = "default_sectors")]
    pub sectors: usize,
}

fn default_rate_hz() -> f64 {
    20.0
}

fn default_sectors() -> usize {
    DEFAULT_SECTOR_COUNT
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            rate_hz: default_rate_hz(),
            sectors: default_sectors(),
        }
    }
}

impl ControlConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate_hz.max(0.1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mode {
    /// Holds the rover still
    Manual,
    Autonomous,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MissionCommand {
    AddWaypoint(GeoPoint),
    ClearWaypoints,
    /// Plans the route and hands control to the navigator
    Start,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlStatus {
    pub mode: Mode,
    pub command: DriveCommand,
    pub action: Option<AvoidanceAction>,
    pub progress: Option<MissionProgress>,
}

impl Default for ControlStatus {
    fn default() -> Self {
        Self {
            mode: Mode::Manual,
            command: DriveCommand::neutral(),
            action: None,
            progress: None,
        }
    }
}

pub struct ControlLoop<D> {
    config: ControlConfig,
    driver: D,
    navigator: WaypointNavigator,
    telemetry: watch::Receiver<HubTelemetry>,
    lidar: Option<LidarService>,
    missions: mpsc::Receiver<MissionCommand>,
    status: watch::Sender<ControlStatus>,
    mode: Mode,
    last_action: Option<AvoidanceAction>,
}

impl<D: RoverDriver> ControlLoop<D> {
    pub fn new(
        config: ControlConfig,
        driver: D,
        navigator: WaypointNavigator,
        telemetry: watch::Receiver<HubTelemetry>,
        lidar: Option<LidarService>,
    ) -> (Self, mpsc::Sender<MissionCommand>) {
        let (mission_sender, missions) = mpsc::channel(MISSION_QUEUE_SIZE);
        let (status, _) = watch::channel(ControlStatus::default());
        let control = Self {
            config,
            driver,
            navigator,
            telemetry,
            lidar,
            missions,
            status,
            mode: Mode::Manual,
            last_action: None,
        };
        (control, mission_sender)
    }

    pub fn status(&self) -> watch::Receiver<ControlStatus> {
        self.status.subscribe()
    }

    /// Runs until cancelled, then stops the motors
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let mut ticker = interval(self.config.period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Control loop running at {} Hz", self.config.rate_hz);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(command) = self.missions.recv() => self.handle_mission(command).await,
                _ = ticker.tick() => self.tick().await,
            }
        }

        info!("Control loop stopping");
        self.driver.stop().await
    }

    async fn handle_mission(&mut self, command: MissionCommand) {
        match command {
            MissionCommand::AddWaypoint(waypoint) => self.navigator.push_waypoint(waypoint),
            MissionCommand::ClearWaypoints => {
                self.enter_manual().await;
                self.navigator.clear_waypoints();
            }
            MissionCommand::Start => {
                if self.navigator.waypoints().is_empty() {
                    warn!("Mission start ignored, no waypoints");
                    return;
                }
                let optimize = self.navigator.config().optimize;
                self.navigator.plan_route(optimize);
                if optimize {
                    let swaps = self.navigator.optimize_route();
                    debug!("2-opt made {} swaps", swaps);
                }
                info!(
                    "Mission started, {} waypoints over {:.1} m",
                    self.navigator.route().len(),
                    self.navigator.total_distance()
                );
                self.mode = Mode::Autonomous;
                self.last_action = None;
            }
            MissionCommand::Abort => {
                info!("Mission aborted");
                self.enter_manual().await;
            }
        }
        self.publish_status(DriveCommand::neutral());
    }

    async fn enter_manual(&mut self) {
        self.mode = Mode::Manual;
        if let Err(err) = self.driver.stop().await {
            error!("Failed to stop rover: {}", err);
        }
    }

    async fn tick(&mut self) {
        let command = match self.mode {
            Mode::Manual => DriveCommand::neutral(),
            Mode::Autonomous => match self.autonomous_command() {
                Some(command) => command,
                None => {
                    info!("Mission complete");
                    self.enter_manual().await;
                    self.publish_status(DriveCommand::neutral());
                    return;
                }
            },
        };
        if let Err(err) = self.driver.send(command).await {
            warn!("Failed to send drive command: {}", err);
        }
        self.publish_status(command);
    }

    /// `None` once the route is finished
    fn autonomous_command(&mut self) -> Option<DriveCommand> {
        let telemetry = self.telemetry.borrow().clone();
        let (Some(position), Some(heading)) = (telemetry.position(), telemetry.heading()) else {
            trace!("Waiting for GPS fix and heading");
            return Some(DriveCommand::neutral());
        };

        self.navigator.update_position(&position);
        if self.navigator.is_complete() {
            return None;
        }
        let proposed = self.navigator.navigation_command(&position, heading);
        if proposed.throttle <= 0 {
            return Some(proposed);
        }
        Some(self.avoid(proposed, &telemetry))
    }

    fn avoid(&mut self, proposed: DriveCommand, telemetry: &HubTelemetry) -> DriveCommand {
        let lidar = self
            .lidar
            .as_ref()
            .filter(|lidar| lidar.health().is_connected() && lidar.latest_scan().is_some());
        let decision = match lidar {
            Some(lidar) => {
                lidar_avoidance_command(&lidar.sector_distances(self.config.sectors), proposed)
            }
            None => avoidance_command(&telemetry.ultrasonic(), NO_READING_CM, proposed),
        };
        if self.last_action != Some(decision.action) {
            if decision.action.is_clear() {
                debug!("Path clear");
            } else {
                info!("Avoiding obstacle: {}", decision.action);
            }
            self.last_action = Some(decision.action);
        }
        decision.command
    }

    fn publish_status(&self, command: DriveCommand) {
        let progress = (self.mode == Mode::Autonomous).then(|| self.navigator.mission_progress());
        self.status.send_replace(ControlStatus {
            mode: self.mode,
            command,
            action: self.last_action,
            progress,
        });
    }
}
