use super::assembler::{ScanAssembler, ScanObserver};
use super::health::SharedHealth;
use super::protocol::{contains_health_reply, count_plausible_samples, FrameDecoder, LidarCommand};
use super::recovery::{RecoverySupervisor, RecoveryTier};
use super::scan::LidarScan;
use super::transport::LidarTransport;
use super::LidarConfig;
use crate::error::{Result, RoverError};
use crate::util::LatestSender;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::*;

const READ_BUFFER_SIZE: usize = 4096;
const ERROR_BACKOFF: Duration = Duration::from_millis(100);
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// Read, decode, assemble and recover loop.
///
/// Runs on a single task that owns the transport for its whole life.
pub struct LidarDriver<T> {
    transport: T,
    decoder: FrameDecoder,
    assembler: ScanAssembler,
    supervisor: RecoverySupervisor,
    read_timeout: Duration,
    read_buffer: Vec<u8>,
    cancel: CancellationToken,
}

impl<T: LidarTransport> LidarDriver<T> {
    pub fn new(
        transport: T,
        config: &LidarConfig,
        publisher: LatestSender<Arc<LidarScan>>,
        observer: Option<Box<dyn ScanObserver>>,
        health: SharedHealth,
        cancel: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        Self {
            transport,
            decoder: FrameDecoder::new(),
            assembler: ScanAssembler::new(config.assembler.clone(), publisher, observer, now),
            supervisor: RecoverySupervisor::new(config.recovery.clone(), health),
            read_timeout: config.read_timeout(),
            read_buffer: vec![0; READ_BUFFER_SIZE],
            cancel,
        }
    }

    pub async fn run(mut self) {
        info!("Lidar driver running on {}", self.transport.port_name());
        if let Err(err) = self.transport.send_command(LidarCommand::StartScan).await {
            warn!("Failed to start lidar scanning: {}", err);
        }
        self.supervisor.connected(Instant::now());

        let cancel = self.cancel.clone();
        loop {
            if let Some(tier) = self.supervisor.poll(Instant::now()) {
                let recovered = tokio::select! {
                    _ = cancel.cancelled() => break,
                    recovered = self.recover(tier) => recovered,
                };
                self.supervisor.report(tier, recovered, Instant::now());
                continue;
            }

            let read = tokio::select! {
                _ = cancel.cancelled() => break,
                read = timeout(self.read_timeout, self.transport.read(&mut self.read_buffer)) => read,
            };
            match read {
                Ok(Ok(0)) => {
                    self.supervisor.record_read(0);
                    sleep(IDLE_BACKOFF).await;
                }
                Ok(Ok(bytes_read)) => {
                    self.supervisor.record_read(bytes_read);
                    self.ingest(bytes_read, Instant::now());
                }
                Ok(Err(RoverError::PortClosed)) => {
                    self.supervisor.record_read(0);
                    trace!("Lidar port closed, waiting for recovery");
                    sleep(ERROR_BACKOFF).await;
                }
                Ok(Err(err)) => {
                    self.supervisor.record_read(0);
                    warn!("Lidar read failed: {}", err);
                    sleep(ERROR_BACKOFF).await;
                }
                // read timeout
                Err(_) => self.supervisor.record_read(0),
            }
        }

        self.shutdown().await;
    }

    fn ingest(&mut self, bytes_read: usize, now: Instant) {
        let Self {
            decoder,
            assembler,
            supervisor,
            read_buffer,
            ..
        } = self;
        for packet in decoder.feed(&read_buffer[..bytes_read]) {
            if assembler.push(packet, now).is_some() {
                supervisor.record_scan(now, assembler.scans_per_second());
            }
        }
    }

    async fn recover(&mut self, tier: RecoveryTier) -> bool {
        let steps = match tier {
            RecoveryTier::Restart => self.restart_scanning().await,
            RecoveryTier::Reopen => self.reopen_port().await,
            RecoveryTier::PowerCycle => self.power_cycle_device().await,
        };
        if let Err(err) = steps {
            warn!("Lidar {} failed: {}", tier, err);
            return false;
        }
        self.verify_streaming().await
    }

    async fn restart_scanning(&mut self) -> Result<()> {
        let config = self.supervisor.config().clone();
        self.transport.send_command(LidarCommand::StopScan).await?;
        sleep(config.command_pause()).await;
        self.probe_health().await;
        self.transport.clear_buffers()?;
        self.transport.send_command(LidarCommand::StartScan).await?;
        sleep(config.spin_up()).await;
        Ok(())
    }

    async fn reopen_port(&mut self) -> Result<()> {
        let config = self.supervisor.config().clone();
        // the old handle may already be unusable
        for command in [LidarCommand::StopScan, LidarCommand::SoftReboot] {
            if let Err(err) = self.transport.send_command(command).await {
                debug!("{:?} before reopen failed: {}", command, err);
            }
            sleep(config.command_pause()).await;
        }
        self.transport.reopen().await?;
        self.transport.set_control_lines()?;
        self.probe_health().await;
        self.transport.send_command(LidarCommand::StartScan).await?;
        sleep(config.spin_up()).await;
        Ok(())
    }

    async fn power_cycle_device(&mut self) -> Result<()> {
        if !self.transport.can_power_cycle() {
            return Err(RoverError::PowerControlUnavailable(
                self.transport.port_name().into(),
            ));
        }
        let config = self.supervisor.config().clone();
        self.transport.power_cycle().await?;
        self.transport
            .wait_for_device(config.device_wait_attempts, config.device_wait_interval())
            .await?;
        self.transport.reopen().await?;
        self.transport.send_command(LidarCommand::StartScan).await?;
        sleep(config.spin_up()).await;
        Ok(())
    }

    /// Sends a health query and waits briefly for the reply marker
    async fn probe_health(&mut self) -> bool {
        if let Err(err) = self.transport.send_command(LidarCommand::HealthQuery).await {
            warn!("Health query failed: {}", err);
            return false;
        }
        let deadline = Instant::now() + self.supervisor.config().probe_timeout();
        let mut reply = Vec::new();
        loop {
            match timeout_at(deadline, self.transport.read(&mut self.read_buffer)).await {
                Ok(Ok(0)) => sleep(IDLE_BACKOFF).await,
                Ok(Ok(bytes_read)) => {
                    reply.extend_from_slice(&self.read_buffer[..bytes_read]);
                    if contains_health_reply(&reply) {
                        debug!("Lidar answered health query");
                        return true;
                    }
                }
                Ok(Err(err)) => {
                    debug!("Read during health probe failed: {}", err);
                    sleep(ERROR_BACKOFF).await;
                }
                Err(_) => break,
            }
            if Instant::now() >= deadline {
                break;
            }
        }
        warn!("{}", RoverError::HealthProbeFailed);
        false
    }

    /// Reads for a bounded window, counting in-range samples without checksums
    async fn verify_streaming(&mut self) -> bool {
        let config = self.supervisor.config().clone();
        let deadline = Instant::now() + config.verify_window();
        let mut window = Vec::new();
        let mut plausible = 0;
        while Instant::now() < deadline {
            match timeout_at(deadline, self.transport.read(&mut self.read_buffer)).await {
                Ok(Ok(0)) => sleep(IDLE_BACKOFF).await,
                Ok(Ok(bytes_read)) => {
                    window.extend_from_slice(&self.read_buffer[..bytes_read]);
                    plausible = count_plausible_samples(&window);
                    if plausible > config.verify_min_samples {
                        break;
                    }
                }
                Ok(Err(err)) => {
                    debug!("Read during verification failed: {}", err);
                    sleep(ERROR_BACKOFF).await;
                }
                Err(_) => break,
            }
        }

        if plausible > config.verify_min_samples {
            info!("Lidar streaming again, {} plausible samples", plausible);
            self.decoder.clear();
            self.assembler.reset(Instant::now());
            true
        } else {
            debug!("Verification saw only {} plausible samples", plausible);
            false
        }
    }

    async fn shutdown(&mut self) {
        match timeout(
            self.supervisor.config().command_pause(),
            self.transport.send_command(LidarCommand::StopScan),
        )
        .await
        {
            Ok(Ok(())) => debug!("Lidar motor stopped"),
            Ok(Err(err)) => warn!("Failed to stop lidar on shutdown: {}", err),
            Err(_) => warn!("Stopping lidar timed out"),
        }
        self.transport.close();
        self.supervisor.disconnected();
        info!("Lidar driver stopped");
    }
}
