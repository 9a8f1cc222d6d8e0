pub mod hub_driver;

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Largest magnitude of either axis
pub const COMMAND_LIMIT: i32 = 100;
/// The hub expects thousandths, commands are percent
const WIRE_SCALE: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DriveCommand {
    /// Percent, negative drives backwards
    pub throttle: i32,
    /// Percent, negative turns left
    pub steering: i32,
}

impl DriveCommand {
    pub fn new(throttle: i32, steering: i32) -> Self {
        Self {
            throttle: throttle.clamp(-COMMAND_LIMIT, COMMAND_LIMIT),
            steering: steering.clamp(-COMMAND_LIMIT, COMMAND_LIMIT),
        }
    }

    pub fn neutral() -> Self {
        Self::default()
    }

    pub fn is_neutral(&self) -> bool {
        *self == Self::neutral()
    }
}

/// Line commands understood by the sensor hub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireCommand {
    Move(DriveCommand),
    Stop,
}

impl WireCommand {
    pub fn encode(&self) -> String {
        match self {
            WireCommand::Move(command) => format!(
                "MOVE:{},{}\n",
                command.throttle * WIRE_SCALE,
                command.steering * WIRE_SCALE
            ),
            WireCommand::Stop => "STOP\n".to_owned(),
        }
    }
}

#[async_trait]
pub trait RoverDriver: Send {
    async fn send(&mut self, command: DriveCommand) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;
}
