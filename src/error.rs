use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, RoverError>;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum RoverError {
    #[error("failed opening serial port {port}: {source}")]
    FailedOpeningSerialPort {
        port: String,
        #[source]
        source: tokio_serial::Error,
    },
    #[error("serial control failed: {0}")]
    SerialControl(#[from] tokio_serial::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial port is not open")]
    PortClosed,
    #[error("serial device not found")]
    DeviceNotFound,
    #[error("no power control available for {0:?}")]
    PowerControlUnavailable(PathBuf),
    #[error("health probe got no valid reply")]
    HealthProbeFailed,
    #[error("failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("communication with sensor hub failed")]
    HubCommError,
}
