pub(crate) mod frame;

use tokio::time::Duration;

use crate::common::frame::{Frame, FrameDestination, FramedReader};
use crate::common::phys::PhysLayer;
use crate::decode::{DecodeLevel, PhysDecodeLevel};
use crate::types::UnitId;

// re-export these from tokio-serial so that they can be used in configuration
pub use tokio_serial::{DataBits, FlowControl, Parity, StopBits};

/// Serial port settings
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SerialSettings {
    /// baud rate of the port
    pub baud_rate: u32,
    /// number of data bits per character
    pub data_bits: DataBits,
    /// type of flow control
    pub flow_control: FlowControl,
    /// number of stop bits per character
    pub stop_bits: StopBits,
    /// parity setting
    pub parity: Parity,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 19200,
            data_bits: DataBits::Eight,
            flow_control: FlowControl::None,
            stop_bits: StopBits::One,
            parity: Parity::Even,
        }
    }
}

/// Configuration of an RTU server
pub struct RtuServerConfig {
    /// path of the serial device, e.g. `/dev/ttyUSB0` or `COM3`
    pub path: String,
    /// settings of the serial port
    pub serial_settings: SerialSettings,
    /// unit id this server answers to; frames for other units are dropped
    pub unit_id: UnitId,
}

impl RtuServerConfig {
    /// configuration with default serial settings
    pub fn new(path: &str, unit_id: UnitId) -> Self {
        Self {
            path: path.to_string(),
            serial_settings: SerialSettings::default(),
            unit_id,
        }
    }
}

pub(crate) fn open(config: &RtuServerConfig) -> Result<PhysLayer, std::io::Error> {
    let builder = tokio_serial::new(config.path.as_str(), config.serial_settings.baud_rate)
        .data_bits(config.serial_settings.data_bits)
        .flow_control(config.serial_settings.flow_control)
        .stop_bits(config.serial_settings.stop_bits)
        .parity(config.serial_settings.parity);

    let stream = tokio_serial::SerialStream::open(&builder)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;

    Ok(PhysLayer::new_serial(stream))
}

/// Serial RTU transport: one shared bus, one peer, no connection state
pub(crate) struct RtuTransport {
    phys: PhysLayer,
    reader: FramedReader,
    local: UnitId,
}

impl RtuTransport {
    pub(crate) fn new(phys: PhysLayer, local: UnitId) -> Self {
        Self {
            phys,
            reader: FramedReader::rtu_request(),
            local,
        }
    }

    /// Wait for a complete frame addressed to this unit (or the broadcast
    /// address) within the timeout. CRC mismatches, partial frames, and
    /// timeouts are expected steady-state conditions and yield `None`.
    pub(crate) async fn poll(&mut self, timeout: Duration, decode: DecodeLevel) -> Option<Frame> {
        let result =
            tokio::time::timeout(timeout, self.reader.next_frame(&mut self.phys, decode)).await;

        match result {
            // partial data stays buffered until the next poll
            Err(_elapsed) => None,
            Ok(Ok(frame)) => match frame.header.destination {
                FrameDestination::UnitId(unit_id) if unit_id != self.local => {
                    tracing::debug!("discarding frame for foreign unit id {}", unit_id);
                    None
                }
                _ => Some(frame),
            },
            Ok(Err(err)) => {
                // noise on a shared bus; resync at the next frame boundary
                tracing::debug!("serial receive error: {}", err);
                self.reader.reset();
                None
            }
        }
    }

    pub(crate) async fn reply(&mut self, bytes: &[u8], decode: PhysDecodeLevel) {
        if let Err(err) = self.phys.write(bytes, decode).await {
            tracing::warn!("serial write error: {}", err);
        }
    }

    #[cfg(test)]
    pub(crate) fn new_mock(mock: tokio_test::io::Mock, local: UnitId) -> Self {
        Self::new(PhysLayer::new_mock(mock), local)
    }
}
