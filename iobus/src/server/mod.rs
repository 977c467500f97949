pub(crate) mod request;
pub(crate) mod response;

use tokio::time::Duration;

use crate::common::cursor::ReadCursor;
use crate::common::frame::{FrameWriter, FunctionField};
use crate::common::function::FunctionCode;
use crate::decode::DecodeLevel;
use crate::exception::ExceptionCode;
use crate::server::request::{Request, RequestDisplay};
use crate::table::RegisterTable;
use crate::tcp::server::ConnectionPool;
use crate::tcp::TcpServerConfig;

#[cfg(feature = "serial")]
use crate::serial::{RtuServerConfig, RtuTransport};

enum Transport {
    Tcp(ConnectionPool),
    #[cfg(feature = "serial")]
    Rtu(RtuTransport),
}

/// The server engine: owns the register table, the transport, and the frame
/// writer. Constructed once at process start and driven by the host loop.
///
/// The engine is single-threaded and cooperative. Each call to
/// [`Server::process`] performs one bounded transport poll and services at
/// most one request before returning, so the caller can interleave its own
/// periodic work (status indication, liveness signalling) on a fixed cadence.
pub struct Server {
    table: RegisterTable,
    transport: Transport,
    writer: FrameWriter,
    decode: DecodeLevel,
}

impl Server {
    /// bind a TCP listener and serve the table over a fixed pool of
    /// round-robin connections
    pub async fn bind_tcp(
        table: RegisterTable,
        config: TcpServerConfig,
    ) -> Result<Self, std::io::Error> {
        let pool = ConnectionPool::bind(config).await?;
        Ok(Self {
            table,
            transport: Transport::Tcp(pool),
            writer: FrameWriter::tcp(),
            decode: DecodeLevel::nothing(),
        })
    }

    /// open a serial port and serve the table over Modbus RTU
    #[cfg(feature = "serial")]
    pub fn open_rtu(table: RegisterTable, config: RtuServerConfig) -> Result<Self, std::io::Error> {
        let phys = crate::serial::open(&config)?;
        Ok(Self {
            table,
            transport: Transport::Rtu(RtuTransport::new(phys, config.unit_id)),
            writer: FrameWriter::rtu(),
            decode: DecodeLevel::nothing(),
        })
    }

    /// local address of the TCP listener, when serving TCP
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        match &self.transport {
            Transport::Tcp(pool) => pool.local_addr().ok(),
            #[cfg(feature = "serial")]
            Transport::Rtu(_) => None,
        }
    }

    /// control how much of the protocol traffic is logged
    pub fn set_decode_level(&mut self, decode: DecodeLevel) {
        self.decode = decode;
    }

    /// the register table owned by this server
    pub fn table(&self) -> &RegisterTable {
        &self.table
    }

    /// mutable access to the register table, for collaborator updates between
    /// polls
    pub fn table_mut(&mut self) -> &mut RegisterTable {
        &mut self.table
    }

    /// Run one cycle: poll the transport for at most one pending request
    /// within `timeout`, and answer it with a response or an exception
    /// response. Returns true if a frame was consumed.
    ///
    /// Nothing here is fatal: transport noise is dropped, protocol violations
    /// are answered with exceptions, and connectivity failures are recovered
    /// by recycling the affected connection.
    pub async fn process(&mut self, timeout: Duration) -> bool {
        let decode = self.decode;

        let frame = match &mut self.transport {
            Transport::Tcp(pool) => pool.poll(timeout, decode).await,
            #[cfg(feature = "serial")]
            Transport::Rtu(rtu) => rtu.poll(timeout, decode).await,
        };

        let frame = match frame {
            Some(x) => x,
            None => return false,
        };

        let Server {
            table,
            transport,
            writer,
            ..
        } = self;

        let mut cursor = ReadCursor::new(frame.payload());
        let function_byte = match cursor.read_u8() {
            Ok(x) => x,
            Err(_) => {
                tracing::warn!("received request without a function code");
                return true;
            }
        };

        let broadcast = frame.header.destination.is_broadcast();

        let reply = match FunctionCode::get(function_byte) {
            None => {
                tracing::warn!("received unknown function code: {:#04X}", function_byte);
                if broadcast {
                    return true;
                }
                writer.format_ex(
                    frame.header,
                    FunctionField::UnknownFunction(function_byte),
                    ExceptionCode::IllegalFunction,
                    decode,
                )
            }
            Some(function) => match Request::parse(function, &mut cursor) {
                // malformed requests never reach the table or its hooks
                Err(err) => {
                    tracing::warn!("error parsing {}: {}", function, err);
                    if broadcast {
                        return true;
                    }
                    writer.format_ex(
                        frame.header,
                        FunctionField::Exception(function),
                        err.into_exception(),
                        decode,
                    )
                }
                Ok(request) => {
                    if decode.app.enabled() {
                        tracing::info!("PDU RX - {}", RequestDisplay::new(decode.app, &request));
                    }
                    if broadcast {
                        request.execute_broadcast(table);
                        return true;
                    }
                    request.get_reply(frame.header, table, writer, decode)
                }
            },
        };

        match reply {
            Ok(bytes) => match transport {
                Transport::Tcp(pool) => pool.reply(bytes, decode.physical).await,
                #[cfg(feature = "serial")]
                Transport::Rtu(rtu) => rtu.reply(bytes, decode.physical).await,
            },
            Err(err) => {
                tracing::error!("error serializing response: {}", err);
            }
        }

        true
    }
}

#[cfg(all(test, feature = "serial"))]
mod tests {
    use super::*;

    use tokio_test::io::Builder;

    use crate::common::frame::{FrameDestination, FrameHeader};
    use crate::common::traits::Serialize;
    use crate::serial::frame::format_rtu_frame;
    use crate::server::response::BitResponse;
    use crate::types::{AddressRange, Indexed, RegisterSpace, UnitId};

    // builds complete RTU frames with a valid CRC using the same formatter the
    // server uses; the formatter itself is verified against known-good frames
    // in the serial frame tests
    fn rtu_frame(unit_id: u8, function: FunctionCode, body: &dyn Serialize) -> Vec<u8> {
        let mut buffer = [0u8; crate::serial::frame::constants::MAX_FRAME_LENGTH];
        let header = FrameHeader::new_rtu_header(FrameDestination::new(UnitId::new(unit_id)));
        let length =
            format_rtu_frame(&mut buffer, header, FunctionField::Valid(function), body).unwrap();
        buffer[..length].to_vec()
    }

    fn server_with_coil(mock: tokio_test::io::Mock) -> Server {
        let mut table = RegisterTable::new();
        table
            .define(RegisterSpace::Coil, "DO0", 0x0100, &[1], None, None)
            .unwrap();
        Server {
            table,
            transport: Transport::Rtu(RtuTransport::new_mock(mock, UnitId::new(0x01))),
            writer: FrameWriter::rtu(),
            decode: DecodeLevel::nothing(),
        }
    }

    #[tokio::test]
    async fn answers_read_coils_over_rtu() {
        let request = rtu_frame(
            0x01,
            FunctionCode::ReadCoils,
            &AddressRange::try_from(0x0100, 1).unwrap(),
        );
        let response = rtu_frame(0x01, FunctionCode::ReadCoils, &BitResponse { values: &[1] });

        let mock = Builder::new()
            .read(&request)
            .write(&response)
            .build();

        let mut server = server_with_coil(mock);
        assert!(server.process(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn answers_unmapped_address_with_illegal_data_address() {
        let request = rtu_frame(
            0x01,
            FunctionCode::ReadCoils,
            &AddressRange::try_from(0x0200, 1).unwrap(),
        );
        // exception PDU: function | 0x80, one exception byte
        let response = {
            let mut buffer = [0u8; crate::serial::frame::constants::MAX_FRAME_LENGTH];
            let header = FrameHeader::new_rtu_header(FrameDestination::new(UnitId::new(0x01)));
            let length = format_rtu_frame(
                &mut buffer,
                header,
                FunctionField::Exception(FunctionCode::ReadCoils),
                &ExceptionCode::IllegalDataAddress,
            )
            .unwrap();
            buffer[..length].to_vec()
        };

        let mock = Builder::new().read(&request).write(&response).build();

        let mut server = server_with_coil(mock);
        assert!(server.process(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn drops_frames_for_foreign_unit_ids() {
        let request = rtu_frame(
            0x17,
            FunctionCode::ReadCoils,
            &AddressRange::try_from(0x0100, 1).unwrap(),
        );

        // no write expectation: nothing may be sent back
        let mock = Builder::new().read(&request).build();

        let mut server = server_with_coil(mock);
        assert!(!server.process(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn executes_broadcast_write_without_reply() {
        let body = Indexed::new(0x0100, false);
        let request = rtu_frame(0x00, FunctionCode::WriteSingleCoil, &body);

        let mock = Builder::new().read(&request).build();

        let mut server = server_with_coil(mock);
        assert!(server.process(Duration::from_millis(100)).await);
        assert_eq!(server.table().coil(0x0100), Some(false));
    }
}
