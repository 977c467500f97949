use crate::common::buffer::ReadBuffer;
use crate::common::cursor::WriteCursor;
use crate::common::frame::{Frame, FrameDestination, FrameHeader, FunctionField};
use crate::common::function::FunctionCode;
use crate::common::phys::format_bytes;
use crate::common::traits::Serialize;
use crate::decode::FrameDecodeLevel;
use crate::error::{FrameParseError, InternalError, RequestError};
use crate::types::UnitId;

pub(crate) mod constants {
    pub(crate) const HEADER_LENGTH: usize = 1;
    pub(crate) const FUNCTION_CODE_LENGTH: usize = 1;
    pub(crate) const CRC_LENGTH: usize = 2;
    pub(crate) const MAX_FRAME_LENGTH: usize =
        HEADER_LENGTH + crate::common::frame::constants::MAX_ADU_LENGTH + CRC_LENGTH;
}

/// precomputes the CRC table as a constant!
const CRC: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_MODBUS);

#[derive(Clone, Copy)]
enum ParseState {
    Start,
    ReadFullBody(FrameDestination, usize), // destination, length of rest
    ReadToOffsetForLength(FrameDestination, usize), // destination, offset of the byte-count byte
}

#[derive(Clone, Copy)]
enum LengthMode {
    /// the body length is fixed (not counting the function code)
    Fixed(usize),
    /// X more bytes must be read; the last of them holds the number of extra bytes after that
    Offset(usize),
    /// unknown function code, the frame cannot be sized
    Unknown,
}

pub(crate) struct RtuParser {
    state: ParseState,
}

impl RtuParser {
    pub(crate) fn new_request_parser() -> Self {
        Self {
            state: ParseState::Start,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.state = ParseState::Start;
    }

    // how to compute the body length of a request carrying this function code
    fn length_mode(function_code: u8) -> LengthMode {
        let function_code = match FunctionCode::get(function_code) {
            Some(code) => code,
            None => return LengthMode::Unknown,
        };

        match function_code {
            FunctionCode::ReadCoils => LengthMode::Fixed(4),
            FunctionCode::ReadDiscreteInputs => LengthMode::Fixed(4),
            FunctionCode::ReadHoldingRegisters => LengthMode::Fixed(4),
            FunctionCode::ReadInputRegisters => LengthMode::Fixed(4),
            FunctionCode::WriteSingleCoil => LengthMode::Fixed(4),
            FunctionCode::WriteSingleRegister => LengthMode::Fixed(4),
            FunctionCode::WriteMultipleCoils => LengthMode::Offset(5),
            FunctionCode::WriteMultipleRegisters => LengthMode::Offset(5),
        }
    }

    pub(crate) fn parse(
        &mut self,
        cursor: &mut ReadBuffer,
        decode_level: FrameDecodeLevel,
    ) -> Result<Option<Frame>, RequestError> {
        match self.state {
            ParseState::Start => {
                if cursor.len() < 2 {
                    return Ok(None);
                }

                let unit_id = UnitId::new(cursor.read_u8()?);
                let destination = FrameDestination::new(unit_id);

                if unit_id.is_rtu_reserved() {
                    tracing::warn!(
                        "received reserved unit id {}, violating the Modbus RTU spec. Passing it through nevertheless.",
                        unit_id
                    );
                }

                // don't consume the function code so the receive buffer can be
                // copied wholesale into the frame later
                let raw_function_code = cursor.peek_at(0)?;

                self.state = match Self::length_mode(raw_function_code) {
                    LengthMode::Fixed(length) => ParseState::ReadFullBody(destination, length),
                    LengthMode::Offset(offset) => {
                        ParseState::ReadToOffsetForLength(destination, offset)
                    }
                    LengthMode::Unknown => {
                        return Err(
                            FrameParseError::UnknownFunctionCode(raw_function_code).into()
                        )
                    }
                };

                self.parse(cursor, decode_level)
            }
            ParseState::ReadToOffsetForLength(destination, offset) => {
                if cursor.len() < constants::FUNCTION_CODE_LENGTH + offset {
                    return Ok(None);
                }

                // the last byte of the offset region is the byte count of the rest
                let extra_bytes_to_read =
                    cursor.peek_at(constants::FUNCTION_CODE_LENGTH + offset - 1)? as usize;
                self.state = ParseState::ReadFullBody(destination, offset + extra_bytes_to_read);

                self.parse(cursor, decode_level)
            }
            ParseState::ReadFullBody(destination, length) => {
                if constants::FUNCTION_CODE_LENGTH + length
                    > crate::common::frame::constants::MAX_ADU_LENGTH
                {
                    return Err(FrameParseError::FrameLengthTooBig(
                        constants::FUNCTION_CODE_LENGTH + length,
                        crate::common::frame::constants::MAX_ADU_LENGTH,
                    )
                    .into());
                }

                if cursor.len() < constants::FUNCTION_CODE_LENGTH + length + constants::CRC_LENGTH {
                    return Ok(None);
                }

                let frame = {
                    let data = cursor.read(constants::FUNCTION_CODE_LENGTH + length)?;
                    let mut frame = Frame::new(FrameHeader::new_rtu_header(destination));
                    frame.set(data);
                    frame
                };
                let received_crc = {
                    let low = cursor.read_u8()? as u16;
                    let high = cursor.read_u8()? as u16;
                    (high << 8) | low
                };

                let expected_crc = {
                    let mut digest = CRC.digest();
                    digest.update(&[destination.value()]);
                    digest.update(frame.payload());
                    digest.finalize()
                };

                if received_crc != expected_crc {
                    return Err(
                        FrameParseError::CrcValidationFailure(received_crc, expected_crc).into(),
                    );
                }

                if decode_level.enabled() {
                    tracing::info!(
                        "RTU RX - {}",
                        RtuDisplay::new(decode_level, destination, frame.payload(), received_crc)
                    );
                }

                self.state = ParseState::Start;
                Ok(Some(frame))
            }
        }
    }
}

pub(crate) fn format_rtu_frame(
    buffer: &mut [u8],
    header: FrameHeader,
    function: FunctionField,
    msg: &dyn Serialize,
) -> Result<usize, RequestError> {
    let mut cursor = WriteCursor::new(buffer);

    cursor.write_u8(header.destination.value())?;
    cursor.write_u8(function.get_value())?;
    msg.serialize(&mut cursor)?;

    let end = cursor.position();
    let crc = match cursor.get(0..end) {
        Some(bytes) => CRC.checksum(bytes),
        None => return Err(InternalError::BadSeekOperation.into()),
    };
    cursor.write_u16_le(crc)?;

    Ok(cursor.position())
}

pub(crate) struct RtuDisplay<'a> {
    level: FrameDecodeLevel,
    destination: FrameDestination,
    payload: &'a [u8],
    crc: u16,
}

impl<'a> RtuDisplay<'a> {
    fn new(
        level: FrameDecodeLevel,
        destination: FrameDestination,
        payload: &'a [u8],
        crc: u16,
    ) -> Self {
        RtuDisplay {
            level,
            destination,
            payload,
            crc,
        }
    }
}

impl std::fmt::Display for RtuDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "dest: {} crc: {:#06X} (payload len = {})",
            self.destination,
            self.crc,
            self.payload.len(),
        )?;
        if self.level.payload_enabled() {
            format_bytes(f, self.payload)?;
        }
        Ok(())
    }
}
