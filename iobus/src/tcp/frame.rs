use crate::common::buffer::ReadBuffer;
use crate::common::cursor::WriteCursor;
use crate::common::frame::{Frame, FrameDestination, FrameHeader, FunctionField, TxId};
use crate::common::phys::format_bytes;
use crate::common::traits::Serialize;
use crate::decode::FrameDecodeLevel;
use crate::error::{FrameParseError, RequestError};
use crate::types::UnitId;

pub(crate) mod constants {
    pub(crate) const HEADER_LENGTH: usize = 7;
    pub(crate) const MAX_FRAME_LENGTH: usize =
        HEADER_LENGTH + crate::common::frame::constants::MAX_ADU_LENGTH;
    // the length field counts the unit id byte in addition to the PDU
    pub(crate) const MAX_LENGTH_FIELD: usize = crate::common::frame::constants::MAX_ADU_LENGTH + 1;
}

#[derive(Clone, Copy)]
struct MbapHeader {
    tx_id: TxId,
    adu_length: usize,
    destination: FrameDestination,
}

#[derive(Clone, Copy)]
enum ParseState {
    Begin,
    Header(MbapHeader),
    /// consuming the body of a frame with a foreign protocol id so that the
    /// stream stays in sync
    Discard(usize),
}

pub(crate) struct MbapParser {
    state: ParseState,
}

impl MbapParser {
    pub(crate) fn new() -> Self {
        Self {
            state: ParseState::Begin,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.state = ParseState::Begin;
    }

    fn parse_header(cursor: &mut ReadBuffer) -> Result<Option<MbapHeader>, RequestError> {
        let tx_id = TxId::new(cursor.read_u16_be()?);
        let protocol_id = cursor.read_u16_be()?;
        let length = cursor.read_u16_be()? as usize;
        let unit_id = UnitId::new(cursor.read_u8()?);

        if protocol_id != 0 {
            // not a fatal error: the declared body is discarded and parsing
            // resumes at the next frame boundary
            tracing::warn!(
                "discarding frame with non-Modbus protocol id: {:#06X}",
                protocol_id
            );
            if length > constants::MAX_LENGTH_FIELD {
                // can't trust the length field either, no way to resync
                return Err(
                    FrameParseError::MbapLengthTooBig(length, constants::MAX_LENGTH_FIELD).into(),
                );
            }
            return Ok(None);
        }

        if length > constants::MAX_LENGTH_FIELD {
            return Err(
                FrameParseError::MbapLengthTooBig(length, constants::MAX_LENGTH_FIELD).into(),
            );
        }

        // must be > 0 b/c the 1-byte unit identifier counts towards length
        if length == 0 {
            return Err(FrameParseError::MbapLengthZero.into());
        }

        Ok(Some(MbapHeader {
            tx_id,
            adu_length: length - 1,
            destination: FrameDestination::new(unit_id),
        }))
    }

    fn parse_body(header: &MbapHeader, cursor: &mut ReadBuffer) -> Result<Frame, RequestError> {
        let mut frame = Frame::new(FrameHeader::new_tcp_header(header.destination, header.tx_id));
        frame.set(cursor.read(header.adu_length)?);
        Ok(frame)
    }

    pub(crate) fn parse(
        &mut self,
        cursor: &mut ReadBuffer,
        decode_level: FrameDecodeLevel,
    ) -> Result<Option<Frame>, RequestError> {
        match self.state {
            ParseState::Header(header) => {
                if cursor.len() < header.adu_length {
                    return Ok(None);
                }

                let frame = Self::parse_body(&header, cursor)?;
                self.state = ParseState::Begin;

                if decode_level.enabled() {
                    tracing::info!(
                        "MBAP RX - {}",
                        MbapDisplay::new(decode_level, &header, frame.payload())
                    );
                }

                Ok(Some(frame))
            }
            ParseState::Discard(remaining) => {
                let consumed = remaining.min(cursor.len());
                cursor.read(consumed)?;
                if consumed < remaining {
                    self.state = ParseState::Discard(remaining - consumed);
                    return Ok(None);
                }
                self.state = ParseState::Begin;
                self.parse(cursor, decode_level)
            }
            ParseState::Begin => {
                if cursor.len() < constants::HEADER_LENGTH {
                    return Ok(None);
                }

                // peek the length field in case the header has to be discarded
                let length = ((cursor.peek_at(4)? as usize) << 8) | cursor.peek_at(5)? as usize;

                match Self::parse_header(cursor)? {
                    Some(header) => {
                        self.state = ParseState::Header(header);
                        self.parse(cursor, decode_level)
                    }
                    None => {
                        // foreign protocol id: skip the body (length includes the
                        // already-consumed unit id byte)
                        self.state = ParseState::Discard(length.saturating_sub(1));
                        self.parse(cursor, decode_level)
                    }
                }
            }
        }
    }
}

pub(crate) fn format_mbap_frame(
    buffer: &mut [u8],
    header: FrameHeader,
    function: FunctionField,
    msg: &dyn Serialize,
) -> Result<usize, RequestError> {
    let mut cursor = WriteCursor::new(buffer);

    let tx_id = header.tx_id.map(|x| x.to_u16()).unwrap_or(0);
    cursor.write_u16_be(tx_id)?;
    cursor.write_u16_be(0)?;
    cursor.seek_from_current(2)?; // write the length later
    cursor.write_u8(header.destination.value())?;

    let adu_length: usize = {
        let start = cursor.position();
        cursor.write_u8(function.get_value())?;
        msg.serialize(&mut cursor)?;
        cursor.position() - start
    };

    let end = cursor.position();

    // write the resulting length
    let length_field = u16::try_from(adu_length + 1)
        .map_err(|_| crate::error::InternalError::BadByteCount(adu_length + 1))?;
    cursor.seek_from_start(4)?;
    cursor.write_u16_be(length_field)?;

    Ok(end)
}

struct MbapDisplay<'a> {
    level: FrameDecodeLevel,
    header: &'a MbapHeader,
    payload: &'a [u8],
}

impl<'a> MbapDisplay<'a> {
    fn new(level: FrameDecodeLevel, header: &'a MbapHeader, payload: &'a [u8]) -> Self {
        MbapDisplay {
            level,
            header,
            payload,
        }
    }
}

impl std::fmt::Display for MbapDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "tx_id: {} unit: {} (payload len = {})",
            self.header.tx_id,
            self.header.destination,
            self.payload.len()
        )?;
        if self.level.payload_enabled() {
            format_bytes(f, self.payload)?;
        }
        Ok(())
    }
}
