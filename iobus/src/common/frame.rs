use crate::common::buffer::ReadBuffer;
use crate::common::function::FunctionCode;
use crate::common::phys::PhysLayer;
use crate::common::traits::Serialize;
use crate::decode::DecodeLevel;
use crate::error::RequestError;
use crate::exception::ExceptionCode;
use crate::tcp::frame::MbapParser;
use crate::types::UnitId;

#[cfg(feature = "serial")]
use crate::serial::frame::RtuParser;

pub(crate) mod constants {
    /// the maximum size of a PDU, including the function code
    pub(crate) const MAX_ADU_LENGTH: usize = 253;
    /// the maximum size of a serialized frame on any transport
    pub(crate) const MAX_FRAME_LENGTH: usize = crate::tcp::frame::constants::MAX_FRAME_LENGTH;
}

/// transaction identifier from the MBAP header, echoed in the response
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct TxId {
    value: u16,
}

impl TxId {
    pub(crate) fn new(value: u16) -> Self {
        TxId { value }
    }

    pub(crate) fn to_u16(self) -> u16 {
        self.value
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:#06X}", self.value)
    }
}

/// the peer a frame was addressed to: a specific unit or the broadcast address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FrameDestination {
    UnitId(UnitId),
    Broadcast,
}

impl FrameDestination {
    pub(crate) fn new(unit_id: UnitId) -> Self {
        if unit_id == UnitId::broadcast() {
            FrameDestination::Broadcast
        } else {
            FrameDestination::UnitId(unit_id)
        }
    }

    pub(crate) fn value(&self) -> u8 {
        match self {
            FrameDestination::UnitId(unit_id) => unit_id.to_u8(),
            FrameDestination::Broadcast => UnitId::broadcast().to_u8(),
        }
    }

    pub(crate) fn is_broadcast(&self) -> bool {
        matches!(self, FrameDestination::Broadcast)
    }
}

impl std::fmt::Display for FrameDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FrameDestination::UnitId(unit_id) => write!(f, "{unit_id}"),
            FrameDestination::Broadcast => f.write_str("broadcast"),
        }
    }
}

#[derive(Clone, Copy)]
pub(crate) struct FrameHeader {
    pub(crate) destination: FrameDestination,
    /// transaction id, present on TCP only
    pub(crate) tx_id: Option<TxId>,
}

impl FrameHeader {
    pub(crate) fn new_tcp_header(destination: FrameDestination, tx_id: TxId) -> Self {
        FrameHeader {
            destination,
            tx_id: Some(tx_id),
        }
    }

    #[cfg(feature = "serial")]
    pub(crate) fn new_rtu_header(destination: FrameDestination) -> Self {
        FrameHeader {
            destination,
            tx_id: None,
        }
    }
}

pub(crate) struct Frame {
    pub(crate) header: FrameHeader,
    length: usize,
    pdu: [u8; constants::MAX_ADU_LENGTH],
}

impl Frame {
    pub(crate) fn new(header: FrameHeader) -> Frame {
        Frame {
            header,
            length: 0,
            pdu: [0; constants::MAX_ADU_LENGTH],
        }
    }

    pub(crate) fn set(&mut self, src: &[u8]) {
        let length = src.len().min(self.pdu.len());
        self.pdu[0..length].copy_from_slice(&src[0..length]);
        self.length = length;
    }

    pub(crate) fn payload(&self) -> &[u8] {
        &self.pdu[0..self.length]
    }
}

/// the function code byte of an outgoing frame, which is either the
/// original function code, its error variant, or an unknown raw value
#[derive(Clone, Copy)]
pub(crate) enum FunctionField {
    Valid(FunctionCode),
    Exception(FunctionCode),
    UnknownFunction(u8),
}

impl FunctionField {
    pub(crate) fn get_value(self) -> u8 {
        match self {
            FunctionField::Valid(x) => x.get_value(),
            FunctionField::Exception(x) => x.get_value() | 0x80,
            FunctionField::UnknownFunction(x) => x | 0x80,
        }
    }
}

impl std::fmt::Display for FunctionField {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FunctionField::Valid(x) => write!(f, "{x}"),
            FunctionField::Exception(x) => write!(f, "EXCEPTION for {x}"),
            FunctionField::UnknownFunction(x) => write!(f, "UNKNOWN FUNCTION ({x:#04X})"),
        }
    }
}

enum Parser {
    Mbap(MbapParser),
    #[cfg(feature = "serial")]
    Rtu(RtuParser),
}

/// reads complete frames off a [`PhysLayer`], retaining partial data
/// between calls
pub(crate) struct FramedReader {
    parser: Parser,
    buffer: ReadBuffer,
}

impl FramedReader {
    pub(crate) fn tcp() -> Self {
        Self {
            parser: Parser::Mbap(MbapParser::new()),
            buffer: ReadBuffer::new(crate::tcp::frame::constants::MAX_FRAME_LENGTH),
        }
    }

    #[cfg(feature = "serial")]
    pub(crate) fn rtu_request() -> Self {
        Self {
            parser: Parser::Rtu(RtuParser::new_request_parser()),
            buffer: ReadBuffer::new(crate::serial::frame::constants::MAX_FRAME_LENGTH),
        }
    }

    /// discard all buffered data and reset the parser state
    pub(crate) fn reset(&mut self) {
        self.buffer.clear();
        match &mut self.parser {
            Parser::Mbap(parser) => parser.reset(),
            #[cfg(feature = "serial")]
            Parser::Rtu(parser) => parser.reset(),
        }
    }

    pub(crate) async fn next_frame(
        &mut self,
        io: &mut PhysLayer,
        decode_level: DecodeLevel,
    ) -> Result<Frame, RequestError> {
        loop {
            let result = match &mut self.parser {
                Parser::Mbap(parser) => parser.parse(&mut self.buffer, decode_level.frame)?,
                #[cfg(feature = "serial")]
                Parser::Rtu(parser) => parser.parse(&mut self.buffer, decode_level.frame)?,
            };

            match result {
                Some(frame) => return Ok(frame),
                None => {
                    self.buffer.read_some(io, decode_level.physical).await?;
                }
            }
        }
    }
}

/// formats responses into complete frames for either transport
pub(crate) struct FrameWriter {
    kind: FrameWriterKind,
    buffer: [u8; constants::MAX_FRAME_LENGTH],
}

#[derive(Clone, Copy)]
enum FrameWriterKind {
    Mbap,
    #[cfg(feature = "serial")]
    Rtu,
}

impl FrameWriter {
    pub(crate) fn tcp() -> Self {
        Self {
            kind: FrameWriterKind::Mbap,
            buffer: [0; constants::MAX_FRAME_LENGTH],
        }
    }

    #[cfg(feature = "serial")]
    pub(crate) fn rtu() -> Self {
        Self {
            kind: FrameWriterKind::Rtu,
            buffer: [0; constants::MAX_FRAME_LENGTH],
        }
    }

    pub(crate) fn format_reply(
        &mut self,
        header: FrameHeader,
        function: FunctionCode,
        msg: &dyn Serialize,
        level: DecodeLevel,
    ) -> Result<&[u8], RequestError> {
        if level.app.enabled() {
            tracing::info!("PDU TX - {}", function);
        }
        self.format(header, FunctionField::Valid(function), msg)
    }

    pub(crate) fn format_ex(
        &mut self,
        header: FrameHeader,
        function: FunctionField,
        ex: ExceptionCode,
        level: DecodeLevel,
    ) -> Result<&[u8], RequestError> {
        if level.app.enabled() {
            tracing::warn!("PDU TX - Modbus exception {:?} ({:#04X})", ex, u8::from(ex));
        }
        self.format(header, function, &ex)
    }

    fn format(
        &mut self,
        header: FrameHeader,
        function: FunctionField,
        msg: &dyn Serialize,
    ) -> Result<&[u8], RequestError> {
        let length = match self.kind {
            FrameWriterKind::Mbap => {
                crate::tcp::frame::format_mbap_frame(&mut self.buffer, header, function, msg)?
            }
            #[cfg(feature = "serial")]
            FrameWriterKind::Rtu => {
                crate::serial::frame::format_rtu_frame(&mut self.buffer, header, function, msg)?
            }
        };
        Ok(&self.buffer[..length])
    }
}
