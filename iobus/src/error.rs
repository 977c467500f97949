use crate::exception::ExceptionCode;

/// Errors that occur while servicing a request. These are always absorbed
/// locally by the engine and never cross the wire; the only error kind that
/// is ever serialized to a peer is [`ExceptionCode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestError {
    /// An I/O error occurred on the underlying transport
    Io(std::io::ErrorKind),
    /// An error occurred while parsing a frame off the wire
    BadFrame(FrameParseError),
    /// An error occurred while parsing the PDU payload of a frame
    BadAdu(AduParseError),
    /// A request parameter (address/quantity) is outside the allowed range
    BadRequest(InvalidRange),
    /// The operation failed with a Modbus exception
    Exception(ExceptionCode),
    /// An error occurred while writing a response into an output buffer
    Internal(InternalError),
}

impl RequestError {
    /// exception code to answer the peer with when this error terminates
    /// request processing before the register table is consulted
    pub(crate) fn into_exception(self) -> ExceptionCode {
        match self {
            RequestError::Exception(ex) => ex,
            _ => ExceptionCode::IllegalDataValue,
        }
    }
}

impl std::error::Error for RequestError {}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RequestError::Io(kind) => write!(f, "I/O error: {kind:?}"),
            RequestError::BadFrame(err) => write!(f, "frame error: {err}"),
            RequestError::BadAdu(err) => write!(f, "ADU error: {err}"),
            RequestError::BadRequest(err) => write!(f, "invalid request: {err}"),
            RequestError::Exception(ex) => write!(f, "Modbus exception: {ex}"),
            RequestError::Internal(err) => write!(f, "internal error: {err}"),
        }
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Io(err.kind())
    }
}

impl From<FrameParseError> for RequestError {
    fn from(err: FrameParseError) -> Self {
        RequestError::BadFrame(err)
    }
}

impl From<AduParseError> for RequestError {
    fn from(err: AduParseError) -> Self {
        RequestError::BadAdu(err)
    }
}

impl From<InvalidRange> for RequestError {
    fn from(err: InvalidRange) -> Self {
        RequestError::BadRequest(err)
    }
}

impl From<ExceptionCode> for RequestError {
    fn from(ex: ExceptionCode) -> Self {
        RequestError::Exception(ex)
    }
}

impl From<InternalError> for RequestError {
    fn from(err: InternalError) -> Self {
        RequestError::Internal(err)
    }
}

/// errors that occur while parsing a frame off a stream (TCP or serial)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameParseError {
    /// Received TCP frame with the length field set to zero
    MbapLengthZero,
    /// Received TCP frame with a length field that exceeds the maximum allowed value
    MbapLengthTooBig(usize, usize), // actual size and the maximum size
    /// Received a serial frame with a function code whose body length cannot be determined
    UnknownFunctionCode(u8),
    /// Received a serial frame whose length exceeds the maximum allowed ADU size
    FrameLengthTooBig(usize, usize), // actual size and the maximum size
    /// Received a serial frame whose CRC does not match the computed value
    CrcValidationFailure(u16, u16), // received CRC and expected CRC
}

impl std::error::Error for FrameParseError {}

impl std::fmt::Display for FrameParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FrameParseError::MbapLengthZero => {
                f.write_str("received TCP frame with the length field set to zero")
            }
            FrameParseError::MbapLengthTooBig(size, max) => write!(
                f,
                "received TCP frame with length ({size}) that exceeds max allowed size ({max})"
            ),
            FrameParseError::UnknownFunctionCode(fc) => write!(
                f,
                "received serial frame with unknown function code ({fc:#04X}), cannot determine its length"
            ),
            FrameParseError::FrameLengthTooBig(size, max) => write!(
                f,
                "received serial frame with length ({size}) that exceeds max allowed size ({max})"
            ),
            FrameParseError::CrcValidationFailure(received, expected) => write!(
                f,
                "received serial frame with CRC value {received:#06X}, expected {expected:#06X}"
            ),
        }
    }
}

/// errors that occur while parsing the PDU payload of a request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AduParseError {
    /// the request is too short to be valid
    InsufficientBytes,
    /// the request contains extra trailing bytes
    TrailingBytes(usize),
    /// the byte count field does not match what the quantity field requires
    RequestByteCountMismatch(usize, usize), // expected count / actual count
    /// a single coil write contains a value other than 0xFF00 or 0x0000
    UnknownCoilState(u16),
}

impl std::error::Error for AduParseError {}

impl std::fmt::Display for AduParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AduParseError::InsufficientBytes => f.write_str("request is too short to be valid"),
            AduParseError::TrailingBytes(remaining) => {
                write!(f, "request contains {remaining} extra trailing bytes")
            }
            AduParseError::RequestByteCountMismatch(expected, actual) => write!(
                f,
                "byte count ({actual}) does not match the declared quantity (requires {expected})"
            ),
            AduParseError::UnknownCoilState(value) => write!(
                f,
                "received coil state with unspecified value: {value:#06X}"
            ),
        }
    }
}

/// errors that result from bad address/quantity request parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidRange {
    /// the request contains a count of zero
    CountOfZero,
    /// start + count would overflow the u16 address space
    AddressOverflow(u16, u16),
    /// the count exceeds the maximum allowed for this request type
    CountTooLargeForType(u16, u16), // count / max
}

impl std::error::Error for InvalidRange {}

impl std::fmt::Display for InvalidRange {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InvalidRange::CountOfZero => f.write_str("request contains a count of zero"),
            InvalidRange::AddressOverflow(start, count) => write!(
                f,
                "start == {start} and count == {count} would overflow the u16 address space"
            ),
            InvalidRange::CountTooLargeForType(count, max) => write!(
                f,
                "the request count of {count} exceeds the maximum allowed count of {max} for this type"
            ),
        }
    }
}

/// errors that indicate a bug in the library, e.g. a response that does not
/// fit the output buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InternalError {
    /// Attempted to write more bytes than the output buffer can hold
    InsufficientWriteSpace(usize, usize), // written vs remaining
    /// Attempted to read more bytes than present in the receive buffer
    InsufficientBytesForRead(usize, usize), // requested vs remaining
    /// The byte count of a response would exceed the maximum size of a u8
    BadByteCount(usize),
    /// Cursor seek operation exceeded the bounds of the underlying buffer
    BadSeekOperation,
}

impl std::error::Error for InternalError {}

impl std::fmt::Display for InternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InternalError::InsufficientWriteSpace(written, remaining) => write!(
                f,
                "attempted to write {written} bytes with {remaining} bytes remaining"
            ),
            InternalError::InsufficientBytesForRead(requested, remaining) => write!(
                f,
                "attempted to read {requested} bytes with only {remaining} remaining"
            ),
            InternalError::BadByteCount(count) => {
                write!(f, "byte count would exceed the maximum size of a u8: {count}")
            }
            InternalError::BadSeekOperation => {
                f.write_str("cursor seek operation exceeded the bounds of the underlying buffer")
            }
        }
    }
}
