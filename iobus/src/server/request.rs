use crate::common::cursor::ReadCursor;
use crate::common::frame::{FrameHeader, FrameWriter, FunctionField};
use crate::common::function::FunctionCode;
use crate::common::serialize::calc_bytes_for_bits;
use crate::common::traits::Parse;
use crate::decode::{AppDecodeLevel, DecodeLevel};
use crate::error::{AduParseError, RequestError};
use crate::server::response::{BitResponse, RegisterResponse};
use crate::table::RegisterTable;
use crate::types::{
    AddressRange, BitIterator, Indexed, ReadBitsRange, ReadRegistersRange, RegisterIterator,
    RegisterSpace,
};

/// request to write multiple coils, with a lazy iterator over the bit values
#[derive(Debug, Copy, Clone)]
pub(crate) struct WriteCoils<'a> {
    pub(crate) range: AddressRange,
    pub(crate) iterator: BitIterator<'a>,
}

impl<'a> WriteCoils<'a> {
    fn new(range: AddressRange, iterator: BitIterator<'a>) -> Self {
        Self { range, iterator }
    }
}

/// request to write multiple registers, with a lazy iterator over the values
#[derive(Debug, Copy, Clone)]
pub(crate) struct WriteRegisters<'a> {
    pub(crate) range: AddressRange,
    pub(crate) iterator: RegisterIterator<'a>,
}

impl<'a> WriteRegisters<'a> {
    fn new(range: AddressRange, iterator: RegisterIterator<'a>) -> Self {
        Self { range, iterator }
    }
}

#[derive(Debug)]
pub(crate) enum Request<'a> {
    ReadCoils(ReadBitsRange),
    ReadDiscreteInputs(ReadBitsRange),
    ReadHoldingRegisters(ReadRegistersRange),
    ReadInputRegisters(ReadRegistersRange),
    WriteSingleCoil(Indexed<bool>),
    WriteSingleRegister(Indexed<u16>),
    WriteMultipleCoils(WriteCoils<'a>),
    WriteMultipleRegisters(WriteRegisters<'a>),
}

impl<'a> Request<'a> {
    pub(crate) fn get_function(&self) -> FunctionCode {
        match self {
            Request::ReadCoils(_) => FunctionCode::ReadCoils,
            Request::ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs,
            Request::ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters,
            Request::ReadInputRegisters(_) => FunctionCode::ReadInputRegisters,
            Request::WriteSingleCoil(_) => FunctionCode::WriteSingleCoil,
            Request::WriteSingleRegister(_) => FunctionCode::WriteSingleRegister,
            Request::WriteMultipleCoils(_) => FunctionCode::WriteMultipleCoils,
            Request::WriteMultipleRegisters(_) => FunctionCode::WriteMultipleRegisters,
        }
    }

    /// execute the request against the table and serialize either the success
    /// response or the exception response into a complete frame
    pub(crate) fn get_reply<'b>(
        &self,
        header: FrameHeader,
        table: &mut RegisterTable,
        writer: &'b mut FrameWriter,
        level: DecodeLevel,
    ) -> Result<&'b [u8], RequestError> {
        let function = self.get_function();

        match self {
            Request::ReadCoils(range) => {
                match table.read(RegisterSpace::Coil, range.get()) {
                    Ok(values) => writer.format_reply(
                        header,
                        function,
                        &BitResponse { values: &values },
                        level,
                    ),
                    Err(ex) => writer.format_ex(header, FunctionField::Exception(function), ex, level),
                }
            }
            Request::ReadDiscreteInputs(range) => {
                match table.read(RegisterSpace::DiscreteInput, range.get()) {
                    Ok(values) => writer.format_reply(
                        header,
                        function,
                        &BitResponse { values: &values },
                        level,
                    ),
                    Err(ex) => writer.format_ex(header, FunctionField::Exception(function), ex, level),
                }
            }
            Request::ReadHoldingRegisters(range) => {
                match table.read(RegisterSpace::HoldingRegister, range.get()) {
                    Ok(values) => writer.format_reply(
                        header,
                        function,
                        &RegisterResponse { values: &values },
                        level,
                    ),
                    Err(ex) => writer.format_ex(header, FunctionField::Exception(function), ex, level),
                }
            }
            Request::ReadInputRegisters(range) => {
                match table.read(RegisterSpace::InputRegister, range.get()) {
                    Ok(values) => writer.format_reply(
                        header,
                        function,
                        &RegisterResponse { values: &values },
                        level,
                    ),
                    Err(ex) => writer.format_ex(header, FunctionField::Exception(function), ex, level),
                }
            }
            Request::WriteSingleCoil(request) => {
                let range = AddressRange {
                    start: request.index,
                    count: 1,
                };
                match table.write(RegisterSpace::Coil, range, &[request.value as u16]) {
                    // the request is echoed in the response
                    Ok(()) => writer.format_reply(header, function, request, level),
                    Err(ex) => writer.format_ex(header, FunctionField::Exception(function), ex, level),
                }
            }
            Request::WriteSingleRegister(request) => {
                let range = AddressRange {
                    start: request.index,
                    count: 1,
                };
                match table.write(RegisterSpace::HoldingRegister, range, &[request.value]) {
                    Ok(()) => writer.format_reply(header, function, request, level),
                    Err(ex) => writer.format_ex(header, FunctionField::Exception(function), ex, level),
                }
            }
            Request::WriteMultipleCoils(items) => {
                let values: Vec<u16> = items.iterator.map(|x| x.value as u16).collect();
                match table.write(RegisterSpace::Coil, items.range, &values) {
                    // the response echoes the address and quantity
                    Ok(()) => writer.format_reply(header, function, &items.range, level),
                    Err(ex) => writer.format_ex(header, FunctionField::Exception(function), ex, level),
                }
            }
            Request::WriteMultipleRegisters(items) => {
                let values: Vec<u16> = items.iterator.map(|x| x.value).collect();
                match table.write(RegisterSpace::HoldingRegister, items.range, &values) {
                    Ok(()) => writer.format_reply(header, function, &items.range, level),
                    Err(ex) => writer.format_ex(header, FunctionField::Exception(function), ex, level),
                }
            }
        }
    }

    /// execute a broadcast request against the table. Only writes have any
    /// effect and no response is ever produced.
    pub(crate) fn execute_broadcast(&self, table: &mut RegisterTable) {
        match self {
            Request::ReadCoils(_)
            | Request::ReadDiscreteInputs(_)
            | Request::ReadHoldingRegisters(_)
            | Request::ReadInputRegisters(_) => {}
            Request::WriteSingleCoil(request) => {
                let range = AddressRange {
                    start: request.index,
                    count: 1,
                };
                let _ = table.write(RegisterSpace::Coil, range, &[request.value as u16]);
            }
            Request::WriteSingleRegister(request) => {
                let range = AddressRange {
                    start: request.index,
                    count: 1,
                };
                let _ = table.write(RegisterSpace::HoldingRegister, range, &[request.value]);
            }
            Request::WriteMultipleCoils(items) => {
                let values: Vec<u16> = items.iterator.map(|x| x.value as u16).collect();
                let _ = table.write(RegisterSpace::Coil, items.range, &values);
            }
            Request::WriteMultipleRegisters(items) => {
                let values: Vec<u16> = items.iterator.map(|x| x.value).collect();
                let _ = table.write(RegisterSpace::HoldingRegister, items.range, &values);
            }
        }
    }

    pub(crate) fn parse(
        function: FunctionCode,
        cursor: &mut ReadCursor<'a>,
    ) -> Result<Self, RequestError> {
        match function {
            FunctionCode::ReadCoils => {
                let x = Request::ReadCoils(AddressRange::parse(cursor)?.of_read_bits()?);
                cursor.expect_empty()?;
                Ok(x)
            }
            FunctionCode::ReadDiscreteInputs => {
                let x = Request::ReadDiscreteInputs(AddressRange::parse(cursor)?.of_read_bits()?);
                cursor.expect_empty()?;
                Ok(x)
            }
            FunctionCode::ReadHoldingRegisters => {
                let x = Request::ReadHoldingRegisters(
                    AddressRange::parse(cursor)?.of_read_registers()?,
                );
                cursor.expect_empty()?;
                Ok(x)
            }
            FunctionCode::ReadInputRegisters => {
                let x =
                    Request::ReadInputRegisters(AddressRange::parse(cursor)?.of_read_registers()?);
                cursor.expect_empty()?;
                Ok(x)
            }
            FunctionCode::WriteSingleCoil => {
                let x = Request::WriteSingleCoil(Indexed::<bool>::parse(cursor)?);
                cursor.expect_empty()?;
                Ok(x)
            }
            FunctionCode::WriteSingleRegister => {
                let x = Request::WriteSingleRegister(Indexed::<u16>::parse(cursor)?);
                cursor.expect_empty()?;
                Ok(x)
            }
            FunctionCode::WriteMultipleCoils => {
                let range = AddressRange::parse(cursor)?.of_write_bits()?;
                let byte_count = cursor.read_u8()? as usize;
                let expected = calc_bytes_for_bits(range.count as usize)? as usize;
                if byte_count != expected {
                    return Err(
                        AduParseError::RequestByteCountMismatch(expected, byte_count).into(),
                    );
                }
                Ok(Request::WriteMultipleCoils(WriteCoils::new(
                    range,
                    BitIterator::parse_all(range, cursor)?,
                )))
            }
            FunctionCode::WriteMultipleRegisters => {
                let range = AddressRange::parse(cursor)?.of_write_registers()?;
                let byte_count = cursor.read_u8()? as usize;
                let expected = 2 * range.count as usize;
                if byte_count != expected {
                    return Err(
                        AduParseError::RequestByteCountMismatch(expected, byte_count).into(),
                    );
                }
                Ok(Request::WriteMultipleRegisters(WriteRegisters::new(
                    range,
                    RegisterIterator::parse_all(range, cursor)?,
                )))
            }
        }
    }
}

pub(crate) struct RequestDisplay<'a, 'b> {
    request: &'a Request<'b>,
    level: AppDecodeLevel,
}

impl<'a, 'b> RequestDisplay<'a, 'b> {
    pub(crate) fn new(level: AppDecodeLevel, request: &'a Request<'b>) -> Self {
        Self { request, level }
    }
}

impl std::fmt::Display for RequestDisplay<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.request.get_function())?;

        if self.level.data_headers() {
            match self.request {
                Request::ReadCoils(range) => write!(f, " {}", range.get())?,
                Request::ReadDiscreteInputs(range) => write!(f, " {}", range.get())?,
                Request::ReadHoldingRegisters(range) => write!(f, " {}", range.get())?,
                Request::ReadInputRegisters(range) => write!(f, " {}", range.get())?,
                Request::WriteSingleCoil(request) => write!(f, " {request}")?,
                Request::WriteSingleRegister(request) => write!(f, " {request}")?,
                Request::WriteMultipleCoils(items) => {
                    write!(f, " {}", items.range)?;
                    if self.level.data_values() {
                        for x in items.iterator {
                            write!(f, "\n{x}")?;
                        }
                    }
                }
                Request::WriteMultipleRegisters(items) => {
                    write!(f, " {}", items.range)?;
                    if self.level.data_values() {
                        for x in items.iterator {
                            write!(f, "\n{x}")?;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
