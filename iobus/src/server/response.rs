use crate::common::cursor::WriteCursor;
use crate::common::serialize::{calc_bytes_for_bits, calc_bytes_for_registers};
use crate::common::traits::Serialize;
use crate::error::RequestError;

/// byte-count-prefixed bit data for read coils / read discrete inputs
/// responses. Each source word holds one bit; any non-zero word is on.
pub(crate) struct BitResponse<'a> {
    pub(crate) values: &'a [u16],
}

impl Serialize for BitResponse<'_> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        let num_bytes = calc_bytes_for_bits(self.values.len())?;
        cursor.write_u8(num_bytes)?;

        for chunk in self.values.chunks(8) {
            let mut acc: u8 = 0;
            for (count, bit) in chunk.iter().enumerate() {
                if *bit != 0 {
                    acc |= 1 << count;
                }
            }
            cursor.write_u8(acc)?;
        }

        Ok(())
    }
}

/// byte-count-prefixed word data for read holding / input registers responses
pub(crate) struct RegisterResponse<'a> {
    pub(crate) values: &'a [u16],
}

impl Serialize for RegisterResponse<'_> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        let num_bytes = calc_bytes_for_registers(self.values.len())?;
        cursor.write_u8(num_bytes)?;

        for value in self.values {
            cursor.write_u16_be(*value)?;
        }

        Ok(())
    }
}
