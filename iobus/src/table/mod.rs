use std::collections::BTreeMap;

use crate::exception::ExceptionCode;
use crate::types::{AddressRange, RegisterSpace};

/// Hook invoked before a stored value is returned to a requester. The
/// implementation refreshes the stored value from the external collaborator
/// (e.g. samples an input pin) using the table setters.
pub type ReadHook = Box<dyn FnMut(&mut RegisterTable, RegisterSpace, u16) + Send>;

/// Hook invoked after a requester's write has been applied to the table. The
/// implementation performs the side effect (e.g. drives an output pin); the
/// newly stored words are passed along.
pub type WriteHook = Box<dyn FnMut(&mut RegisterTable, RegisterSpace, u16, &[u16]) + Send>;

/// Errors returned while building the register map at startup
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DefineError {
    /// the new entry overlaps an existing entry in the same space
    AddressConflict(RegisterSpace, u16, u16),
    /// an entry must hold at least one bit or word
    CountOfZero,
    /// base address + count would overflow the u16 address space
    AddressOverflow(u16, usize),
    /// a bit entry may only hold the values 0 and 1
    BitValueOutOfRange(u16),
}

impl std::error::Error for DefineError {}

impl std::fmt::Display for DefineError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DefineError::AddressConflict(space, address, count) => write!(
                f,
                "entry at {address:#06X} (count {count}) overlaps an existing entry in {space}"
            ),
            DefineError::CountOfZero => f.write_str("an entry must hold at least one value"),
            DefineError::AddressOverflow(address, count) => write!(
                f,
                "entry at {address:#06X} with count {count} overflows the u16 address space"
            ),
            DefineError::BitValueOutOfRange(value) => {
                write!(f, "bit entries may only hold 0 or 1, got {value}")
            }
        }
    }
}

struct RegisterEntry {
    name: String,
    count: u16,
    /// one word per register, or one 0/1 word per bit. Multi-word values are
    /// stored most-significant word first.
    values: Vec<u16>,
    on_read: Option<ReadHook>,
    on_write: Option<WriteHook>,
}

/// Holds the current value and metadata for every addressable coil, discrete
/// input, input register, and holding register, and invokes the read/write
/// hooks that connect the table to the outside world.
///
/// The table is built once at startup with [`RegisterTable::define`] and then
/// owned by the server engine. It is only ever touched from the single server
/// loop, so hooks receive `&mut RegisterTable` and need no locking; a hook
/// must not block, or it stalls every peer.
pub struct RegisterTable {
    spaces: [BTreeMap<u16, RegisterEntry>; 4],
}

impl Default for RegisterTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterTable {
    /// create an empty table
    pub fn new() -> Self {
        Self {
            spaces: std::array::from_fn(|_| BTreeMap::new()),
        }
    }

    /// Register an entry. The count is the number of initial values; multi-word
    /// values are given most-significant word first. Fails if the new range
    /// overlaps an existing entry in the same space.
    pub fn define(
        &mut self,
        space: RegisterSpace,
        name: &str,
        address: u16,
        initial: &[u16],
        on_read: Option<ReadHook>,
        on_write: Option<WriteHook>,
    ) -> Result<(), DefineError> {
        if initial.is_empty() {
            return Err(DefineError::CountOfZero);
        }
        if (address as usize) + initial.len() > (u16::MAX as usize) + 1 {
            return Err(DefineError::AddressOverflow(address, initial.len()));
        }
        if space.is_bit() {
            if let Some(bad) = initial.iter().find(|x| **x > 1) {
                return Err(DefineError::BitValueOutOfRange(*bad));
            }
        }

        let count = initial.len() as u16;
        let map = &mut self.spaces[space.index()];

        // the closest entry at or below the new base must end before it starts
        if let Some((base, entry)) = map.range(..=address).next_back() {
            if (*base as usize) + (entry.count as usize) > address as usize {
                return Err(DefineError::AddressConflict(space, address, count));
            }
        }
        // and the closest entry above must start after the new one ends
        if let Some((base, _)) = map.range(address..).next() {
            if (*base as usize) < (address as usize) + (count as usize) {
                return Err(DefineError::AddressConflict(space, address, count));
            }
        }

        map.insert(
            address,
            RegisterEntry {
                name: name.to_string(),
                count,
                values: initial.to_vec(),
                on_read,
                on_write,
            },
        );
        Ok(())
    }

    /// Read `range.count` bits or words starting at `range.start`. Invokes the
    /// on-read hook of every covered entry before collecting the stored
    /// values. Bit spaces yield one 0/1 word per bit.
    pub fn read(
        &mut self,
        space: RegisterSpace,
        range: AddressRange,
    ) -> Result<Vec<u16>, ExceptionCode> {
        let covered = self.resolve(space, range)?;

        for entry in &covered {
            self.invoke_read_hook(space, entry.base);
        }

        let map = &self.spaces[space.index()];
        let mut out = Vec::with_capacity(range.count as usize);
        for entry in &covered {
            if let Some(entry) = map.get(&entry.base) {
                out.extend_from_slice(&entry.values);
            }
        }
        Ok(out)
    }

    /// Write bits or words starting at `range.start`. Resolution and value
    /// validation happen before any mutation, so a failed write never
    /// partially succeeds. On success the on-write hook of every covered
    /// entry runs after all values are stored.
    pub fn write(
        &mut self,
        space: RegisterSpace,
        range: AddressRange,
        values: &[u16],
    ) -> Result<(), ExceptionCode> {
        if !space.is_writable() {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        if values.len() != range.count as usize {
            return Err(ExceptionCode::IllegalDataValue);
        }
        if space.is_bit() && values.iter().any(|x| *x > 1) {
            return Err(ExceptionCode::IllegalDataValue);
        }

        let covered = self.resolve(space, range)?;

        let mut offset = 0;
        for entry in &covered {
            let count = entry.count as usize;
            if let Some(slot) = self.spaces[space.index()].get_mut(&entry.base) {
                slot.values.copy_from_slice(&values[offset..offset + count]);
            }
            offset += count;
        }

        let mut offset = 0;
        for entry in &covered {
            let count = entry.count as usize;
            self.invoke_write_hook(space, entry.base, &values[offset..offset + count]);
            offset += count;
        }
        Ok(())
    }

    /// name of the entry based at `address`, if one is defined
    pub fn name_of(&self, space: RegisterSpace, address: u16) -> Option<&str> {
        self.spaces[space.index()]
            .get(&address)
            .map(|entry| entry.name.as_str())
    }

    /// current value of a coil, addressed anywhere inside an entry
    pub fn coil(&self, address: u16) -> Option<bool> {
        self.bit(RegisterSpace::Coil, address)
    }

    /// store a coil value without invoking hooks; returns false (and changes
    /// nothing) if no entry covers the address
    pub fn set_coil(&mut self, address: u16, value: bool) -> bool {
        self.set_bit(RegisterSpace::Coil, address, value)
    }

    /// current value of a discrete input
    pub fn discrete_input(&self, address: u16) -> Option<bool> {
        self.bit(RegisterSpace::DiscreteInput, address)
    }

    /// store a discrete input value without invoking hooks
    pub fn set_discrete_input(&mut self, address: u16, value: bool) -> bool {
        self.set_bit(RegisterSpace::DiscreteInput, address, value)
    }

    /// current value of a single input register word
    pub fn input_register(&self, address: u16) -> Option<u16> {
        self.word(RegisterSpace::InputRegister, address)
    }

    /// Store the full value of the input register entry based at `address`
    /// without invoking hooks. The slice length must equal the entry's count;
    /// returns false (and changes nothing) otherwise.
    pub fn set_input_registers(&mut self, address: u16, values: &[u16]) -> bool {
        self.set_words(RegisterSpace::InputRegister, address, values)
    }

    /// current value of a single holding register word
    pub fn holding_register(&self, address: u16) -> Option<u16> {
        self.word(RegisterSpace::HoldingRegister, address)
    }

    /// store the full value of a holding register entry without invoking hooks
    pub fn set_holding_registers(&mut self, address: u16, values: &[u16]) -> bool {
        self.set_words(RegisterSpace::HoldingRegister, address, values)
    }

    fn bit(&self, space: RegisterSpace, address: u16) -> Option<bool> {
        self.word(space, address).map(|x| x != 0)
    }

    fn set_bit(&mut self, space: RegisterSpace, address: u16, value: bool) -> bool {
        let map = &mut self.spaces[space.index()];
        if let Some((base, entry)) = map.range_mut(..=address).next_back() {
            let offset = (address - base) as usize;
            if let Some(stored) = entry.values.get_mut(offset) {
                *stored = value as u16;
                return true;
            }
        }
        false
    }

    fn word(&self, space: RegisterSpace, address: u16) -> Option<u16> {
        let (base, entry) = self.spaces[space.index()].range(..=address).next_back()?;
        entry.values.get((address - base) as usize).copied()
    }

    fn set_words(&mut self, space: RegisterSpace, address: u16, values: &[u16]) -> bool {
        let map = &mut self.spaces[space.index()];
        match map.get_mut(&address) {
            Some(entry) if entry.values.len() == values.len() => {
                entry.values.copy_from_slice(values);
                true
            }
            _ => false,
        }
    }

    /// Resolve a request range to the entries that tile it exactly: the first
    /// entry starts at `range.start`, each subsequent entry starts where the
    /// previous one ended, and the last ends at `range.start + range.count`.
    ///
    /// A space with no entries at all fails with `IllegalFunction` (the
    /// deployment does not implement that function); a gap, mid-entry start,
    /// or overhang fails with `IllegalDataAddress`.
    fn resolve(
        &self,
        space: RegisterSpace,
        range: AddressRange,
    ) -> Result<Vec<CoveredEntry>, ExceptionCode> {
        let map = &self.spaces[space.index()];
        if map.is_empty() {
            return Err(ExceptionCode::IllegalFunction);
        }

        let mut covered = Vec::new();
        let mut cursor = range.start;
        let mut remaining = range.count;
        while remaining > 0 {
            let entry = map.get(&cursor).ok_or(ExceptionCode::IllegalDataAddress)?;
            if entry.count > remaining {
                return Err(ExceptionCode::IllegalDataAddress);
            }
            covered.push(CoveredEntry {
                base: cursor,
                count: entry.count,
            });
            cursor = cursor.wrapping_add(entry.count);
            remaining -= entry.count;
        }
        Ok(covered)
    }

    fn invoke_read_hook(&mut self, space: RegisterSpace, address: u16) {
        // the hook is detached from its slot for the duration of the call, so
        // it can freely use the table without aliasing its own entry
        let hook = self.spaces[space.index()]
            .get_mut(&address)
            .and_then(|entry| entry.on_read.take());
        if let Some(mut hook) = hook {
            hook(self, space, address);
            if let Some(entry) = self.spaces[space.index()].get_mut(&address) {
                entry.on_read = Some(hook);
            }
        }
    }

    fn invoke_write_hook(&mut self, space: RegisterSpace, address: u16, values: &[u16]) {
        let hook = self.spaces[space.index()]
            .get_mut(&address)
            .and_then(|entry| entry.on_write.take());
        if let Some(mut hook) = hook {
            hook(self, space, address, values);
            if let Some(entry) = self.spaces[space.index()].get_mut(&address) {
                entry.on_write = Some(hook);
            }
        }
    }
}

struct CoveredEntry {
    base: u16,
    count: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn range(start: u16, count: u16) -> AddressRange {
        AddressRange::try_from(start, count).unwrap()
    }

    #[test]
    fn rejects_overlapping_entries_in_the_same_space() {
        let mut table = RegisterTable::new();
        table
            .define(RegisterSpace::InputRegister, "A", 0x0100, &[0, 0], None, None)
            .unwrap();

        // overlap from below
        assert_eq!(
            table.define(RegisterSpace::InputRegister, "B", 0x00FF, &[0, 0], None, None),
            Err(DefineError::AddressConflict(
                RegisterSpace::InputRegister,
                0x00FF,
                2
            ))
        );
        // overlap from above
        assert_eq!(
            table.define(RegisterSpace::InputRegister, "C", 0x0101, &[0], None, None),
            Err(DefineError::AddressConflict(
                RegisterSpace::InputRegister,
                0x0101,
                1
            ))
        );
        // same range in another space is fine
        table
            .define(RegisterSpace::HoldingRegister, "D", 0x0100, &[0, 0], None, None)
            .unwrap();
        // adjacent is fine
        table
            .define(RegisterSpace::InputRegister, "E", 0x0102, &[0], None, None)
            .unwrap();
    }

    #[test]
    fn rejects_invalid_definitions() {
        let mut table = RegisterTable::new();
        assert_eq!(
            table.define(RegisterSpace::Coil, "A", 0, &[], None, None),
            Err(DefineError::CountOfZero)
        );
        assert_eq!(
            table.define(RegisterSpace::Coil, "B", u16::MAX, &[0, 0], None, None),
            Err(DefineError::AddressOverflow(u16::MAX, 2))
        );
        assert_eq!(
            table.define(RegisterSpace::Coil, "C", 0, &[2], None, None),
            Err(DefineError::BitValueOutOfRange(2))
        );
    }

    #[test]
    fn round_trips_written_values() {
        let mut table = RegisterTable::new();
        for i in 0..4u16 {
            table
                .define(
                    RegisterSpace::Coil,
                    &format!("DO{i}"),
                    0x0100 + i,
                    &[0],
                    None,
                    None,
                )
                .unwrap();
        }

        assert_eq!(table.read(RegisterSpace::Coil, range(0x0100, 4)), Ok(vec![0, 0, 0, 0]));
        table
            .write(RegisterSpace::Coil, range(0x0100, 4), &[1, 0, 1, 1])
            .unwrap();
        assert_eq!(
            table.read(RegisterSpace::Coil, range(0x0100, 4)),
            Ok(vec![1, 0, 1, 1])
        );
    }

    #[test]
    fn preserves_word_order_for_multi_word_entries() {
        let mut table = RegisterTable::new();
        table
            .define(RegisterSpace::InputRegister, "ONE", 0x10, &[0xAAAA], None, None)
            .unwrap();
        table
            .define(
                RegisterSpace::InputRegister,
                "TWO",
                0x20,
                &[0x1111, 0x2222],
                None,
                None,
            )
            .unwrap();
        table
            .define(
                RegisterSpace::InputRegister,
                "THREE",
                0x30,
                &[0x0002, 0x0001, 0x0000],
                None,
                None,
            )
            .unwrap();

        assert_eq!(
            table.read(RegisterSpace::InputRegister, range(0x10, 1)),
            Ok(vec![0xAAAA])
        );
        assert_eq!(
            table.read(RegisterSpace::InputRegister, range(0x20, 2)),
            Ok(vec![0x1111, 0x2222])
        );
        assert_eq!(
            table.read(RegisterSpace::InputRegister, range(0x30, 3)),
            Ok(vec![0x0002, 0x0001, 0x0000])
        );
    }

    #[test]
    fn fails_with_illegal_data_address_when_range_is_not_tiled_by_entries() {
        let mut table = RegisterTable::new();
        table
            .define(RegisterSpace::InputRegister, "A", 0x0400, &[0, 0], None, None)
            .unwrap();
        table
            .define(RegisterSpace::InputRegister, "B", 0x0402, &[0, 0], None, None)
            .unwrap();

        // spanning adjacent entries works
        assert!(table.read(RegisterSpace::InputRegister, range(0x0400, 4)).is_ok());
        // mid-entry start
        assert_eq!(
            table.read(RegisterSpace::InputRegister, range(0x0401, 1)),
            Err(ExceptionCode::IllegalDataAddress)
        );
        // overhang past the last entry
        assert_eq!(
            table.read(RegisterSpace::InputRegister, range(0x0402, 3)),
            Err(ExceptionCode::IllegalDataAddress)
        );
        // entirely unmapped
        assert_eq!(
            table.read(RegisterSpace::InputRegister, range(0x0800, 1)),
            Err(ExceptionCode::IllegalDataAddress)
        );
    }

    #[test]
    fn empty_space_fails_with_illegal_function() {
        let mut table = RegisterTable::new();
        table
            .define(RegisterSpace::Coil, "A", 0, &[0], None, None)
            .unwrap();

        assert_eq!(
            table.read(RegisterSpace::HoldingRegister, range(0, 1)),
            Err(ExceptionCode::IllegalFunction)
        );
        assert_eq!(
            table.write(RegisterSpace::HoldingRegister, range(0, 1), &[1]),
            Err(ExceptionCode::IllegalFunction)
        );
    }

    #[test]
    fn failed_write_never_partially_succeeds() {
        let mut table = RegisterTable::new();
        table
            .define(RegisterSpace::HoldingRegister, "A", 0x00, &[0], None, None)
            .unwrap();

        // second address is unmapped, so nothing may change
        assert_eq!(
            table.write(RegisterSpace::HoldingRegister, range(0x00, 2), &[7, 8]),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(table.holding_register(0x00), Some(0));
    }

    #[test]
    fn write_to_read_only_space_fails() {
        let mut table = RegisterTable::new();
        table
            .define(RegisterSpace::DiscreteInput, "DI0", 0, &[0], None, None)
            .unwrap();
        assert_eq!(
            table.write(RegisterSpace::DiscreteInput, range(0, 1), &[1]),
            Err(ExceptionCode::IllegalDataAddress)
        );
    }

    #[test]
    fn read_hook_refreshes_the_value_before_it_is_returned() {
        let mut table = RegisterTable::new();
        let samples = Arc::new(AtomicUsize::new(41));
        let sampler = samples.clone();
        table
            .define(
                RegisterSpace::InputRegister,
                "ADC0",
                0x0200,
                &[0],
                Some(Box::new(move |table, _space, address| {
                    let sample = sampler.fetch_add(1, Ordering::SeqCst) + 1;
                    table.set_input_registers(address, &[sample as u16]);
                })),
                None,
            )
            .unwrap();

        assert_eq!(
            table.read(RegisterSpace::InputRegister, range(0x0200, 1)),
            Ok(vec![42])
        );
        assert_eq!(
            table.read(RegisterSpace::InputRegister, range(0x0200, 1)),
            Ok(vec![43])
        );
    }

    #[test]
    fn write_hook_runs_after_the_value_is_stored() {
        let mut table = RegisterTable::new();
        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = observed.clone();
        table
            .define(
                RegisterSpace::Coil,
                "DO0",
                0x0100,
                &[0],
                None,
                Some(Box::new(move |table, _space, address, values| {
                    // the table already holds the new value when the hook runs
                    let stored = table.coil(address).unwrap();
                    sink.lock().unwrap().push((values.to_vec(), stored));
                })),
            )
            .unwrap();

        table
            .write(RegisterSpace::Coil, range(0x0100, 1), &[1])
            .unwrap();
        table
            .write(RegisterSpace::Coil, range(0x0100, 1), &[0])
            .unwrap();

        assert_eq!(
            observed.lock().unwrap().as_slice(),
            &[(vec![1], true), (vec![0], false)]
        );
    }

    #[test]
    fn hooks_run_for_every_covered_entry() {
        let mut table = RegisterTable::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for i in 0..3u16 {
            let counter = calls.clone();
            table
                .define(
                    RegisterSpace::DiscreteInput,
                    &format!("DI{i}"),
                    i,
                    &[0],
                    Some(Box::new(move |_table, _space, _address| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })),
                    None,
                )
                .unwrap();
        }

        table.read(RegisterSpace::DiscreteInput, range(0, 3)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn setters_leave_state_unchanged_on_shape_mismatch() {
        let mut table = RegisterTable::new();
        table
            .define(RegisterSpace::InputRegister, "CNT1", 0x0400, &[1, 2], None, None)
            .unwrap();

        // length mismatch
        assert!(!table.set_input_registers(0x0400, &[0]));
        // not the base address
        assert!(!table.set_input_registers(0x0401, &[0, 0]));
        assert_eq!(
            table.read(RegisterSpace::InputRegister, range(0x0400, 2)),
            Ok(vec![1, 2])
        );

        assert!(table.set_input_registers(0x0400, &[3, 4]));
        assert_eq!(
            table.read(RegisterSpace::InputRegister, range(0x0400, 2)),
            Ok(vec![3, 4])
        );
    }
}
