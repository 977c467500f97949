//! Register map of an Ethernet/serial I/O expander with four digital
//! outputs, eleven digital inputs, two analog inputs, and five edge counters,
//! wired to a simulated I/O module.

use std::sync::{Arc, Mutex};

use iobus::{DefineError, RegisterSpace, RegisterTable};

// model name, two words of packed ASCII ("IO", "C")
const MODEL: [u16; 2] = [0x494F, 0x4300];
// firmware version: major, minor, patch
const VERSION: [u16; 3] = [2, 0, 0];

// Coils (0x) - Read/Write
const DO_BASE: u16 = 0x0100; // digital outputs 0..3
const COUNT_EN_BASE: u16 = 0x0300; // counter enable bits
const COUNT_RST_BASE: u16 = 0x0310; // counter reset bits, self-clearing

// Contacts (1x) - Read Only
const DI_BASE: u16 = 0x0000; // digital inputs 0..10

// Input Registers (3x) - Read Only
const ANV_BASE: u16 = 0x0200; // analog inputs (mV)
const ANA_BASE: u16 = 0x0210; // analog inputs (uA)
const COUNT_VALUE_BASE: u16 = 0x0400; // two words per counter
const MODEL_ADD: u16 = 0x0F00;
const VERSION_ADD: u16 = 0x0F10;

pub const NUM_OUTPUTS: usize = 4;
pub const NUM_INPUTS: usize = 11;
pub const NUM_ANALOG: usize = 2;

/// input channels that can be switched into edge-counting mode
pub const COUNTER_CHANNELS: [usize; 5] = [1, 3, 5, 7, 9];

#[derive(Clone, Copy, Debug, Default)]
struct CounterSlot {
    enabled: bool,
    count: u32,
}

/// Edge counter state for the countable input channels, indexed by channel
/// id through a fixed mapping validated at construction.
#[derive(Debug, Default)]
pub struct CounterBank {
    slots: [CounterSlot; COUNTER_CHANNELS.len()],
}

impl CounterBank {
    fn index_of(channel: usize) -> Option<usize> {
        COUNTER_CHANNELS.iter().position(|x| *x == channel)
    }

    /// switch a channel into counting mode. Returns false if the channel is
    /// not countable or was already counting.
    pub fn enable(&mut self, channel: usize) -> bool {
        match Self::index_of(channel) {
            Some(index) if !self.slots[index].enabled => {
                self.slots[index].enabled = true;
                self.slots[index].count = 0;
                true
            }
            _ => false,
        }
    }

    /// switch a channel back to plain input mode. Returns false if it was
    /// not counting.
    pub fn disable(&mut self, channel: usize) -> bool {
        match Self::index_of(channel) {
            Some(index) if self.slots[index].enabled => {
                self.slots[index].enabled = false;
                true
            }
            _ => false,
        }
    }

    pub fn reset(&mut self, channel: usize) {
        if let Some(index) = Self::index_of(channel) {
            self.slots[index].count = 0;
        }
    }

    pub fn is_enabled(&self, channel: usize) -> bool {
        Self::index_of(channel).is_some_and(|index| self.slots[index].enabled)
    }

    pub fn count(&self, channel: usize) -> u32 {
        Self::index_of(channel).map_or(0, |index| self.slots[index].count)
    }

    /// record falling edges observed on a counting channel
    pub fn add_edges(&mut self, channel: usize, edges: u32) {
        if let Some(index) = Self::index_of(channel) {
            if self.slots[index].enabled {
                self.slots[index].count = self.slots[index].count.wrapping_add(edges);
            }
        }
    }

    /// The two register words holding a counter value, most-significant word
    /// first. The deployed layout packs the high word as `count >> 8` rather
    /// than a 32-bit split across the two registers; masters in the field
    /// depend on this.
    pub fn value_words(&self, channel: usize) -> [u16; 2] {
        let count = self.count(channel);
        [(count >> 8) as u16, (count & 0xFFFF) as u16]
    }
}

/// Simulated I/O module standing in for the hardware abstraction: output
/// drivers, input pins, analog front-end, and the counter bank.
#[derive(Debug, Default)]
pub struct IoModule {
    pub douts: [bool; NUM_OUTPUTS],
    pub dins: [bool; NUM_INPUTS],
    pub analog_mv: [u16; NUM_ANALOG],
    pub analog_ua: [u16; NUM_ANALOG],
    pub counters: CounterBank,
}

pub type SharedIo = Arc<Mutex<IoModule>>;

fn counter_value_addr(index: usize) -> u16 {
    COUNT_VALUE_BASE + 2 * index as u16
}

/// Build the register table of the expander against the given I/O module.
///
/// Holding registers are declared in the map layout but unused in this
/// deployment, so requests against them answer with IllegalFunction.
pub fn build_table(io: &SharedIo) -> Result<RegisterTable, DefineError> {
    let mut table = RegisterTable::new();

    // digital outputs: applying the write is the hook's job
    for i in 0..NUM_OUTPUTS {
        let io = io.clone();
        table.define(
            RegisterSpace::Coil,
            &format!("DO{i}"),
            DO_BASE + i as u16,
            &[0],
            None,
            Some(Box::new(move |table, _space, _address, _values| {
                let mut io = io.lock().unwrap();
                for out in 0..NUM_OUTPUTS {
                    io.douts[out] = table.coil(DO_BASE + out as u16).unwrap_or(false);
                }
            })),
        )?;
    }

    // counter enables: switching a counter on clears its value registers
    for (i, channel) in COUNTER_CHANNELS.iter().enumerate() {
        let io = io.clone();
        let channel = *channel;
        table.define(
            RegisterSpace::Coil,
            &format!("COUNT{channel}_EN"),
            COUNT_EN_BASE + i as u16,
            &[0],
            None,
            Some(Box::new(move |table, _space, address, _values| {
                let mut io = io.lock().unwrap();
                if table.coil(address).unwrap_or(false) {
                    if io.counters.enable(channel) {
                        table.set_input_registers(counter_value_addr(i), &[0, 0]);
                    }
                } else {
                    io.counters.disable(channel);
                }
            })),
        )?;
    }

    // counter resets: the bit clears itself after performing the reset
    for (i, channel) in COUNTER_CHANNELS.iter().enumerate() {
        let io = io.clone();
        let channel = *channel;
        table.define(
            RegisterSpace::Coil,
            &format!("COUNT{channel}_RST"),
            COUNT_RST_BASE + i as u16,
            &[0],
            None,
            Some(Box::new(move |table, _space, address, _values| {
                if table.coil(address).unwrap_or(false) {
                    table.set_coil(address, false);
                    io.lock().unwrap().counters.reset(channel);
                    table.set_input_registers(counter_value_addr(i), &[0, 0]);
                }
            })),
        )?;
    }

    // digital inputs: refreshed from the pins before every read. A channel in
    // counting mode reads 0.
    for i in 0..NUM_INPUTS {
        let io = io.clone();
        table.define(
            RegisterSpace::DiscreteInput,
            &format!("DI{i}"),
            DI_BASE + i as u16,
            &[0],
            Some(Box::new(move |table, _space, _address| {
                let io = io.lock().unwrap();
                for pin in 0..NUM_INPUTS {
                    let value = if io.counters.is_enabled(pin) {
                        false
                    } else {
                        io.dins[pin]
                    };
                    table.set_discrete_input(DI_BASE + pin as u16, value);
                }
            })),
            None,
        )?;
    }

    // analog inputs, millivolts and microamps
    for i in 0..NUM_ANALOG {
        {
            let io = io.clone();
            table.define(
                RegisterSpace::InputRegister,
                &format!("ANV{i}"),
                ANV_BASE + i as u16,
                &[0],
                Some(Box::new(move |table, _space, _address| {
                    let io = io.lock().unwrap();
                    for ch in 0..NUM_ANALOG {
                        table.set_input_registers(ANV_BASE + ch as u16, &[io.analog_mv[ch]]);
                    }
                })),
                None,
            )?;
        }
        {
            let io = io.clone();
            table.define(
                RegisterSpace::InputRegister,
                &format!("ANA{i}"),
                ANA_BASE + i as u16,
                &[0],
                Some(Box::new(move |table, _space, _address| {
                    let io = io.lock().unwrap();
                    for ch in 0..NUM_ANALOG {
                        table.set_input_registers(ANA_BASE + ch as u16, &[io.analog_ua[ch]]);
                    }
                })),
                None,
            )?;
        }
    }

    // counter values, two words each
    for (i, channel) in COUNTER_CHANNELS.iter().enumerate() {
        let io = io.clone();
        let channel = *channel;
        table.define(
            RegisterSpace::InputRegister,
            &format!("COUNT{channel}"),
            counter_value_addr(i),
            &[0, 0],
            Some(Box::new(move |table, _space, address| {
                let io = io.lock().unwrap();
                if io.counters.is_enabled(channel) {
                    table.set_input_registers(address, &io.counters.value_words(channel));
                }
            })),
            None,
        )?;
    }

    // device identity, constant
    table.define(RegisterSpace::InputRegister, "MODEL", MODEL_ADD, &MODEL, None, None)?;
    table.define(
        RegisterSpace::InputRegister,
        "VERSION",
        VERSION_ADD,
        &VERSION,
        None,
        None,
    )?;

    Ok(table)
}
