//! A Modbus server engine for I/O expander modules, using [Tokio](https://docs.rs/tokio)
//! and Rust's `async/await` syntax.
//!
//! The crate targets devices that expose digital inputs/outputs, analog
//! inputs, and edge counters as Modbus register spaces: the register map is
//! declared once at startup, the engine is constructed around it, and a
//! single cooperative host loop drives the engine with bounded polls so it
//! can interleave its own periodic work (status LED, watchdog).
//!
//! # Features
//!
//! * Modbus TCP with a fixed pool of connections served round-robin
//! * Modbus RTU over serial (`serial` feature, on by default)
//! * Declarative register table with optional per-entry read/write hooks
//! * Panic-free parsing, bounded per-call latency
//!
//! # Supported functions
//!
//! * Read Coils / Read Discrete Inputs
//! * Read Holding Registers / Read Input Registers
//! * Write Single Coil / Write Single Register
//! * Write Multiple Coils / Write Multiple Registers
//!
//! # Example
//!
//! ```no_run
//! use iobus::{RegisterSpace, RegisterTable, Server, TcpServerConfig};
//! use std::time::Duration;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut table = RegisterTable::new();
//!     table.define(RegisterSpace::Coil, "DO0", 0x0100, &[0], None, None)?;
//!
//!     let config = TcpServerConfig::new("0.0.0.0:502".parse()?);
//!     let mut server = Server::bind_tcp(table, config).await?;
//!
//!     loop {
//!         server.process(Duration::from_millis(50)).await;
//!         // feed the watchdog, blink the status LED, ...
//!     }
//! }
//! ```

/// frame decoding log levels
pub mod decode;
/// error types used throughout the crate
pub mod error;
/// Modbus exception codes
pub mod exception;
/// the register table and its hook types
pub mod table;
/// the server engine
pub mod server;
/// public types used throughout the API
pub mod types;

/// TCP-specific configuration and collaborator interfaces
pub mod tcp;

/// serial-specific configuration
#[cfg(feature = "serial")]
pub mod serial;

// internal modules
pub(crate) mod common;
pub(crate) mod constants;

pub use crate::decode::{AppDecodeLevel, DecodeLevel, FrameDecodeLevel, PhysDecodeLevel};
pub use crate::error::RequestError;
pub use crate::exception::ExceptionCode;
pub use crate::server::Server;
pub use crate::table::{DefineError, ReadHook, RegisterTable, WriteHook};
pub use crate::tcp::{AlwaysUp, LinkMonitor, TcpServerConfig};
pub use crate::types::{AddressRange, Indexed, RegisterSpace, UnitId};

#[cfg(feature = "serial")]
pub use crate::serial::{
    DataBits, FlowControl, Parity, RtuServerConfig, SerialSettings, StopBits,
};
