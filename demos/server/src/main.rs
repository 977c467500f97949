//! Demo server exposing the expander register map over Modbus TCP or RTU.
//!
//! The host loop mirrors what runs on the real device: one bounded engine
//! poll per iteration, with the status blink (and, on hardware, the watchdog
//! feed) interleaved on a fixed cadence.

mod expander;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use tokio::time::{Duration, Instant};

use iobus::{
    AppDecodeLevel, DecodeLevel, FrameDecodeLevel, PhysDecodeLevel, RtuServerConfig, Server,
    TcpServerConfig, UnitId,
};

#[derive(Parser)]
#[command(name = "demo-server", about = "Modbus I/O expander demo server")]
struct Args {
    /// log protocol traffic at increasing detail (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    transport: TransportArgs,
}

#[derive(Subcommand)]
enum TransportArgs {
    /// serve Modbus TCP
    Tcp {
        /// local address and port to listen on
        #[arg(long, default_value = "0.0.0.0:502")]
        addr: SocketAddr,
        /// number of connection slots
        #[arg(long, default_value_t = TcpServerConfig::DEFAULT_MAX_CONNECTIONS)]
        max_connections: usize,
        /// only answer frames for this unit id
        #[arg(long, default_value_t = 0xFF)]
        unit_id: u8,
    },
    /// serve Modbus RTU over a serial port
    Rtu {
        /// path of the serial device
        #[arg(long, default_value = "/dev/ttyUSB0")]
        path: String,
        /// baud rate of the bus
        #[arg(long, default_value_t = 19200)]
        baud: u32,
        /// unit id of this server
        #[arg(long, default_value_t = 1)]
        unit_id: u8,
    },
}

fn decode_level(verbose: u8) -> DecodeLevel {
    match verbose {
        0 => DecodeLevel::nothing(),
        1 => DecodeLevel::new(
            AppDecodeLevel::DataHeaders,
            FrameDecodeLevel::Nothing,
            PhysDecodeLevel::Nothing,
        ),
        2 => DecodeLevel::new(
            AppDecodeLevel::DataValues,
            FrameDecodeLevel::Header,
            PhysDecodeLevel::Nothing,
        ),
        _ => DecodeLevel::new(
            AppDecodeLevel::DataValues,
            FrameDecodeLevel::Payload,
            PhysDecodeLevel::Data,
        ),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let io = Arc::new(Mutex::new(expander::IoModule::default()));
    let table = expander::build_table(&io)?;

    let mut server = match args.transport {
        TransportArgs::Tcp {
            addr,
            max_connections,
            unit_id,
        } => {
            let config = TcpServerConfig::new(addr)
                .max_connections(max_connections)
                .unit_filter(vec![UnitId::new(unit_id)]);
            let server = Server::bind_tcp(table, config).await?;
            tracing::info!("listening on {}", addr);
            server
        }
        TransportArgs::Rtu {
            path,
            baud,
            unit_id,
        } => {
            let mut config = RtuServerConfig::new(&path, UnitId::new(unit_id));
            config.serial_settings.baud_rate = baud;
            let server = Server::open_rtu(table, config)?;
            tracing::info!("serving unit {unit_id} on {path} at {baud} baud");
            server
        }
    };

    server.set_decode_level(decode_level(args.verbose));

    // stand-in for the device's status LED / watchdog cadence
    const BLINK_PERIOD: Duration = Duration::from_millis(500);
    let mut blink_at = Instant::now() + BLINK_PERIOD;
    let mut led = false;

    loop {
        server.process(Duration::from_millis(50)).await;

        if Instant::now() >= blink_at {
            blink_at += BLINK_PERIOD;
            led = !led;

            // wiggle the simulated inputs so connected masters see activity
            {
                let mut io = io.lock().unwrap();
                io.dins[0] = led;
                io.analog_mv[0] = io.analog_mv[0].wrapping_add(100) % 10_000;
                io.analog_ua[0] = io.analog_ua[0].wrapping_add(50) % 20_000;
                for channel in expander::COUNTER_CHANNELS {
                    io.counters.add_edges(channel, 1);
                }
                tracing::trace!(
                    "status led: {}, outputs: {:?}",
                    if led { "on" } else { "off" },
                    io.douts
                );
            }
        }
    }
}
