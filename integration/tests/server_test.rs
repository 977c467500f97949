//! Black-box tests driving a live TCP server with hand-built MBAP frames.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Duration;

use iobus::{RegisterSpace, RegisterTable, Server, TcpServerConfig, UnitId};

const UNIT_ID: u8 = 0xFF;

// register layout of the expander fixture
const DO_BASE: u16 = 0x0100;
const COUNT_EN_BASE: u16 = 0x0300;
const COUNT_RST_BASE: u16 = 0x0310;
const DI_BASE: u16 = 0x0000;
const COUNT_VALUE_BASE: u16 = 0x0400;
const VERSION_ADD: u16 = 0x0F10;

const COUNTER_CHANNELS: [usize; 5] = [1, 3, 5, 7, 9];

/// simulated edge counter bank, indexed by channel id
#[derive(Default)]
struct CounterBank {
    enabled: [bool; 5],
    count: [u32; 5],
}

impl CounterBank {
    fn index_of(channel: usize) -> Option<usize> {
        COUNTER_CHANNELS.iter().position(|x| *x == channel)
    }

    fn enable(&mut self, channel: usize) -> bool {
        match Self::index_of(channel) {
            Some(i) if !self.enabled[i] => {
                self.enabled[i] = true;
                self.count[i] = 0;
                true
            }
            _ => false,
        }
    }

    fn disable(&mut self, channel: usize) {
        if let Some(i) = Self::index_of(channel) {
            self.enabled[i] = false;
        }
    }

    fn is_enabled(&self, channel: usize) -> bool {
        Self::index_of(channel).is_some_and(|i| self.enabled[i])
    }

    fn reset(&mut self, channel: usize) {
        if let Some(i) = Self::index_of(channel) {
            self.count[i] = 0;
        }
    }

    fn add_edges(&mut self, channel: usize, edges: u32) {
        if let Some(i) = Self::index_of(channel) {
            if self.enabled[i] {
                self.count[i] = self.count[i].wrapping_add(edges);
            }
        }
    }

    // the deployed layout packs the high word as count >> 8
    fn value_words(&self, channel: usize) -> [u16; 2] {
        let count = Self::index_of(channel).map_or(0, |i| self.count[i]);
        [(count >> 8) as u16, (count & 0xFFFF) as u16]
    }
}

type SharedCounters = Arc<Mutex<CounterBank>>;

fn counter_value_addr(index: usize) -> u16 {
    COUNT_VALUE_BASE + 2 * index as u16
}

/// expander-style register map: DO coils, counter enable/reset coils, DI
/// contacts, counter value registers, a 3-word version register, and no
/// holding registers at all
fn build_fixture_table(counters: &SharedCounters) -> RegisterTable {
    let mut table = RegisterTable::new();

    for i in 0..4u16 {
        table
            .define(RegisterSpace::Coil, &format!("DO{i}"), DO_BASE + i, &[0], None, None)
            .unwrap();
    }

    for (i, channel) in COUNTER_CHANNELS.iter().enumerate() {
        let counters = counters.clone();
        let channel = *channel;
        table
            .define(
                RegisterSpace::Coil,
                &format!("COUNT{channel}_EN"),
                COUNT_EN_BASE + i as u16,
                &[0],
                None,
                Some(Box::new(move |table, _space, address, _values| {
                    let mut counters = counters.lock().unwrap();
                    if table.coil(address).unwrap_or(false) {
                        if counters.enable(channel) {
                            table.set_input_registers(counter_value_addr(i), &[0, 0]);
                        }
                    } else {
                        counters.disable(channel);
                    }
                })),
            )
            .unwrap();
    }

    for (i, channel) in COUNTER_CHANNELS.iter().enumerate() {
        let counters = counters.clone();
        let channel = *channel;
        table
            .define(
                RegisterSpace::Coil,
                &format!("COUNT{channel}_RST"),
                COUNT_RST_BASE + i as u16,
                &[0],
                None,
                Some(Box::new(move |table, _space, address, _values| {
                    if table.coil(address).unwrap_or(false) {
                        table.set_coil(address, false);
                        counters.lock().unwrap().reset(channel);
                        table.set_input_registers(counter_value_addr(i), &[0, 0]);
                    }
                })),
            )
            .unwrap();
    }

    for i in 0..11usize {
        let counters = counters.clone();
        table
            .define(
                RegisterSpace::DiscreteInput,
                &format!("DI{i}"),
                DI_BASE + i as u16,
                &[0],
                Some(Box::new(move |table, _space, _address| {
                    // a channel in counting mode reads 0
                    let counters = counters.lock().unwrap();
                    for pin in 0..11usize {
                        if counters.is_enabled(pin) {
                            table.set_discrete_input(DI_BASE + pin as u16, false);
                        }
                    }
                })),
                None,
            )
            .unwrap();
    }

    for (i, channel) in COUNTER_CHANNELS.iter().enumerate() {
        let counters = counters.clone();
        let channel = *channel;
        table
            .define(
                RegisterSpace::InputRegister,
                &format!("COUNT{channel}"),
                counter_value_addr(i),
                &[0, 0],
                Some(Box::new(move |table, _space, address| {
                    let counters = counters.lock().unwrap();
                    if counters.is_enabled(channel) {
                        table.set_input_registers(address, &counters.value_words(channel));
                    }
                })),
                None,
            )
            .unwrap();
    }

    table
        .define(RegisterSpace::InputRegister, "VERSION", VERSION_ADD, &[2, 0, 0], None, None)
        .unwrap();

    table
}

async fn start_server() -> (std::net::SocketAddr, SharedCounters) {
    let counters: SharedCounters = Arc::new(Mutex::new(CounterBank::default()));
    let table = build_fixture_table(&counters);

    let config = TcpServerConfig::new("127.0.0.1:0".parse().unwrap())
        .max_connections(2)
        .unit_filter(vec![UnitId::new(UNIT_ID)]);
    let mut server = Server::bind_tcp(table, config).await.unwrap();
    let addr = server.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            server.process(Duration::from_millis(10)).await;
        }
    });

    (addr, counters)
}

async fn send_frame(stream: &mut TcpStream, tx_id: u16, unit_id: u8, pdu: &[u8]) {
    let mut frame = Vec::with_capacity(7 + pdu.len());
    frame.extend_from_slice(&tx_id.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
    frame.push(unit_id);
    frame.extend_from_slice(pdu);
    stream.write_all(&frame).await.unwrap();
}

/// read one response frame, returning (tx_id, unit_id, pdu)
async fn read_frame(stream: &mut TcpStream) -> (u16, u8, Vec<u8>) {
    let read = async {
        let mut header = [0u8; 7];
        stream.read_exact(&mut header).await.unwrap();
        let tx_id = u16::from_be_bytes([header[0], header[1]]);
        let protocol_id = u16::from_be_bytes([header[2], header[3]]);
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        assert_eq!(protocol_id, 0);
        assert!(length >= 1);
        let mut pdu = vec![0u8; length - 1];
        stream.read_exact(&mut pdu).await.unwrap();
        (tx_id, header[6], pdu)
    };
    tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .expect("timed out waiting for a response")
}

async fn round_trip(stream: &mut TcpStream, tx_id: u16, pdu: &[u8]) -> Vec<u8> {
    send_frame(stream, tx_id, UNIT_ID, pdu).await;
    let (rx_tx_id, rx_unit, response) = read_frame(stream).await;
    assert_eq!(rx_tx_id, tx_id);
    assert_eq!(rx_unit, UNIT_ID);
    response
}

fn read_coils_pdu(start: u16, count: u16) -> Vec<u8> {
    let mut pdu = vec![0x01];
    pdu.extend_from_slice(&start.to_be_bytes());
    pdu.extend_from_slice(&count.to_be_bytes());
    pdu
}

fn read_input_registers_pdu(start: u16, count: u16) -> Vec<u8> {
    let mut pdu = vec![0x04];
    pdu.extend_from_slice(&start.to_be_bytes());
    pdu.extend_from_slice(&count.to_be_bytes());
    pdu
}

fn write_single_coil_pdu(address: u16, on: bool) -> Vec<u8> {
    let mut pdu = vec![0x05];
    pdu.extend_from_slice(&address.to_be_bytes());
    pdu.extend_from_slice(if on { &[0xFF, 0x00] } else { &[0x00, 0x00] });
    pdu
}

#[tokio::test]
async fn reads_do_group_as_a_single_zero_byte() {
    let (addr, _counters) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let response = round_trip(&mut stream, 0x0001, &read_coils_pdu(DO_BASE, 4)).await;
    assert_eq!(response, vec![0x01, 0x01, 0x00]);
}

#[tokio::test]
async fn echoes_transaction_ids_across_interleaved_sockets() {
    let (addr, _counters) = start_server().await;
    let mut a = TcpStream::connect(addr).await.unwrap();
    let mut b = TcpStream::connect(addr).await.unwrap();

    let pdu = read_coils_pdu(DO_BASE, 1);

    send_frame(&mut a, 0x1111, UNIT_ID, &pdu).await;
    send_frame(&mut b, 0x2222, UNIT_ID, &pdu).await;

    let (tx_b, _, _) = read_frame(&mut b).await;
    let (tx_a, _, _) = read_frame(&mut a).await;
    assert_eq!(tx_a, 0x1111);
    assert_eq!(tx_b, 0x2222);

    // again, in the other order, on the same connections
    send_frame(&mut b, 0x4444, UNIT_ID, &pdu).await;
    send_frame(&mut a, 0x3333, UNIT_ID, &pdu).await;

    let (tx_a, _, _) = read_frame(&mut a).await;
    let (tx_b, _, _) = read_frame(&mut b).await;
    assert_eq!(tx_a, 0x3333);
    assert_eq!(tx_b, 0x4444);
}

#[tokio::test]
async fn enabling_a_counter_clears_its_value_and_arms_the_channel() {
    let (addr, counters) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // seed a stale value so the clear is observable
    counters.lock().unwrap().count[0] = 99;

    let response =
        round_trip(&mut stream, 0x0001, &write_single_coil_pdu(COUNT_EN_BASE, true)).await;
    // write single coil echoes the request
    assert_eq!(response, vec![0x05, 0x03, 0x00, 0xFF, 0x00]);
    assert!(counters.lock().unwrap().is_enabled(1));

    let response =
        round_trip(&mut stream, 0x0002, &read_input_registers_pdu(COUNT_VALUE_BASE, 2)).await;
    assert_eq!(response, vec![0x04, 0x04, 0x00, 0x00, 0x00, 0x00]);

    // the armed channel's contact reads 0
    let mut pdu = vec![0x02];
    pdu.extend_from_slice(&(DI_BASE + 1).to_be_bytes());
    pdu.extend_from_slice(&1u16.to_be_bytes());
    let response = round_trip(&mut stream, 0x0003, &pdu).await;
    assert_eq!(response, vec![0x02, 0x01, 0x00]);
}

#[tokio::test]
async fn counter_value_uses_the_deployed_word_packing() {
    let (addr, counters) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    round_trip(&mut stream, 0x0001, &write_single_coil_pdu(COUNT_EN_BASE, true)).await;
    counters.lock().unwrap().add_edges(1, 0x0123);

    let response =
        round_trip(&mut stream, 0x0002, &read_input_registers_pdu(COUNT_VALUE_BASE, 2)).await;
    // high word is count >> 8, low word is count & 0xFFFF
    assert_eq!(response, vec![0x04, 0x04, 0x00, 0x01, 0x01, 0x23]);
}

#[tokio::test]
async fn counter_reset_bit_self_clears_and_zeroes_the_value() {
    let (addr, counters) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    round_trip(&mut stream, 0x0001, &write_single_coil_pdu(COUNT_EN_BASE, true)).await;
    counters.lock().unwrap().add_edges(1, 500);

    round_trip(&mut stream, 0x0002, &write_single_coil_pdu(COUNT_RST_BASE, true)).await;
    assert_eq!(counters.lock().unwrap().count[0], 0);

    // the reset bit reads back as 0
    let response = round_trip(&mut stream, 0x0003, &read_coils_pdu(COUNT_RST_BASE, 1)).await;
    assert_eq!(response, vec![0x01, 0x01, 0x00]);

    let response =
        round_trip(&mut stream, 0x0004, &read_input_registers_pdu(COUNT_VALUE_BASE, 2)).await;
    assert_eq!(response, vec![0x04, 0x04, 0x00, 0x00, 0x00, 0x00]);
}

#[tokio::test]
async fn holding_register_access_answers_illegal_function() {
    let (addr, _counters) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // no holding registers are defined in this map
    let response = round_trip(&mut stream, 0x0001, &[0x03, 0x00, 0x00, 0x00, 0x01]).await;
    assert_eq!(response, vec![0x83, 0x01]);

    let response = round_trip(&mut stream, 0x0002, &[0x06, 0x00, 0x00, 0x12, 0x34]).await;
    assert_eq!(response, vec![0x86, 0x01]);
}

#[tokio::test]
async fn unsupported_function_code_answers_illegal_function() {
    let (addr, _counters) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // 0x2B (read device identification) is not implemented
    let response = round_trip(&mut stream, 0x0001, &[0x2B, 0x0E, 0x01, 0x00]).await;
    assert_eq!(response, vec![0xAB, 0x01]);
}

#[tokio::test]
async fn unmapped_address_answers_illegal_data_address() {
    let (addr, _counters) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let response = round_trip(&mut stream, 0x0001, &read_coils_pdu(0x0200, 1)).await;
    assert_eq!(response, vec![0x81, 0x02]);

    // a range that runs past the DO group never partially succeeds
    let response = round_trip(&mut stream, 0x0002, &read_coils_pdu(DO_BASE, 5)).await;
    assert_eq!(response, vec![0x81, 0x02]);
}

#[tokio::test]
async fn write_multiple_coils_round_trips() {
    let (addr, _counters) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // write DO0..DO3 = 1,0,1,1 (0x0D)
    let mut pdu = vec![0x0F];
    pdu.extend_from_slice(&DO_BASE.to_be_bytes());
    pdu.extend_from_slice(&4u16.to_be_bytes());
    pdu.push(0x01);
    pdu.push(0x0D);
    let response = round_trip(&mut stream, 0x0001, &pdu).await;
    // the response echoes address and quantity
    assert_eq!(response, vec![0x0F, 0x01, 0x00, 0x00, 0x04]);

    let response = round_trip(&mut stream, 0x0002, &read_coils_pdu(DO_BASE, 4)).await;
    assert_eq!(response, vec![0x01, 0x01, 0x0D]);
}

#[tokio::test]
async fn byte_count_mismatch_answers_illegal_data_value() {
    let (addr, _counters) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // write multiple coils declaring 4 bits but carrying 2 bytes
    let mut pdu = vec![0x0F];
    pdu.extend_from_slice(&DO_BASE.to_be_bytes());
    pdu.extend_from_slice(&4u16.to_be_bytes());
    pdu.push(0x02);
    pdu.extend_from_slice(&[0x0D, 0x00]);
    let response = round_trip(&mut stream, 0x0001, &pdu).await;
    assert_eq!(response, vec![0x8F, 0x03]);

    // quantity of zero
    let response = round_trip(&mut stream, 0x0002, &read_coils_pdu(DO_BASE, 0)).await;
    assert_eq!(response, vec![0x81, 0x03]);
}

#[tokio::test]
async fn multi_word_version_register_reads_most_significant_word_first() {
    let (addr, _counters) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let response = round_trip(&mut stream, 0x0001, &read_input_registers_pdu(VERSION_ADD, 3)).await;
    assert_eq!(
        response,
        vec![0x04, 0x06, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00]
    );
}

#[tokio::test]
async fn frame_with_foreign_protocol_id_is_skipped() {
    let (addr, _counters) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // a frame with protocol id 0xCAFE is silently discarded
    let pdu = read_coils_pdu(DO_BASE, 1);
    let mut bad = Vec::new();
    bad.extend_from_slice(&0x0001u16.to_be_bytes());
    bad.extend_from_slice(&0xCAFEu16.to_be_bytes());
    bad.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
    bad.push(UNIT_ID);
    bad.extend_from_slice(&pdu);
    stream.write_all(&bad).await.unwrap();

    // the connection stays in sync and answers the next valid frame
    let response = round_trip(&mut stream, 0x0002, &pdu).await;
    assert_eq!(response, vec![0x01, 0x01, 0x00]);
}

#[tokio::test]
async fn frame_for_foreign_unit_id_is_dropped() {
    let (addr, _counters) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let pdu = read_coils_pdu(DO_BASE, 1);
    send_frame(&mut stream, 0x0001, 0x05, &pdu).await;

    // no response for unit 0x05; the next frame for our unit is answered
    let response = round_trip(&mut stream, 0x0002, &pdu).await;
    assert_eq!(response, vec![0x01, 0x01, 0x00]);
}
