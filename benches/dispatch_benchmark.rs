// dispatch_benchmark.rs - Performance benchmarks for the CIP dispatch path
//
// The dispatcher is the hot loop of the simulator: every SendRRData frame
// funnels through it. These benchmarks run it against in-memory state with
// no sockets involved.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use eip_sim::cip_dispatch::{self, ServerState};
use eip_sim::cip_message::CipRequest;
use eip_sim::cip_path::{build_logical, build_symbolic};
use eip_sim::{DeviceIdentity, ServerConfig, SessionRegistry, TagStore};

fn bench_state() -> ServerState {
    let config = ServerConfig::default();
    ServerState {
        identity: DeviceIdentity::from_config(&config),
        sessions: Arc::new(SessionRegistry::new()),
        tags: Arc::new(TagStore::generate(100)),
        wrap_unconnected_send: false,
    }
}

fn read_tag_request(symbol: &str) -> Vec<u8> {
    CipRequest {
        service: 0x4C,
        path: build_symbolic(symbol),
        data: vec![0x01, 0x00],
    }
    .encode()
}

fn benchmark_read_tag(c: &mut Criterion) {
    let state = bench_state();
    let request = read_tag_request("Sensor1A");
    c.bench_function("dispatch_read_tag", |b| {
        b.iter(|| cip_dispatch::dispatch(black_box(&request), &state))
    });
}

fn benchmark_get_attribute_all(c: &mut Criterion) {
    let state = bench_state();
    let request = CipRequest {
        service: 0x01,
        path: build_logical(0x01, 0x01, None),
        data: Vec::new(),
    }
    .encode();
    c.bench_function("dispatch_get_attribute_all", |b| {
        b.iter(|| cip_dispatch::dispatch(black_box(&request), &state))
    });
}

fn benchmark_multiple_service_packet(c: &mut Criterion) {
    let state = bench_state();
    let children: Vec<Vec<u8>> = (1..=10)
        .map(|i| read_tag_request(&format!("Tag_{}", i)))
        .collect();
    let mut data = Vec::new();
    data.extend_from_slice(&(children.len() as u16).to_le_bytes());
    let mut offset = 2 + 2 * children.len();
    for child in &children {
        data.extend_from_slice(&(offset as u16).to_le_bytes());
        offset += child.len();
    }
    for child in &children {
        data.extend_from_slice(child);
    }
    let request = CipRequest {
        service: 0x0A,
        path: Vec::new(),
        data,
    }
    .encode();

    c.bench_function("dispatch_multiple_service_packet_10", |b| {
        b.iter(|| cip_dispatch::dispatch(black_box(&request), &state))
    });
}

criterion_group!(
    benches,
    benchmark_read_tag,
    benchmark_get_attribute_all,
    benchmark_multiple_service_packet
);
criterion_main!(benches);
