use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use serial_bridge::bridge::{Bridge, BridgeOptions, ScriptedConsole, ScriptedWaiter};
use serial_bridge::matcher::DisconnectMatcher;
use serial_bridge::port::MockSerialPort;
use serial_bridge::session::count_lines;
use serial_bridge::StopFlag;
use std::hint::black_box;
use std::time::Duration;

fn sample_traffic(len: usize) -> Vec<u8> {
    b"OK\r\n+CSQ: 21,99\r\nREADY\r\n"
        .iter()
        .copied()
        .cycle()
        .take(len)
        .collect()
}

pub fn bench_matcher(c: &mut Criterion) {
    let data = sample_traffic(64 * 1024);
    let mut group = c.benchmark_group("matcher");
    group.throughput(Throughput::Bytes(data.len() as u64));

    for trigger in ["Bye\r", "NO CARRIER\r\n"] {
        group.bench_function(format!("feed/{}", trigger.escape_debug()), |b| {
            let mut matcher = DisconnectMatcher::new(trigger).unwrap();
            b.iter(|| {
                for &byte in black_box(&data) {
                    black_box(matcher.feed(byte));
                }
            })
        });
    }

    group.bench_function("count_lines", |b| b.iter(|| count_lines(black_box(&data))));
    group.finish();
}

pub fn bench_relay(c: &mut Criterion) {
    let data = sample_traffic(16 * 1024);
    let mut group = c.benchmark_group("relay");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("drain_one_tick", |b| {
        b.iter(|| {
            let mut port = MockSerialPort::new("BENCH");
            port.enqueue_read(&data);
            let mut console = ScriptedConsole::new();
            let mut bridge = Bridge::new(
                BridgeOptions::default(),
                DisconnectMatcher::new("Bye\r").unwrap(),
            );
            bridge
                .tick(&mut port, &mut console, &mut ScriptedWaiter::new(), &StopFlag::new())
                .unwrap();
            black_box(console.output().len())
        })
    });
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_millis(300))
        .measurement_time(Duration::from_secs(2));
    targets = bench_matcher, bench_relay
}
criterion_main!(benches);
