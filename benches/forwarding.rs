use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_cefnd_common::message::{Message, MessageBuilder, Name};
use rust_cefnd_common::types::{FaceId, FaceType};
use rust_cefnd_fwd::config::{ForwarderConfig, PitConfig};
use rust_cefnd_fwd::face::FaceInfo;
use rust_cefnd_fwd::fib::RouteFlags;
use rust_cefnd_fwd::framer::{Frame, Framer};
use rust_cefnd_fwd::pit::{Pit, PitKey, PitType, SuppressionPolicy};
use rust_cefnd_fwd::Forwarder;
use std::time::{Duration, Instant};

struct AllUdp;

impl FaceInfo for AllUdp {
    fn is_active(&self, _face: FaceId) -> bool {
        true
    }

    fn face_type(&self, _face: FaceId) -> Option<FaceType> {
        Some(FaceType::Udp)
    }
}

fn interest(name: &str, chunk: u32) -> Bytes {
    MessageBuilder::interest(Name::from_string(name))
        .chunk(chunk)
        .encode()
        .unwrap()
}

fn bench_framer(c: &mut Criterion) {
    let mut group = c.benchmark_group("framer");
    let packet = interest("/bench/framer/segment", 0);
    let stream: Vec<u8> = (0..64).flat_map(|_| packet.iter().copied()).collect();
    group.throughput(Throughput::Bytes(stream.len() as u64));

    for chunk in [64usize, 1500, 16 * 1024] {
        group.bench_with_input(BenchmarkId::new("drain", chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                let mut framer = Framer::new();
                let mut frames = 0;
                for piece in stream.chunks(chunk) {
                    framer.push(piece);
                    frames += framer.drain().len();
                }
                black_box(frames)
            });
        });
    }
    group.finish();
}

fn bench_pit(c: &mut Criterion) {
    let mut group = c.benchmark_group("pit");
    let policy = SuppressionPolicy::default();
    let names: Vec<Name> = (0..1024).map(|i| Name::from_string(&format!("/bench/pit/{}", i))).collect();
    let object = MessageBuilder::object(Name::from_string("/bench/pit/7"), &b"x"[..])
        .build()
        .unwrap();

    group.bench_function("insert_and_satisfy", |b| {
        b.iter(|| {
            let now = Instant::now();
            let mut pit = Pit::new(&PitConfig::default());
            for (i, name) in names.iter().enumerate() {
                if let Some((entry, _)) = pit.lookup_or_create(PitKey::exact(name.clone(), None), PitType::Regular, now) {
                    entry.add_down_face(FaceId(1 + (i % 8) as u16), Duration::from_secs(4), i as u64, now, &policy);
                }
            }
            black_box(pit.deliver_and_drain(&object, now))
        });
    });
    group.finish();
}

fn bench_forwarder(c: &mut Criterion) {
    let mut group = c.benchmark_group("forwarder");
    let packets: Vec<Frame> = (0..256)
        .map(|i| {
            let msg = Message::parse(interest("/bench/fwd/data", i)).unwrap();
            Frame {
                bytes: msg.raw().clone(),
                header_len: msg.header_len,
            }
        })
        .collect();

    group.bench_function("interest_path", |b| {
        b.iter(|| {
            let mut fwd = Forwarder::new(ForwarderConfig::default()).unwrap();
            fwd.route_add(Name::from_string("/bench"), FaceId(2), RouteFlags::STATIC, 1)
                .unwrap();
            let now = Instant::now();
            let mut sent = 0;
            for frame in &packets {
                sent += fwd.handle_frame(FaceId(1), frame.clone(), &AllUdp, now).len();
            }
            black_box(sent)
        });
    });
    group.finish();
}

criterion_group!(benches, bench_framer, bench_pit, bench_forwarder);
criterion_main!(benches);
