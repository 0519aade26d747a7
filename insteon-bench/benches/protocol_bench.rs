//! Framing and codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use insteon_protocol::{
    apply_checksum, encode_insteon_send, Address, Field, FieldValue, Framer, MessageFlags,
    MessageType, PlmMessage,
};

/// Standard device ack relayed by the PLM.
const STANDARD_RX: [u8; 11] = [0x02, 0x50, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x2B, 0x11, 0xFF];

fn extended_rx() -> Vec<u8> {
    let mut frame = vec![0x02, 0x51, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x1B, 0x2F, 0x00];
    frame.extend((0u8..14).map(|i| i.wrapping_mul(17)));
    frame
}

/// `count` frames back to back, alternating standard and extended, with a
/// stray byte every tenth frame.
fn stream(count: usize) -> Vec<u8> {
    let extended = extended_rx();
    let mut data = Vec::new();
    for i in 0..count {
        if i % 10 == 9 {
            data.push(0xAA);
        }
        if i % 2 == 0 {
            data.extend_from_slice(&STANDARD_RX);
        } else {
            data.extend_from_slice(&extended);
        }
    }
    data
}

fn bench_framer(c: &mut Criterion) {
    let mut group = c.benchmark_group("framer");

    for count in [1, 16, 256] {
        let data = stream(count);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &data, |b, data| {
            b.iter(|| {
                let mut framer = Framer::new();
                framer.extend(data);
                let mut outputs = 0;
                while let Some(output) = framer.decode() {
                    black_box(output);
                    outputs += 1;
                }
                outputs
            });
        });
    }

    group.finish();
}

fn bench_framer_split_reads(c: &mut Criterion) {
    let data = stream(64);
    c.bench_function("framer_split_reads", |b| {
        b.iter(|| {
            let mut framer = Framer::new();
            for chunk in data.chunks(3) {
                framer.extend(chunk);
                while let Some(output) = framer.decode() {
                    black_box(output);
                }
            }
        });
    });
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    let extended = extended_rx();

    group.bench_function("standard", |b| {
        b.iter(|| black_box(PlmMessage::parse(black_box(&STANDARD_RX)).unwrap()));
    });
    group.bench_function("extended", |b| {
        b.iter(|| black_box(PlmMessage::parse(black_box(&extended)).unwrap()));
    });
    group.bench_function("extended_view", |b| {
        let msg = PlmMessage::parse(&extended).unwrap();
        b.iter(|| {
            let view = msg.insteon().unwrap();
            black_box((view.flags(), view.checksum_valid(), msg.fingerprint()))
        });
    });

    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let to = Address::new(0x11, 0x22, 0x33);

    group.bench_function("standard_send", |b| {
        let fields: [(Field, FieldValue<()>); 2] = [
            (Field::Cmd1, FieldValue::Constant(0x11)),
            (Field::Cmd2, FieldValue::Constant(0xFF)),
        ];
        b.iter(|| {
            let flags = MessageFlags::new(MessageType::Direct, false, 3);
            black_box(encode_insteon_send(to, flags, &fields, &()).unwrap().to_bytes())
        });
    });

    group.bench_function("extended_send_checksum", |b| {
        let fields: [(Field, FieldValue<()>); 4] = [
            (Field::Cmd1, FieldValue::Constant(0x2F)),
            (Field::Cmd2, FieldValue::Constant(0x00)),
            (Field::Usr(2), FieldValue::Constant(0x00)),
            (Field::Usr(3), FieldValue::Constant(0x0F)),
        ];
        b.iter(|| {
            let flags = MessageFlags::new(MessageType::Direct, true, 3);
            let mut msg = encode_insteon_send(to, flags, &fields, &()).unwrap();
            apply_checksum(&mut msg).unwrap();
            black_box(msg.to_bytes())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_framer, bench_framer_split_reads, bench_parse, bench_encode);
criterion_main!(benches);
