use armb::codec::{encode_frame, FrameHeader};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn header_round_trip(c: &mut Criterion) {
    let header = FrameHeader::new(9, 1_048_576).unwrap();

    c.bench_function("header_encode", |b| {
        b.iter(|| black_box(header).encode());
    });

    let encoded = header.encode();
    c.bench_function("header_parse", |b| {
        b.iter(|| FrameHeader::parse(black_box(&encoded)).unwrap());
    });
}

fn frame_encode(c: &mut Criterion) {
    let command = b"COMPLETE UPLOAD 100 100.png";
    let payload = vec![0u8; 64 * 1024];

    c.bench_function("encode_frame_64kb_payload", |b| {
        b.iter(|| encode_frame(black_box(command), black_box(&payload)).unwrap());
    });
}

criterion_group!(benches, header_round_trip, frame_encode);
criterion_main!(benches);
