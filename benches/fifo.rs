//! FIFO hot path: one callback's worth of write and read

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use loopback::audio::fifo::Fifo;

fn write_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("fifo_write_read");
    for &(frames, channels) in &[(64usize, 1usize), (240, 1), (240, 2), (1024, 2)] {
        let (mut writer, mut reader) = Fifo::<i16>::new(4 * frames, channels).unwrap().split();
        let block = vec![1i16; frames * channels];
        let mut out = vec![0i16; frames * channels];

        group.throughput(Throughput::Elements(frames as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{frames}x{channels}")),
            &frames,
            |b, _| {
                b.iter(|| {
                    writer.write(black_box(&block));
                    reader.read(black_box(&mut out))
                })
            },
        );
    }
    group.finish();
}

fn skip_backlog(c: &mut Criterion) {
    let (mut writer, mut reader) = Fifo::<i16>::new(1024, 1).unwrap().split();
    let block = vec![0i16; 240];
    c.bench_function("fifo_skip", |b| {
        b.iter(|| {
            writer.write(&block);
            writer.write(&block);
            reader.skip(black_box(usize::MAX))
        })
    });
}

criterion_group!(benches, write_read, skip_backlog);
criterion_main!(benches);
