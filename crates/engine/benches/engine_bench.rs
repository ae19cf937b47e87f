use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use engine::WriteBatch;
use format::{BytewiseComparator, InternalKeyComparator, LookupKey, ValueType};
use memtable::MemTable;

fn bench_write_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_batch");
    group.throughput(Throughput::Elements(100));
    group.bench_function("encode_100_puts", |b| {
        b.iter(|| {
            let mut batch = WriteBatch::new();
            for i in 0..100u32 {
                let key = format!("key-{i:06}");
                batch.put(key.as_bytes(), b"value-payload");
            }
            black_box(batch.approximate_size())
        })
    });
    group.finish();
}

fn bench_memtable(c: &mut Criterion) {
    let mut group = c.benchmark_group("memtable");
    group.throughput(Throughput::Elements(1));

    group.bench_function("add", |b| {
        let mem = MemTable::new(InternalKeyComparator::new(Arc::new(BytewiseComparator)));
        let mut seq = 0u64;
        b.iter(|| {
            seq += 1;
            let key = format!("key-{:08}", seq % 100_000);
            mem.add(seq, ValueType::Value, key.as_bytes(), b"value-payload");
        })
    });

    group.bench_function("get_hit", |b| {
        let mem = MemTable::new(InternalKeyComparator::new(Arc::new(BytewiseComparator)));
        for i in 0..10_000u64 {
            let key = format!("key-{i:08}");
            mem.add(i + 1, ValueType::Value, key.as_bytes(), b"value-payload");
        }
        let mut i = 0u64;
        b.iter(|| {
            i = (i + 7919) % 10_000;
            let key = format!("key-{i:08}");
            black_box(mem.get(&LookupKey::new(key.as_bytes(), u64::MAX >> 8)))
        })
    });

    group.finish();
}

fn bench_wal(c: &mut Criterion) {
    let mut group = c.benchmark_group("wal");
    let payload = vec![0xabu8; 1024];
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("append_1k", |b| {
        let mut writer = wal::Writer::new(Vec::with_capacity(64 << 20));
        b.iter(|| writer.add_record(black_box(&payload)).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_write_batch, bench_memtable, bench_wal);
criterion_main!(benches);
