// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receive-window throughput benchmarks: the admission and read paths a
//! transport thread drives per packet.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use hpgm::{Msgv, RxWindow, SequenceNumber, SkBuff, Tsi};

fn tsi() -> Tsi {
    Tsi::new([1, 2, 3, 4, 5, 6], 7500)
}

fn data(sequence: u32, payload: &[u8]) -> SkBuff {
    SkBuff::data(
        tsi(),
        SequenceNumber::new(sequence),
        SequenceNumber::new(100),
        payload.to_vec(),
    )
}

/// In-order stream: append, read, release every 64 packets.
fn bench_in_order_stream(c: &mut Criterion) {
    c.bench_function("rxw_in_order_64", |b| {
        let payload = vec![0x5a; 1400];
        b.iter(|| {
            let mut window = RxWindow::with_sqns(tsi(), 1500, 128);
            let mut msgv = vec![Msgv::default(); 64];
            for i in 0..64 {
                window.add(data(100 + i, &payload), 1);
            }
            let bytes = window.readv(&mut msgv);
            window.remove_commit();
            black_box(bytes)
        });
    });
}

/// Loss pattern: every fourth packet arrives late and fills its
/// placeholder through the insert path.
fn bench_gap_and_repair(c: &mut Criterion) {
    c.bench_function("rxw_gap_repair_64", |b| {
        let payload = vec![0x5a; 1400];
        b.iter(|| {
            let mut window = RxWindow::with_sqns(tsi(), 1500, 128);
            let mut msgv = vec![Msgv::default(); 64];
            for i in 0..64 {
                if i % 4 != 3 {
                    window.add(data(100 + i, &payload), 1);
                }
            }
            for i in 0..64 {
                if i % 4 == 3 {
                    window.add(data(100 + i, &payload), 1);
                }
            }
            let bytes = window.readv(&mut msgv);
            window.remove_commit();
            black_box(bytes)
        });
    });
}

criterion_group!(benches, bench_in_order_stream, bench_gap_and_repair);
criterion_main!(benches);
