//! Catalog benchmarks.
//!
//! Measures name lookups and address map construction, both on the path of
//! every parameter access or module bring-up.

use criterion::{Criterion, criterion_group, criterion_main};
use pixie_common::address::AddressMap;
use pixie_common::consts::Address;
use pixie_common::param::{self, Descriptors, Mode};
use std::hint::black_box;

fn loaded_descriptors(max_channels: usize) -> Descriptors {
    let mut descs = Descriptors::default();
    let mut addr: Address = 0x4a000;
    for d in descs.module.iter_mut().filter(|d| d.enabled()) {
        d.address = addr;
        addr += d.size as Address;
    }
    for ro in [false, true] {
        for d in descs
            .channel
            .iter_mut()
            .filter(|d| d.enabled() && (d.mode == Mode::ReadOnly) == ro)
        {
            d.address = addr;
            addr += (d.size * max_channels) as Address;
        }
    }
    descs
}

fn bench_lookup(c: &mut Criterion) {
    c.bench_function("lookup_channel_param", |b| {
        b.iter(|| param::lookup_channel_param(black_box("TRIGGER_THRESHOLD")).unwrap());
    });
    c.bench_function("lookup_channel_var", |b| {
        b.iter(|| param::lookup_channel_var(black_box("QDCLen7")).unwrap());
    });
}

fn bench_address_map(c: &mut Criterion) {
    let descs = loaded_descriptors(32);
    c.bench_function("address_map_set", |b| {
        b.iter(|| {
            let mut map = AddressMap::default();
            map.set(black_box(32), &descs.module, &descs.channel).unwrap();
            map
        });
    });
}

criterion_group!(benches, bench_lookup, bench_address_map);
criterion_main!(benches);
