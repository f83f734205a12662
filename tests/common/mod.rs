//! Synthetic packages for integration tests.
#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD, Engine as _};
use buoy_daq::package::wire::{scale_f32_to_u16, STANDARD_GRAVITY};
use buoy_daq::Package;
use serde_json::json;

pub const N: usize = 1024;
pub const FS: f64 = 52.0;
pub const DEVICE: &str = "dev:864475044203262";
pub const T0: f64 = 1_654_012_280.0;

/// Duration of one package at the declared rate.
pub fn period() -> f64 {
    N as f64 / FS
}

/// Package `index` starting at `start` seconds. Samples encode the index so different
/// packages never share content.
pub fn package(index: usize, start: f64) -> Package {
    Package::builder(DEVICE, (start * 1000.0).round() as i64, FS)
        .serial("wavebug24")
        .storage_id(Some(index as u32))
        .received_at(start + 120.0)
        .channel("x", vec![0.0; N])
        .channel("y", vec![0.0; N])
        .channel("z", (0..N).map(|k| (index * N + k) as f32 * 1e-3).collect())
        .build()
        .expect("valid package")
}

/// Start times of `count` back-to-back packages.
pub fn contiguous(count: usize, t0: f64) -> Vec<f64> {
    (0..count).map(|i| t0 + i as f64 * period()).collect()
}

pub fn packages(starts: &[f64]) -> Vec<Package> {
    starts
        .iter()
        .enumerate()
        .map(|(i, &s)| package(i, s))
        .collect()
}

/// Small deterministic generator for shuffles and gap patterns.
pub struct Lcg(pub u64);

impl Lcg {
    pub fn next_u64(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.0 >> 33
    }

    pub fn below(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }

    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.below(i + 1);
            items.swap(i, j);
        }
    }
}

/// Raw acceleration event as uploaded by the hub.
pub fn raw_event(index: usize, start: f64, samples: usize) -> String {
    let max = (4.0 * STANDARD_GRAVITY) as f32;
    let values: Vec<u16> = (0..samples)
        .flat_map(|k| {
            [
                scale_f32_to_u16(max, 0.0),
                scale_f32_to_u16(max, 0.0),
                scale_f32_to_u16(max, 9.81 + ((index * samples + k) % 100) as f32 * 0.01),
            ]
        })
        .collect();
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    let payload = STANDARD.encode(bytes);

    json!({
        "device": DEVICE,
        "sn": "wavebug24",
        "received": start + 120.0,
        "when": start + 60.0,
        "event": format!("event-{index}"),
        "file": "axl.qo",
        "body": {
            "length": payload.len(),
            "timestamp": (start * 1000.0).round() as i64,
            "offset": 0,
            "storage_id": index,
            "freq": FS,
        },
        "payload": payload,
    })
    .to_string()
}
