//! Decoder for the amdgpu `gpu_metrics` binary record
//!
//! Only two fields are read: average socket power and average graphics power,
//! both u32 little-endian milliwatts at fixed offsets of the v3 (APU) layout.
//! The content revision (byte 3) is not consulted since 3.x minors only append
//! fields after the ones used here.

use crate::constants::gpu_metrics::*;
use serde::{Deserialize, Serialize};

/// Power draw derived from one gpu_metrics sample (mW)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetricsPower {
    pub socket: Option<u32>,
    pub cpu: Option<u32>,
    pub gpu: Option<u32>,
}

fn read_u32_le(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes: [u8; 4] = buf.get(offset..offset + 4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

fn available(value: u32) -> Option<u32> {
    (value != UNAVAILABLE).then_some(value)
}

pub fn decode_gpu_metrics(buf: &[u8]) -> MetricsPower {
    if buf.len() < MIN_LEN || buf[FORMAT_REVISION_OFFSET] != SUPPORTED_FORMAT_REVISION {
        return MetricsPower::default();
    }

    let apu = read_u32_le(buf, APU_POWER_OFFSET).and_then(available);
    let gfx = read_u32_le(buf, GFX_POWER_OFFSET).and_then(available);

    // GPU power can briefly exceed the socket total between samples
    let cpu = match (apu, gfx) {
        (Some(apu), Some(gfx)) => Some(apu.saturating_sub(gfx)),
        _ => None,
    };

    MetricsPower { socket: apu, cpu, gpu: gfx }
}
