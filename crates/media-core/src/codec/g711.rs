//! G.711 companding support
//!
//! Two layers live here. The wire transforms are the byte-level maps the
//! session applies to PCMU/PCMA payloads on their way through the media
//! plane; both are self-inverse, so encode and decode share one function.
//! The linear conversions expand companded bytes to 16-bit PCM and back,
//! which the processing stubs (AGC, noise gate) need to reason about signal
//! levels.

use once_cell::sync::Lazy;

/// µ-law bias added before segment search (ITU-T G.711)
const ULAW_BIAS: i32 = 0x84;

/// Clip level for companding input
const G711_CLIP: i32 = 32635;

/// µ-law wire transform.
///
/// G.711 transmits the companded µ-law byte ones-complemented; the media
/// plane works in the wire domain, so the transform is its own inverse.
pub fn ulaw_wire_transform(byte: u8) -> u8 {
    !byte
}

/// A-law wire transform: the even-bit inversion applied on the wire.
/// Self-inverse, like the µ-law transform.
pub fn alaw_wire_transform(byte: u8) -> u8 {
    byte ^ 0x55
}

// Segment (exponent) lookup for µ-law compression, indexed by (biased >> 7).
static ULAW_SEG: Lazy<[u8; 256]> = Lazy::new(|| {
    let mut table = [0u8; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        *entry = if i < 2 { 0 } else { i.ilog2() as u8 };
    }
    table
});

// Segment lookup for A-law compression, indexed by (magnitude >> 8) & 0x7F.
static ALAW_SEG: Lazy<[u8; 128]> = Lazy::new(|| {
    let mut table = [0u8; 128];
    for (i, entry) in table.iter_mut().enumerate() {
        *entry = if i < 2 { 1 } else { i.ilog2() as u8 + 1 };
    }
    table
});

/// µ-law byte (wire domain) to linear 16-bit PCM
static ULAW_TO_LINEAR: Lazy<[i16; 256]> = Lazy::new(|| {
    let mut table = [0i16; 256];
    for (byte, entry) in table.iter_mut().enumerate() {
        let u = !(byte as u8);
        let sign = u & 0x80;
        let exponent = ((u >> 4) & 0x07) as i32;
        let mantissa = (u & 0x0F) as i32;
        let sample = (((mantissa << 3) + ULAW_BIAS) << exponent) - ULAW_BIAS;
        *entry = if sign != 0 { -sample as i16 } else { sample as i16 };
    }
    table
});

/// A-law byte (wire domain) to linear 16-bit PCM
static ALAW_TO_LINEAR: Lazy<[i16; 256]> = Lazy::new(|| {
    let mut table = [0i16; 256];
    for (byte, entry) in table.iter_mut().enumerate() {
        let a = (byte as u8) ^ 0x55;
        let sign = a & 0x80;
        let exponent = ((a >> 4) & 0x07) as i32;
        let mantissa = (a & 0x0F) as i32;
        let sample = if exponent == 0 {
            (mantissa << 4) + 8
        } else {
            ((mantissa << 4) + 0x108) << (exponent - 1)
        };
        // Bit 7 set means positive in A-law
        *entry = if sign != 0 { sample as i16 } else { -sample as i16 };
    }
    table
});

/// Expand a µ-law byte to a linear sample
pub fn ulaw_to_linear(byte: u8) -> i16 {
    ULAW_TO_LINEAR[byte as usize]
}

/// Expand an A-law byte to a linear sample
pub fn alaw_to_linear(byte: u8) -> i16 {
    ALAW_TO_LINEAR[byte as usize]
}

/// Compress a linear sample to a µ-law byte (wire domain)
pub fn linear_to_ulaw(pcm: i16) -> u8 {
    let (sign, mut magnitude) = if pcm >= 0 {
        (0u8, pcm as i32)
    } else {
        (0x80u8, -(pcm as i32))
    };
    if magnitude > G711_CLIP {
        magnitude = G711_CLIP;
    }
    magnitude += ULAW_BIAS;

    let exponent = ULAW_SEG[((magnitude >> 7) & 0xFF) as usize];
    let mantissa = ((magnitude >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

/// Compress a linear sample to an A-law byte (wire domain)
pub fn linear_to_alaw(pcm: i16) -> u8 {
    let (sign, mut magnitude) = if pcm >= 0 {
        (0x80u8, pcm as i32)
    } else {
        (0u8, -(pcm as i32) - 1)
    };
    if magnitude > G711_CLIP {
        magnitude = G711_CLIP;
    }

    let compressed = if magnitude >= 256 {
        let exponent = ALAW_SEG[((magnitude >> 8) & 0x7F) as usize];
        let mantissa = ((magnitude >> (exponent + 3)) & 0x0F) as u8;
        (exponent << 4) | mantissa
    } else {
        (magnitude >> 4) as u8
    };
    (sign | compressed) ^ 0x55
}
