//! Codec processing for the media session (per-payload-type transforms)
//!
//! The processor validates frame sizes against the session's expected
//! payload size, applies the optional level-processing stubs and runs the
//! per-codec wire transform. It works in the wire byte domain: callers hand
//! it frames already shaped for the negotiated payload type.

pub mod g711;

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::types::AudioPayloadType;

/// AGC target as a fraction of full scale (matches narrowband telephony
/// practice of leaving generous headroom)
const AGC_TARGET_LEVEL: f32 = 0.25;

/// AGC gain bounds
const AGC_MIN_GAIN: f32 = 0.1;
const AGC_MAX_GAIN: f32 = 10.0;

/// Noise gate threshold in linear sample units
const NOISE_GATE_THRESHOLD: i16 = 64;

/// Configuration for the audio processor
#[derive(Debug, Clone)]
pub struct AudioProcessorConfig {
    /// Session payload type
    pub payload_type: AudioPayloadType,
    /// Packetization time
    pub ptime: Duration,
    /// Enable the automatic gain control stub
    pub enable_agc: bool,
    /// Enable the noise-gate stub
    pub enable_noise_reduction: bool,
}

/// Per-session codec processor.
///
/// Holds the working buffer sized to the current expected payload size and
/// the smoothed AGC gain, so it must be driven from one task at a time.
pub struct AudioProcessor {
    session_id: String,
    payload_type: AudioPayloadType,
    ptime: Duration,
    expected_payload_size: usize,
    work_buf: BytesMut,
    enable_agc: bool,
    enable_noise_reduction: bool,
    // Smoothed gain multiplier, unity at rest
    agc_gain: f32,
}

impl AudioProcessor {
    /// Create a processor sized for `(payload_type, ptime)`
    pub fn new(session_id: impl Into<String>, config: AudioProcessorConfig) -> Self {
        let expected = config.payload_type.expected_payload_size(config.ptime);
        debug!(
            "Creating AudioProcessor: codec={} ptime={}ms frame={}B",
            config.payload_type,
            config.ptime.as_millis(),
            expected
        );
        Self {
            session_id: session_id.into(),
            payload_type: config.payload_type,
            ptime: config.ptime,
            expected_payload_size: expected,
            work_buf: BytesMut::with_capacity(expected),
            enable_agc: config.enable_agc,
            enable_noise_reduction: config.enable_noise_reduction,
            agc_gain: 1.0,
        }
    }

    /// Expected payload size in bytes for the current `(payload_type, ptime)`
    pub fn expected_payload_size(&self) -> usize {
        self.expected_payload_size
    }

    /// Current packetization time
    pub fn ptime(&self) -> Duration {
        self.ptime
    }

    /// Re-size the working buffers for a new packetization time
    pub fn set_ptime(&mut self, ptime: Duration) {
        self.ptime = ptime;
        self.expected_payload_size = self.payload_type.expected_payload_size(ptime);
        self.work_buf = BytesMut::with_capacity(self.expected_payload_size);
        debug!(
            "AudioProcessor resized: ptime={}ms frame={}B",
            ptime.as_millis(),
            self.expected_payload_size
        );
    }

    /// Process one outgoing frame: validate its size, run the optional level
    /// stubs and apply the codec wire transform.
    pub fn process_outgoing(&mut self, frame: &[u8]) -> Result<Bytes> {
        if frame.len() != self.expected_payload_size {
            return Err(Error::AudioSizeInvalid {
                session_id: self.session_id.clone(),
                expected: self.expected_payload_size,
                actual: frame.len(),
                payload_type: self.payload_type.as_u8(),
                clock_rate: self.payload_type.clock_rate(),
                ptime_ms: self.ptime.as_millis() as u64,
            });
        }

        self.work_buf.clear();
        self.work_buf.extend_from_slice(frame);

        if self.enable_agc || self.enable_noise_reduction {
            self.apply_level_processing()?;
        }

        self.transform_in_place(true);
        trace!("processed outgoing frame: {}B", self.work_buf.len());
        Ok(self.work_buf.split().freeze())
    }

    /// Process one incoming payload: inverse wire transform, no size
    /// precondition since payloads arrive off the network.
    pub fn process_incoming(&mut self, payload: &[u8]) -> Result<Bytes> {
        self.work_buf.clear();
        self.work_buf.extend_from_slice(payload);
        self.transform_in_place(false);
        Ok(self.work_buf.split().freeze())
    }

    /// Apply the per-codec byte transform to the working buffer.
    ///
    /// PCMU and PCMA use their self-inverse wire maps. G.722 halves the
    /// sample count on encode and mirrors it back on decode. The frame-based
    /// codecs pass through untouched; transcoding them is not implemented
    /// and the level stubs reject them before reaching here.
    fn transform_in_place(&mut self, encode: bool) {
        match self.payload_type {
            AudioPayloadType::Pcmu => {
                for byte in self.work_buf.iter_mut() {
                    *byte = g711::ulaw_wire_transform(*byte);
                }
            }
            AudioPayloadType::Pcma => {
                for byte in self.work_buf.iter_mut() {
                    *byte = g711::alaw_wire_transform(*byte);
                }
            }
            AudioPayloadType::G722 => {
                if encode {
                    // Sub-band coding halves the sample count
                    let half: BytesMut = self
                        .work_buf
                        .chunks(2)
                        .map(|pair| {
                            let a = pair[0] as u16;
                            let b = *pair.get(1).unwrap_or(&pair[0]) as u16;
                            ((a + b) / 2) as u8
                        })
                        .collect();
                    self.work_buf = half;
                } else {
                    let mut doubled = BytesMut::with_capacity(self.work_buf.len() * 2);
                    for &byte in self.work_buf.iter() {
                        doubled.extend_from_slice(&[byte, byte]);
                    }
                    self.work_buf = doubled;
                }
            }
            AudioPayloadType::Gsm | AudioPayloadType::G728 | AudioPayloadType::G729 => {
                // Pre-encoded frames pass through unchanged
            }
        }
    }

    /// Linear-domain level stubs: expand to PCM, gate and apply the smoothed
    /// AGC gain, compress back. Only meaningful for the G.711 variants.
    fn apply_level_processing(&mut self) -> Result<()> {
        let (expand, compress): (fn(u8) -> i16, fn(i16) -> u8) = match self.payload_type {
            AudioPayloadType::Pcmu => (g711::ulaw_to_linear, g711::linear_to_ulaw),
            AudioPayloadType::Pcma => (g711::alaw_to_linear, g711::linear_to_alaw),
            other => {
                return Err(Error::AudioCodecUnsupported {
                    payload_type: other.as_u8(),
                    operation: "level processing",
                })
            }
        };

        let mut peak: f32 = 0.0;
        for &byte in self.work_buf.iter() {
            let level = (expand(byte) as f32 / i16::MAX as f32).abs();
            if level > peak {
                peak = level;
            }
        }

        if self.enable_agc {
            let desired = if peak > 0.0 {
                (AGC_TARGET_LEVEL / peak).clamp(AGC_MIN_GAIN, AGC_MAX_GAIN)
            } else {
                AGC_MAX_GAIN
            };
            // Smooth toward the desired gain, one step per frame
            self.agc_gain += (desired - self.agc_gain) * 0.1;
        }

        for byte in self.work_buf.iter_mut() {
            let mut sample = expand(*byte);
            if self.enable_noise_reduction && sample.abs() < NOISE_GATE_THRESHOLD {
                sample = 0;
            }
            if self.enable_agc {
                sample = ((sample as f32) * self.agc_gain)
                    .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            }
            *byte = compress(sample);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor(payload_type: AudioPayloadType) -> AudioProcessor {
        AudioProcessor::new(
            "test-session",
            AudioProcessorConfig {
                payload_type,
                ptime: Duration::from_millis(20),
                enable_agc: false,
                enable_noise_reduction: false,
            },
        )
    }

    #[test]
    fn test_pcmu_round_trip_identity() {
        let mut p = processor(AudioPayloadType::Pcmu);
        let frame: Vec<u8> = (0..160).map(|i| (i % 251) as u8).collect();
        let encoded = p.process_outgoing(&frame).unwrap();
        assert_eq!(encoded.len(), 160);
        let decoded = p.process_incoming(&encoded).unwrap();
        assert_eq!(&decoded[..], &frame[..]);
    }

    #[test]
    fn test_pcma_round_trip_identity() {
        let mut p = processor(AudioPayloadType::Pcma);
        let frame: Vec<u8> = (0..160).map(|i| (255 - i % 256) as u8).collect();
        let encoded = p.process_outgoing(&frame).unwrap();
        let decoded = p.process_incoming(&encoded).unwrap();
        assert_eq!(&decoded[..], &frame[..]);
    }

    #[test]
    fn test_size_validation() {
        let mut p = processor(AudioPayloadType::Pcmu);
        let err = p.process_outgoing(&[0u8; 80]).unwrap_err();
        match err {
            Error::AudioSizeInvalid {
                expected,
                actual,
                payload_type,
                clock_rate,
                ptime_ms,
                ..
            } => {
                assert_eq!(expected, 160);
                assert_eq!(actual, 80);
                assert_eq!(payload_type, 0);
                assert_eq!(clock_rate, 8000);
                assert_eq!(ptime_ms, 20);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_incoming_has_no_size_precondition() {
        let mut p = processor(AudioPayloadType::Pcmu);
        // An undersized tail from a flushed sender must still decode
        let decoded = p.process_incoming(&[0xFFu8; 37]).unwrap();
        assert_eq!(decoded.len(), 37);
    }

    #[test]
    fn test_g722_halves_on_encode() {
        let mut p = processor(AudioPayloadType::G722);
        let frame = vec![0x40u8; 160];
        let encoded = p.process_outgoing(&frame).unwrap();
        assert_eq!(encoded.len(), 80);
        let decoded = p.process_incoming(&encoded).unwrap();
        assert_eq!(decoded.len(), 160);
    }

    #[test]
    fn test_frame_codecs_pass_through() {
        let mut p = processor(AudioPayloadType::G729);
        let frame = vec![0xA5u8; 20];
        let encoded = p.process_outgoing(&frame).unwrap();
        assert_eq!(&encoded[..], &frame[..]);
    }

    #[test]
    fn test_level_processing_rejected_for_frame_codecs() {
        let mut p = AudioProcessor::new(
            "test-session",
            AudioProcessorConfig {
                payload_type: AudioPayloadType::G729,
                ptime: Duration::from_millis(20),
                enable_agc: true,
                enable_noise_reduction: false,
            },
        );
        let err = p.process_outgoing(&[0u8; 20]).unwrap_err();
        assert!(matches!(err, Error::AudioCodecUnsupported { .. }));
    }

    #[test]
    fn test_set_ptime_resizes_expectation() {
        let mut p = processor(AudioPayloadType::Pcmu);
        assert_eq!(p.expected_payload_size(), 160);
        p.set_ptime(Duration::from_millis(30));
        assert_eq!(p.expected_payload_size(), 240);
        assert!(p.process_outgoing(&[0u8; 160]).is_err());
        assert!(p.process_outgoing(&[0u8; 240]).is_ok());
    }

    #[test]
    fn test_noise_gate_zeroes_quiet_samples() {
        let mut p = AudioProcessor::new(
            "test-session",
            AudioProcessorConfig {
                payload_type: AudioPayloadType::Pcmu,
                ptime: Duration::from_millis(20),
                enable_agc: false,
                enable_noise_reduction: true,
            },
        );
        // 0xFF is linear 0 in the wire domain: the whole frame is below the
        // gate, so the output must decode to silence
        let frame = vec![0xFFu8; 160];
        let encoded = p.process_outgoing(&frame).unwrap();
        let silent = g711::linear_to_ulaw(0);
        // encode applies the wire transform on top of the gate
        assert!(encoded
            .iter()
            .all(|&b| b == g711::ulaw_wire_transform(silent)));
    }
}
