//! Opus frame encoding
//!
//! Raw PCM from the decoder is s16le, 48 kHz, stereo. The transport consumes
//! 20 ms Opus frames, so one encoding quantum is 960 samples per channel.
//! Short quanta at end of stream are zero-padded to a full frame.

use opus::{Application, Bitrate, Channels, Encoder};

use crate::error::StreamError;

/// Sample rate expected from the decoder and fed to the encoder
pub const SAMPLE_RATE: u32 = 48_000;

/// Channel count of the PCM stream
pub const CHANNELS: usize = 2;

/// Samples per channel in one 20 ms frame
pub const FRAME_SAMPLES: usize = 960;

/// Interleaved samples in one encoding quantum
pub const QUANTUM_SAMPLES: usize = FRAME_SAMPLES * CHANNELS;

/// Bytes of s16le PCM in one encoding quantum
pub const QUANTUM_BYTES: usize = QUANTUM_SAMPLES * 2;

/// Quanta fetched per decoder read
pub const READ_QUANTA: usize = 10;

const MAX_ENCODED_BYTES: usize = 4000;

/// Stateful PCM-to-Opus encoder for one streaming session
pub struct FrameCodec {
    encoder: Encoder,
    samples: Vec<i16>,
}

impl FrameCodec {
    /// Create an encoder at the given bitrate.
    pub fn new(bitrate_bps: u32) -> Result<Self, StreamError> {
        let mut encoder = Encoder::new(SAMPLE_RATE, Channels::Stereo, Application::Audio)
            .map_err(|e| StreamError::EncoderInit(e.to_string()))?;
        encoder
            .set_bitrate(Bitrate::Bits(bitrate_bps as i32))
            .map_err(|e| StreamError::EncoderInit(e.to_string()))?;

        Ok(FrameCodec {
            encoder,
            samples: vec![0i16; QUANTUM_SAMPLES],
        })
    }

    /// Encode one quantum of s16le PCM into a single Opus frame.
    ///
    /// `quantum` holds at most [`QUANTUM_BYTES`]; anything shorter is padded
    /// with silence so the encoder always sees a full 20 ms frame.
    pub fn encode_quantum(&mut self, quantum: &[u8]) -> Result<Vec<u8>, StreamError> {
        self.samples.fill(0);
        for (slot, bytes) in self.samples.iter_mut().zip(quantum.chunks_exact(2)) {
            *slot = i16::from_le_bytes([bytes[0], bytes[1]]);
        }

        self.encoder
            .encode_vec(&self.samples, MAX_ENCODED_BYTES)
            .map_err(|e| StreamError::Encode(e.to_string()))
    }
}
