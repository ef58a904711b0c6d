//! Audio frame codec adapter.
//!
//! Converts between the telephony wire encoding (base64 framed mono audio)
//! and the encoding negotiated with the AI session. Mu-law passes straight
//! through as `g711_ulaw` and keeps no state. Linear PCM is resampled to and
//! from 24kHz `pcm16` with a band-limited FFT resampler from `rubato`.
//!
//! Resampling is streamed: input is cut into fixed 20ms chunks across frame
//! boundaries, so a delta that does not fill a chunk is held until the next
//! one. [`AudioCodec::finish_outbound`] drains what an utterance left behind.
//!
//! Linear PCM samples are 16-bit little-endian on both sides.

use base64::prelude::*;
use bytes::Bytes;
use parking_lot::Mutex;
use rubato::{FftFixedIn, ResampleError, Resampler, ResamplerConstructionError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::realtime::{OPENAI_REALTIME_SAMPLE_RATE, SessionAudioFormat};

/// Errors produced while converting audio frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Payload is not valid base64
    #[error("Invalid base64 payload: {0}")]
    InvalidPayload(String),

    /// Encoding name is not recognised
    #[error("Unsupported telephony encoding: {0}")]
    UnsupportedEncoding(String),

    /// The resampler could not be built or failed on a chunk
    #[error("Resampling failed: {0}")]
    Resample(String),
}

impl From<base64::DecodeError> for CodecError {
    fn from(err: base64::DecodeError) -> Self {
        CodecError::InvalidPayload(err.to_string())
    }
}

impl From<ResamplerConstructionError> for CodecError {
    fn from(err: ResamplerConstructionError) -> Self {
        CodecError::Resample(err.to_string())
    }
}

impl From<ResampleError> for CodecError {
    fn from(err: ResampleError) -> Self {
        CodecError::Resample(err.to_string())
    }
}

// =============================================================================
// Telephony Encoding
// =============================================================================

/// Audio encoding spoken on the telephony side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TelephonyEncoding {
    /// G.711 mu-law, 8kHz (narrowband)
    #[default]
    #[serde(rename = "mulaw_8000")]
    Mulaw8000,
    /// Linear PCM 16-bit, 8kHz
    #[serde(rename = "l16_8000")]
    L16_8000,
    /// Linear PCM 16-bit, 16kHz (wideband)
    #[serde(rename = "l16_16000")]
    L16_16000,
}

impl TelephonyEncoding {
    /// Parse a configuration value.
    pub fn parse(s: &str) -> Result<Self, CodecError> {
        match s.trim().to_lowercase().as_str() {
            "mulaw_8000" | "mulaw" | "ulaw" | "pcmu" => Ok(Self::Mulaw8000),
            "l16_8000" | "l16" => Ok(Self::L16_8000),
            "l16_16000" | "wideband" => Ok(Self::L16_16000),
            other => Err(CodecError::UnsupportedEncoding(other.to_string())),
        }
    }

    /// Match the format a transport declares in its `start` event.
    pub fn from_media_format(encoding: &str, sample_rate: u32) -> Option<Self> {
        let encoding = encoding.to_lowercase();
        if encoding.contains("mulaw") || encoding.contains("ulaw") || encoding.contains("pcmu") {
            return (sample_rate == 8000).then_some(Self::Mulaw8000);
        }
        if encoding.contains("l16") || encoding.contains("pcm") || encoding.contains("linear") {
            return match sample_rate {
                8000 => Some(Self::L16_8000),
                16000 => Some(Self::L16_16000),
                _ => None,
            };
        }
        None
    }

    /// Configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mulaw8000 => "mulaw_8000",
            Self::L16_8000 => "l16_8000",
            Self::L16_16000 => "l16_16000",
        }
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        match self {
            Self::Mulaw8000 | Self::L16_8000 => 8000,
            Self::L16_16000 => 16000,
        }
    }

    /// Wire bytes per millisecond of audio.
    pub fn bytes_per_ms(&self) -> u64 {
        match self {
            Self::Mulaw8000 => 8,
            Self::L16_8000 => 16,
            Self::L16_16000 => 32,
        }
    }

    /// Format the AI session is configured with for this telephony encoding.
    pub fn ai_format(&self) -> SessionAudioFormat {
        match self {
            Self::Mulaw8000 => SessionAudioFormat::G711Ulaw,
            Self::L16_8000 | Self::L16_16000 => SessionAudioFormat::Pcm16,
        }
    }
}

impl std::fmt::Display for TelephonyEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Streaming resampler
// =============================================================================

/// Length of one resampler chunk.
pub const RESAMPLE_CHUNK_MS: u32 = 20;

const I16_SCALE: f32 = 32768.0;

/// Mono resampler that carries its filter state and partial chunks across
/// calls. The filter delay is trimmed from the head of the stream so output
/// lines up with input.
pub struct StreamResampler {
    resampler: FftFixedIn<f32>,
    from_rate: u32,
    to_rate: u32,
    pending: Vec<f32>,
    delay_left: usize,
    fed: u64,
    emitted: u64,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self, CodecError> {
        let chunk = (from_rate * RESAMPLE_CHUNK_MS / 1000) as usize;
        let resampler = FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, chunk, 1, 1)?;
        let delay_left = resampler.output_delay();
        Ok(Self {
            resampler,
            from_rate,
            to_rate,
            pending: Vec::with_capacity(chunk * 2),
            delay_left,
            fed: 0,
            emitted: 0,
        })
    }

    /// Feed samples; returns whatever whole chunks produced.
    pub fn push(&mut self, samples: &[i16]) -> Result<Vec<i16>, CodecError> {
        self.fed += samples.len() as u64;
        self.pending
            .extend(samples.iter().map(|&s| s as f32 / I16_SCALE));

        let mut out = Vec::new();
        loop {
            let needed = self.resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let input = vec![self.pending.drain(..needed).collect::<Vec<f32>>()];
            let frames = self.resampler.process(&input, None)?;
            self.emit(&frames[0], u64::MAX, &mut out);
        }
        Ok(out)
    }

    /// Drain buffered input and the filter tail, then start a fresh stream.
    /// Over the life of a stream the output holds `fed * to / from` samples,
    /// rounded to nearest.
    pub fn flush(&mut self) -> Result<Vec<i16>, CodecError> {
        let from = self.from_rate as u64;
        let expected = (self.fed * self.to_rate as u64 + from / 2) / from;
        let mut out = Vec::new();

        if !self.pending.is_empty() {
            let input = vec![std::mem::take(&mut self.pending)];
            let frames = self.resampler.process_partial(Some(input.as_slice()), None)?;
            self.emit(&frames[0], expected, &mut out);
        }
        while self.emitted < expected {
            let frames = self
                .resampler
                .process_partial(None::<&[Vec<f32>]>, None)?;
            if frames[0].is_empty() {
                break;
            }
            self.emit(&frames[0], expected, &mut out);
        }

        self.reset();
        Ok(out)
    }

    /// Forget buffered input and filter state.
    pub fn reset(&mut self) {
        self.resampler.reset();
        self.pending.clear();
        self.delay_left = self.resampler.output_delay();
        self.fed = 0;
        self.emitted = 0;
    }

    fn emit(&mut self, frames: &[f32], limit: u64, out: &mut Vec<i16>) {
        let skip = self.delay_left.min(frames.len());
        self.delay_left -= skip;
        let room = limit.saturating_sub(self.emitted) as usize;
        let take = (frames.len() - skip).min(room);
        out.extend(
            frames[skip..skip + take]
                .iter()
                .map(|&s| (s * I16_SCALE).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16),
        );
        self.emitted += take as u64;
    }
}

impl std::fmt::Debug for StreamResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResampler")
            .field("from_rate", &self.from_rate)
            .field("to_rate", &self.to_rate)
            .field("pending", &self.pending.len())
            .finish()
    }
}

// =============================================================================
// Codec
// =============================================================================

#[derive(Debug, Default)]
struct OutboundStream {
    item_id: Option<String>,
    resampler: Option<StreamResampler>,
}

/// Per-leg converter between telephony frames and AI session audio.
///
/// Inbound audio is only converted by the leg's own connection task and
/// outbound audio only by the one session pump that targets the leg, so each
/// direction's lock is uncontended.
#[derive(Debug, Default)]
pub struct AudioCodec {
    encoding: TelephonyEncoding,
    inbound: Mutex<Option<StreamResampler>>,
    outbound: Mutex<OutboundStream>,
}

impl AudioCodec {
    pub fn new(encoding: TelephonyEncoding) -> Self {
        Self {
            encoding,
            inbound: Mutex::new(None),
            outbound: Mutex::new(OutboundStream::default()),
        }
    }

    pub fn encoding(&self) -> TelephonyEncoding {
        self.encoding
    }

    fn resamples(&self) -> bool {
        self.encoding.ai_format() == SessionAudioFormat::Pcm16
    }

    /// Decode a base64 telephony payload into AI session input audio. May
    /// return an empty buffer while a resampler chunk is still filling.
    pub fn inbound(&self, payload: &str) -> Result<Bytes, CodecError> {
        let raw = BASE64_STANDARD.decode(payload)?;
        if !self.resamples() {
            return Ok(Bytes::from(raw));
        }

        let mut slot = self.inbound.lock();
        if slot.is_none() {
            *slot = Some(StreamResampler::new(
                self.encoding.sample_rate(),
                OPENAI_REALTIME_SAMPLE_RATE,
            )?);
        }
        let Some(resampler) = slot.as_mut() else {
            return Ok(Bytes::new());
        };
        let resampled = resampler.push(&pcm16_from_le_bytes(&raw))?;
        Ok(Bytes::from(pcm16_to_le_bytes(&resampled)))
    }

    /// Convert AI output audio of `item_id` into telephony wire bytes. A new
    /// item discards whatever the previous one left buffered.
    pub fn outbound(&self, item_id: &str, audio: &[u8]) -> Result<Bytes, CodecError> {
        if !self.resamples() {
            return Ok(Bytes::copy_from_slice(audio));
        }

        let mut stream = self.outbound.lock();
        if stream.item_id.as_deref() != Some(item_id) {
            stream.item_id = Some(item_id.to_string());
            if let Some(resampler) = stream.resampler.as_mut() {
                resampler.reset();
            }
        }
        if stream.resampler.is_none() {
            stream.resampler = Some(StreamResampler::new(
                OPENAI_REALTIME_SAMPLE_RATE,
                self.encoding.sample_rate(),
            )?);
        }
        let Some(resampler) = stream.resampler.as_mut() else {
            return Ok(Bytes::new());
        };
        let resampled = resampler.push(&pcm16_from_le_bytes(audio))?;
        Ok(Bytes::from(pcm16_to_le_bytes(&resampled)))
    }

    /// Drain the tail of `item_id` once the AI has finished generating it.
    /// Empty when nothing is buffered or `item_id` is not the current item.
    pub fn finish_outbound(&self, item_id: &str) -> Result<Bytes, CodecError> {
        let mut stream = self.outbound.lock();
        if stream.item_id.as_deref() != Some(item_id) {
            return Ok(Bytes::new());
        }
        stream.item_id = None;
        match stream.resampler.as_mut() {
            Some(resampler) => Ok(Bytes::from(pcm16_to_le_bytes(&resampler.flush()?))),
            None => Ok(Bytes::new()),
        }
    }

    /// Base64 framing for an outbound telephony payload.
    pub fn encode_payload(wire: &[u8]) -> String {
        BASE64_STANDARD.encode(wire)
    }
}

// =============================================================================
// Sample helpers
// =============================================================================

/// Interpret bytes as 16-bit little-endian samples. A trailing odd byte is dropped.
pub fn pcm16_from_le_bytes(data: &[u8]) -> Vec<i16> {
    data.chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}
