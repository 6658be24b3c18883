//! Conversions between float audio, 16-bit PCM, and the transport's
//! text-safe (base64) encoding.
//!
//! Every function here is pure. Decoding is the only fallible direction and
//! reports malformed input as a [`FormatError`].

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt;

/// Malformed transport payload.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// The transport text is not valid base64.
    #[error("invalid transport encoding: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    /// PCM16 data must contain an even number of bytes.
    #[error("PCM16 payload has odd length {0}")]
    OddLength(usize),

    /// The MIME tag does not describe 16-bit linear PCM.
    #[error("unsupported media type: {0}")]
    UnsupportedMimeType(String),
}

/// Encode raw bytes as transport text.
#[must_use]
pub fn encode_bytes(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode transport text back to raw bytes.
///
/// # Errors
///
/// Returns [`FormatError::InvalidEncoding`] if `text` is not valid base64.
pub fn decode_text(text: &str) -> Result<Vec<u8>, FormatError> {
    Ok(STANDARD.decode(text.trim())?)
}

/// Convert float samples to little-endian 16-bit PCM.
///
/// Samples are clamped to `[-1, 1]`. Negative values scale by 32768 and
/// non-negative values by 32767 so both rails map onto the integer limits.
/// NaN encodes as silence.
#[must_use]
pub fn float_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = if s.is_nan() { 0.0 } else { s.clamp(-1.0, 1.0) };
        let scaled = if v < 0.0 { v * 32768.0 } else { v * 32767.0 };
        out.extend_from_slice(&(scaled.round() as i16).to_le_bytes());
    }
    out
}

/// Convert little-endian 16-bit PCM back to float samples.
///
/// # Errors
///
/// Returns [`FormatError::OddLength`] if `bytes` cannot hold whole samples.
pub fn pcm16_to_float(bytes: &[u8]) -> Result<Vec<f32>, FormatError> {
    if bytes.len() % 2 != 0 {
        return Err(FormatError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| {
            let v = i16::from_le_bytes([pair[0], pair[1]]);
            if v < 0 {
                f32::from(v) / 32768.0
            } else {
                f32::from(v) / 32767.0
            }
        })
        .collect())
}

/// Sample encoding carried by a transport blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    /// 16-bit signed little-endian linear PCM.
    Pcm16,
}

/// Format descriptor of a transport blob: sample rate plus encoding tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Sample encoding.
    pub encoding: SampleEncoding,
}

impl MediaFormat {
    /// PCM16 at the given rate.
    #[must_use]
    pub fn pcm16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            encoding: SampleEncoding::Pcm16,
        }
    }

    /// The MIME tag for this format, e.g. `audio/pcm;rate=16000`.
    #[must_use]
    pub fn mime_type(&self) -> String {
        self.to_string()
    }

    /// Parse a MIME tag such as `audio/pcm;rate=24000`.
    ///
    /// A tag without a `rate` parameter falls back to `default_rate`.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::UnsupportedMimeType`] for anything other than
    /// `audio/pcm`, or for a rate that is not a positive integer.
    pub fn parse(mime: &str, default_rate: u32) -> Result<Self, FormatError> {
        let mut parts = mime.split(';').map(str::trim);
        let base = parts.next().unwrap_or_default();
        if !base.eq_ignore_ascii_case("audio/pcm") {
            return Err(FormatError::UnsupportedMimeType(mime.to_owned()));
        }

        let mut rate = default_rate;
        for param in parts {
            if let Some(value) = param.strip_prefix("rate=") {
                rate = value
                    .parse::<u32>()
                    .ok()
                    .filter(|r| *r > 0)
                    .ok_or_else(|| FormatError::UnsupportedMimeType(mime.to_owned()))?;
            }
        }
        Ok(Self::pcm16(rate))
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.encoding {
            SampleEncoding::Pcm16 => write!(f, "audio/pcm;rate={}", self.sample_rate),
        }
    }
}

/// An encoded audio payload ready for the transport.
///
/// Immutable once built: the payload is already transport text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportBlob {
    payload: String,
    format: MediaFormat,
}

impl TransportBlob {
    /// Wrap already-encoded transport text.
    #[must_use]
    pub fn new(payload: String, format: MediaFormat) -> Self {
        Self { payload, format }
    }

    /// Encode float samples as PCM16 transport text at `sample_rate`.
    #[must_use]
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Self {
        Self {
            payload: encode_bytes(&float_to_pcm16(samples)),
            format: MediaFormat::pcm16(sample_rate),
        }
    }

    /// The encoded payload.
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// The format descriptor.
    #[must_use]
    pub fn format(&self) -> MediaFormat {
        self.format
    }

    /// Decode the payload back to float samples.
    ///
    /// # Errors
    ///
    /// Returns a [`FormatError`] if the payload is malformed.
    pub fn decode_samples(&self) -> Result<Vec<f32>, FormatError> {
        pcm16_to_float(&decode_text(&self.payload)?)
    }
}
