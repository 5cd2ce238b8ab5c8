//! PCM16 audio plumbing for the live session.
//!
//! The Live API takes 16 kHz mono little-endian PCM16 as input and produces
//! 24 kHz mono PCM16 as output. Everything here converts to or from those
//! two formats.

use async_trait::async_trait;
use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub const LIVE_INPUT_SAMPLE_RATE: u32 = 16_000;
pub const LIVE_OUTPUT_SAMPLE_RATE: u32 = 24_000;
/// Samples per realtime-input frame (64 ms at 16 kHz).
pub const DEFAULT_FRAME_SAMPLES: usize = 1024;

const RESAMPLER_CHUNK: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("Failed to build resampler: {0}")]
    ResamplerConstruction(#[from] rubato::ResamplerConstructionError),
    #[error("Resampling failed: {0}")]
    Resample(#[from] rubato::ResampleError),
    #[error("PCM16 payload has an odd number of bytes ({0})")]
    OddByteCount(usize),
    #[error("Unsupported WAV format: {0}")]
    Unsupported(String),
}

// --- Sample conversion ---

pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Interprets little-endian bytes as PCM16 samples.
pub fn pcm16_from_le_bytes(bytes: &[u8]) -> Result<Vec<i16>, AudioError> {
    if bytes.len() % 2 != 0 {
        return Err(AudioError::OddByteCount(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Base64 of the little-endian PCM16 bytes, as sent in `mediaChunks`.
pub fn encode_pcm16_base64(samples: &[i16]) -> String {
    base64::engine::general_purpose::STANDARD.encode(pcm16_to_le_bytes(samples))
}

/// Averages interleaved channels into one.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

// --- Resampling ---

/// Streaming mono resampler. Input of any length is buffered into the fixed
/// chunks rubato works on; `flush` drains the tail.
pub struct MonoResampler {
    inner: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
}

impl MonoResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self, AudioError> {
        let inner = if from_rate == to_rate {
            None
        } else {
            Some(FastFixedIn::<f32>::new(
                to_rate as f64 / from_rate as f64,
                1.0,
                PolynomialDegree::Cubic,
                RESAMPLER_CHUNK,
                1,
            )?)
        };
        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>, AudioError> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(samples.to_vec());
        };
        self.pending.extend_from_slice(samples);

        let mut out = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk = [self.pending.drain(..needed).collect::<Vec<f32>>()];
            let mut frames = resampler.process(&chunk[..], None)?;
            out.append(&mut frames[0]);
        }
        Ok(out)
    }

    pub fn flush(&mut self) -> Result<Vec<f32>, AudioError> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(Vec::new());
        };
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }
        let tail = [std::mem::take(&mut self.pending)];
        let mut frames = resampler.process_partial(Some(&tail[..]), None)?;
        Ok(std::mem::take(&mut frames[0]))
    }
}

// --- Framing ---

/// Slices a sample stream into fixed-size frames.
#[derive(Debug)]
pub struct Pcm16Framer {
    frame_len: usize,
    buffer: Vec<i16>,
}

impl Pcm16Framer {
    pub fn new(frame_len: usize) -> Self {
        Self {
            frame_len: frame_len.max(1),
            buffer: Vec::new(),
        }
    }

    /// Returns every complete frame now available.
    pub fn push(&mut self, samples: &[i16]) -> Vec<Vec<i16>> {
        self.buffer.extend_from_slice(samples);
        let complete = self.buffer.len() / self.frame_len * self.frame_len;
        let frames = self
            .buffer
            .drain(..complete)
            .collect::<Vec<_>>()
            .chunks(self.frame_len)
            .map(<[i16]>::to_vec)
            .collect();
        frames
    }

    /// The final short frame, if any samples are left.
    pub fn finish(&mut self) -> Option<Vec<i16>> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}

// --- Sources and sinks ---

/// One frame of mono PCM16 audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

impl AudioFrame {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    pub fn to_base64(&self) -> String {
        encode_pcm16_base64(&self.samples)
    }
}

/// A capture pipeline producing mono PCM16 frames at a fixed rate.
#[async_trait]
pub trait AudioSource: Send {
    fn sample_rate(&self) -> u32;

    /// The next frame, or `None` once the source is exhausted.
    async fn next_frame(&mut self) -> Option<AudioFrame>;
}

/// Replays a WAV file as if it were being captured live.
///
/// The file is decoded up front, downmixed to mono and resampled to the
/// target rate. With pacing enabled each frame is delayed by its own
/// duration so the server sees a realtime stream.
pub struct WavFileSource {
    frames: std::vec::IntoIter<Vec<i16>>,
    sample_rate: u32,
    paced: bool,
}

impl WavFileSource {
    pub fn open(path: impl AsRef<Path>, target_rate: u32) -> Result<Self, AudioError> {
        let path = path.as_ref();
        let reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        debug!(
            path = %path.display(),
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            bits = spec.bits_per_sample,
            "Opened WAV input"
        );

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Int => {
                if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                    return Err(AudioError::Unsupported(format!(
                        "{}-bit integer samples",
                        spec.bits_per_sample
                    )));
                }
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()?
            }
            hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
        };

        let mono = downmix(&interleaved, spec.channels as usize);
        let mut resampler = MonoResampler::new(spec.sample_rate, target_rate)?;
        let mut resampled = resampler.process(&mono)?;
        resampled.extend(resampler.flush()?);

        let mut framer = Pcm16Framer::new(DEFAULT_FRAME_SAMPLES);
        let mut frames = framer.push(&f32_to_i16(&resampled));
        frames.extend(framer.finish());

        info!(
            path = %path.display(),
            frames = frames.len(),
            target_rate,
            "Prepared WAV input"
        );
        Ok(Self {
            frames: frames.into_iter(),
            sample_rate: target_rate,
            paced: false,
        })
    }

    pub fn with_pacing(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }
}

#[async_trait]
impl AudioSource for WavFileSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn next_frame(&mut self) -> Option<AudioFrame> {
        let samples = self.frames.next()?;
        let frame = AudioFrame {
            sample_rate: self.sample_rate,
            samples,
        };
        if self.paced {
            tokio::time::sleep(frame.duration()).await;
        }
        Some(frame)
    }
}

/// Appends model audio to a mono PCM16 WAV file.
pub struct WavRecorder {
    writer: hound::WavWriter<BufWriter<File>>,
    samples_written: u64,
}

impl WavRecorder {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self, AudioError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)?;
        Ok(Self {
            writer,
            samples_written: 0,
        })
    }

    /// Writes one chunk of little-endian PCM16 bytes.
    pub fn write_chunk(&mut self, bytes: &[u8]) -> Result<(), AudioError> {
        for sample in pcm16_from_le_bytes(bytes)? {
            self.writer.write_sample(sample)?;
            self.samples_written += 1;
        }
        Ok(())
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Writes the WAV header lengths and closes the file.
    pub fn finalize(self) -> Result<u64, AudioError> {
        self.writer.finalize()?;
        Ok(self.samples_written)
    }
}
