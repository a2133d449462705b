//! WAV helpers for unit artifacts and the composite.
//!
//! Everything is 16-bit integer PCM. Units of one job must share sample rate
//! and channel count; the composite keeps that format.

use std::io::Cursor;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("invalid WAV data: {0}")]
    Wav(#[from] hound::Error),

    #[error("unsupported sample format: {bits}-bit {format:?}")]
    Unsupported { bits: u16, format: SampleFormat },

    #[error(
        "segment {index} is {found_rate}Hz/{found_channels}ch, expected {expected_rate}Hz/{expected_channels}ch"
    )]
    FormatMismatch {
        index: usize,
        expected_rate: u32,
        expected_channels: u16,
        found_rate: u32,
        found_channels: u16,
    },

    #[error("nothing to assemble")]
    Empty,

    #[error("pause of {pause_ms}ms exceeds the {max}ms limit", max = MAX_PAUSE_MS)]
    PauseTooLong { pause_ms: u64 },
}

/// Longest silence a single block may request: one hour.
pub const MAX_PAUSE_MS: u64 = 3_600_000;

/// Decoded PCM clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clip {
    pub spec: WavSpec,
    /// Interleaved samples.
    pub samples: Vec<i16>,
}

impl Clip {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.spec.channels.max(1) as usize
    }

    pub fn duration_ms(&self) -> u64 {
        frames_to_ms(self.frames(), self.spec.sample_rate)
    }
}

/// One entry of the composite: audio followed by `pause_after_ms` of silence.
pub struct Segment<'a> {
    pub wav: &'a [u8],
    pub pause_after_ms: u64,
}

pub fn pcm16_spec(sample_rate: u32, channels: u16) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

pub fn decode(bytes: &[u8]) -> Result<Clip, AudioError> {
    let mut reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(AudioError::Unsupported {
            bits: spec.bits_per_sample,
            format: spec.sample_format,
        });
    }
    let samples = reader.samples::<i16>().collect::<Result<Vec<_>, _>>()?;
    Ok(Clip { spec, samples })
}

pub fn encode(clip: &Clip) -> Result<Vec<u8>, AudioError> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, clip.spec)?;
        for sample in &clip.samples {
            writer.write_sample(*sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Wrap headerless little-endian PCM16 (as some providers return) in a WAV container.
pub fn wrap_pcm16(raw: &[u8], sample_rate: u32, channels: u16) -> Result<Vec<u8>, AudioError> {
    let samples = raw
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    encode(&Clip {
        spec: pcm16_spec(sample_rate, channels),
        samples,
    })
}

pub fn duration_ms(bytes: &[u8]) -> Result<u64, AudioError> {
    let reader = WavReader::new(Cursor::new(bytes))?;
    Ok(frames_to_ms(reader.duration() as usize, reader.spec().sample_rate))
}

pub fn silence_frames(pause_ms: u64, sample_rate: u32) -> Result<usize, AudioError> {
    if pause_ms > MAX_PAUSE_MS {
        return Err(AudioError::PauseTooLong { pause_ms });
    }
    pause_ms
        .checked_mul(sample_rate as u64)
        .and_then(|n| usize::try_from((n + 500) / 1000).ok())
        .ok_or(AudioError::PauseTooLong { pause_ms })
}

fn frames_to_ms(frames: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    frames as u64 * 1000 / sample_rate as u64
}

/// Concatenate segments in the given order, appending each segment's pause
/// as zero samples. A pause of zero appends nothing.
pub fn concat(segments: &[Segment<'_>]) -> Result<Clip, AudioError> {
    let mut out: Option<Clip> = None;

    for (index, segment) in segments.iter().enumerate() {
        let clip = decode(segment.wav)?;
        let composite = out.get_or_insert_with(|| Clip {
            spec: clip.spec,
            samples: Vec::new(),
        });
        if clip.spec.sample_rate != composite.spec.sample_rate
            || clip.spec.channels != composite.spec.channels
        {
            return Err(AudioError::FormatMismatch {
                index,
                expected_rate: composite.spec.sample_rate,
                expected_channels: composite.spec.channels,
                found_rate: clip.spec.sample_rate,
                found_channels: clip.spec.channels,
            });
        }
        composite.samples.extend_from_slice(&clip.samples);
        let silence = silence_frames(segment.pause_after_ms, composite.spec.sample_rate)?
            .checked_mul(composite.spec.channels as usize)
            .ok_or(AudioError::PauseTooLong {
                pause_ms: segment.pause_after_ms,
            })?;
        composite.samples.resize(composite.samples.len() + silence, 0);
    }

    out.ok_or(AudioError::Empty)
}


#[cfg(test)]
mod tests {
    use super::testing::tone;
    use super::*;

    #[test]
    fn concat_preserves_segment_order_and_pauses() {
        let a = tone(1, 4);
        let b = tone(2, 2);
        let clip = concat(&[
            Segment {
                wav: &a,
                pause_after_ms: 1,
            },
            Segment {
                wav: &b,
                pause_after_ms: 0,
            },
        ])
        .unwrap();

        // 1ms at 8kHz is 8 frames of silence.
        let mut expected = vec![1; 4];
        expected.extend(vec![0; 8]);
        expected.extend(vec![2; 2]);
        assert_eq!(clip.samples, expected);
    }

    #[test]
    fn zero_pauses_sum_durations_exactly() {
        let parts = [tone(5, 800), tone(6, 1600), tone(7, 400)];
        let segments: Vec<_> = parts
            .iter()
            .map(|wav| Segment {
                wav,
                pause_after_ms: 0,
            })
            .collect();
        let clip = concat(&segments).unwrap();
        assert_eq!(clip.frames(), 2800);
        assert_eq!(clip.duration_ms(), 350);
    }

    #[test]
    fn mismatched_rates_are_rejected() {
        let a = tone(1, 4);
        let b = encode(&Clip {
            spec: pcm16_spec(16_000, 1),
            samples: vec![1; 4],
        })
        .unwrap();
        let err = concat(&[
            Segment {
                wav: &a,
                pause_after_ms: 0,
            },
            Segment {
                wav: &b,
                pause_after_ms: 0,
            },
        ])
        .unwrap_err();
        assert!(matches!(err, AudioError::FormatMismatch { index: 1, .. }));
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(matches!(concat(&[]).unwrap_err(), AudioError::Empty));
    }

    #[test]
    fn garbage_is_not_wav() {
        assert!(matches!(decode(b"not a wav").unwrap_err(), AudioError::Wav(_)));
    }

    #[test]
    fn wrap_raw_pcm() {
        let raw: Vec<u8> = [3i16, -3, 7].iter().flat_map(|s| s.to_le_bytes()).collect();
        let wav = wrap_pcm16(&raw, 24_000, 1).unwrap();
        let clip = decode(&wav).unwrap();
        assert_eq!(clip.samples, vec![3, -3, 7]);
        assert_eq!(clip.spec.sample_rate, 24_000);
    }

    #[test]
    fn silence_rounds_to_nearest_frame() {
        assert_eq!(silence_frames(0, 8_000).unwrap(), 0);
        assert_eq!(silence_frames(250, 8_000).unwrap(), 2_000);
        assert_eq!(silence_frames(1, 22_050).unwrap(), 22);
    }

    #[test]
    fn oversized_pause_is_an_error() {
        assert_eq!(silence_frames(MAX_PAUSE_MS, 8_000).unwrap(), 28_800_000);
        assert!(matches!(
            silence_frames(MAX_PAUSE_MS + 1, 8_000).unwrap_err(),
            AudioError::PauseTooLong { .. }
        ));
        assert!(matches!(
            silence_frames(u64::MAX / 4, u32::MAX).unwrap_err(),
            AudioError::PauseTooLong { .. }
        ));

        let a = tone(1, 4);
        let err = concat(&[Segment {
            wav: &a,
            pause_after_ms: u64::MAX,
        }])
        .unwrap_err();
        assert!(matches!(err, AudioError::PauseTooLong { pause_ms: u64::MAX }));
    }

    #[test]
    fn duration_from_header() {
        assert_eq!(duration_ms(&tone(0, 8_000)).unwrap(), 1_000);
    }
}
