//! Audio validation, decoding and amplitude normalization.

use crate::error::AudioError;
use crate::types::AudioFormat;
use hound::{SampleFormat, WavReader};
use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Command, Stdio};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Sample rate forced by the second decode attempt.
pub const FALLBACK_SAMPLE_RATE: u32 = 22_050;

/// Lowest sample rate a WAV upload may declare.
pub const MIN_SAMPLE_RATE: u32 = 8_000;

/// External decoder for codecs symphonia lacks, such as Opus.
pub const FFMPEG_BIN: &str = "ffmpeg";

/// Durations outside this range are logged but still accepted.
pub const EXPECTED_DURATION_SECS: (f32, f32) = (0.1, 30.0);

/// Header facts read from a WAV container.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WavInfo {
    pub frames: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl WavInfo {
    pub fn duration_secs(&self) -> f32 {
        self.frames as f32 / self.sample_rate as f32
    }
}

/// Mono samples at a known sample rate.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Read and check a WAV header.
///
/// Fails if the container cannot be parsed, has no frames, or declares a
/// sample rate below [`MIN_SAMPLE_RATE`]. An unusual duration only logs a
/// warning.
pub fn inspect_wav(path: &Path) -> Result<WavInfo, AudioError> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();

    let info = WavInfo {
        frames: reader.duration(),
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        bits_per_sample: spec.bits_per_sample,
    };

    tracing::info!(
        frames = info.frames,
        sample_rate = info.sample_rate,
        channels = info.channels,
        bits_per_sample = info.bits_per_sample,
        "wav header"
    );

    if info.frames == 0 {
        return Err(AudioError::InvalidWav("no audio frames".into()));
    }

    if info.sample_rate < MIN_SAMPLE_RATE {
        return Err(AudioError::InvalidWav(format!(
            "sample rate too low: {}Hz",
            info.sample_rate
        )));
    }

    let duration = info.duration_secs();
    let (min, max) = EXPECTED_DURATION_SECS;
    if !(min..=max).contains(&duration) {
        tracing::warn!(duration = format!("{duration:.2}s"), "unusual audio duration");
    }

    Ok(info)
}

/// Check whether a stored upload is worth decoding.
///
/// Never fails: any problem is logged and reported as `false`. Only WAV gets
/// a structural check; other formats are left to the decoder.
pub fn is_valid_audio(path: &Path, format: AudioFormat) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => {}
        Ok(_) => {
            tracing::error!(path = %path.display(), "audio file is empty");
            return false;
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "cannot stat audio file");
            return false;
        }
    }

    if format != AudioFormat::Wav {
        return true;
    }

    match inspect_wav(path) {
        Ok(_) => true,
        Err(e) => {
            tracing::error!(error = %e, "wav validation failed");
            false
        }
    }
}

/// Decode a file to mono samples.
///
/// The first attempt keeps the native sample rate, using `hound` for WAV and
/// `symphonia` with an extension hint otherwise. If it fails, a second attempt
/// probes the container by content and resamples to [`FALLBACK_SAMPLE_RATE`].
/// Tracks whose codec symphonia cannot decode (Opus in WebM) are demuxed by
/// symphonia and decoded by [`FFMPEG_BIN`] in both attempts.
pub fn decode(path: &Path, format: AudioFormat) -> Result<DecodedAudio, AudioError> {
    let native = match decode_native(path, format) {
        Ok(audio) => return Ok(audio),
        Err(e) => e,
    };

    tracing::warn!(error = %native, "native decode failed, retrying at fallback rate");

    decode_resampled(path, FALLBACK_SAMPLE_RATE).map_err(|fallback| AudioError::Decode {
        native: Box::new(native),
        fallback: Box::new(fallback),
        fallback_rate: FALLBACK_SAMPLE_RATE,
    })
}

/// First decode attempt: native sample rate, format-specific reader.
pub fn decode_native(path: &Path, format: AudioFormat) -> Result<DecodedAudio, AudioError> {
    match format {
        AudioFormat::Wav => read_wav_mono(path),
        AudioFormat::Mp3 | AudioFormat::Webm => decode_with_symphonia(path, Some(format)),
    }
}

/// Second decode attempt: content-probed and resampled to `target_rate`.
pub fn decode_resampled(path: &Path, target_rate: u32) -> Result<DecodedAudio, AudioError> {
    let audio = decode_with_symphonia(path, None)?;

    if audio.sample_rate == target_rate {
        return Ok(audio);
    }

    let samples = resample(&audio.samples, audio.sample_rate, target_rate)?;
    Ok(DecodedAudio {
        samples,
        sample_rate: target_rate,
    })
}

/// Load a WAV file as mono f32 samples at its native rate.
pub fn read_wav_mono(path: &Path) -> Result<DecodedAudio, AudioError> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    if spec.channels == 0 {
        return Err(AudioError::InvalidWav("zero channels".into()));
    }

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<hound::Result<_>>()?,
        SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<hound::Result<_>>()?
        }
    };

    Ok(DecodedAudio {
        samples: downmix(samples, spec.channels as usize),
        sample_rate: spec.sample_rate,
    })
}

/// Decode any container symphonia understands to mono samples.
///
/// Falls through to ffmpeg when the container parses but no built-in
/// decoder exists for the track's codec.
fn decode_with_symphonia(
    path: &Path,
    hint_format: Option<AudioFormat>,
) -> Result<DecodedAudio, AudioError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(format) = hint_format {
        hint.with_extension(format.extension());
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut reader = probed.format;

    let track = reader.default_track().ok_or(AudioError::NoTrack)?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut sample_rate = codec_params.sample_rate;

    let mut decoder =
        match symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default()) {
            Ok(decoder) => decoder,
            Err(SymphoniaError::Unsupported(reason)) => {
                let rate = sample_rate.ok_or(AudioError::UnknownSampleRate)?;
                tracing::debug!(codec = ?codec_params.codec, reason, "no built-in decoder, using ffmpeg");
                return decode_with_ffmpeg(path, rate);
            }
            Err(e) => return Err(e.into()),
        };

    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::warn!(error = %e, "skipping corrupt audio frame");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        let frames = decoded.frames();
        if frames == 0 {
            continue;
        }
        sample_rate.get_or_insert(spec.rate);

        let mut buffer = SampleBuffer::<f32>::new(frames as u64, spec);
        buffer.copy_interleaved_ref(decoded);

        let channels = spec.channels.count().max(1);
        if channels > 1 {
            samples.extend(
                buffer
                    .samples()
                    .chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        } else {
            samples.extend_from_slice(buffer.samples());
        }
    }

    let sample_rate = sample_rate.ok_or(AudioError::UnknownSampleRate)?;

    tracing::debug!(
        samples = samples.len(),
        sample_rate,
        hinted = hint_format.is_some(),
        "decoded with symphonia"
    );

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Decode with the ffmpeg CLI to mono little-endian f32 at `sample_rate`.
fn decode_with_ffmpeg(path: &Path, sample_rate: u32) -> Result<DecodedAudio, AudioError> {
    let output = Command::new(FFMPEG_BIN)
        .args(["-nostdin", "-hide_banner", "-loglevel", "error", "-i"])
        .arg(path)
        .args(["-vn", "-ac", "1", "-ar"])
        .arg(sample_rate.to_string())
        .args(["-f", "f32le", "pipe:1"])
        .stdin(Stdio::null())
        .output()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => AudioError::FfmpegUnavailable(e),
            _ => AudioError::Io(e),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AudioError::Ffmpeg(format!("{}: {}", output.status, stderr.trim())));
    }

    let samples: Vec<f32> = output
        .stdout
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    tracing::debug!(samples = samples.len(), sample_rate, "decoded with ffmpeg");

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Average interleaved channels into one.
fn downmix(samples: Vec<f32>, channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples;
    }

    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Sinc resampling with rubato, processed in fixed-size chunks.
///
/// The resampler's output delay is trimmed from the front and the tail is
/// flushed, so output sample `i` lines up with input time `i / to_rate`.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, AudioError> {
    use rubato::{
        Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
    };

    if samples.is_empty() || from_rate == to_rate {
        return Ok(samples.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = to_rate as f64 / from_rate as f64;
    let chunk_size = 1024;
    let expected = (samples.len() as f64 * ratio) as usize;

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk_size, 1)
        .map_err(|e| AudioError::Resample(e.to_string()))?;
    let delay = resampler.output_delay();

    let mut output = Vec::with_capacity(delay + expected + chunk_size);

    let mut chunks = samples.chunks_exact(chunk_size);
    for chunk in &mut chunks {
        let result = resampler
            .process(&[chunk], None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        if let Some(channel) = result.first() {
            output.extend_from_slice(channel);
        }
    }

    let remainder = chunks.remainder();
    if !remainder.is_empty() {
        let result = resampler
            .process_partial(Some(&[remainder][..]), None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        if let Some(channel) = result.first() {
            output.extend_from_slice(channel);
        }
    }

    while output.len() < delay + expected {
        let result = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        match result.first() {
            Some(channel) if !channel.is_empty() => output.extend_from_slice(channel),
            _ => break,
        }
    }

    output.drain(..delay.min(output.len()));
    output.truncate(expected);

    Ok(output)
}

/// Scale samples so the loudest one has magnitude 1.
///
/// Silent input is left untouched.
pub fn peak_normalize(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));

    if peak > 0.0 && peak.is_finite() {
        for sample in samples.iter_mut() {
            *sample /= peak;
        }
    }
}
