//! Recorder backed by the ffmpeg binary.
//!
//! Frames are streamed as raw RGBA into an encoder process writing an
//! intermediate Matroska file; audio is spooled as `f32le` PCM next to it.
//! On stop both are muxed into the negotiated container, which ffmpeg
//! writes to stdout and we read back as chunks.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;

use dubline_common::error::{DublineError, DublineResult};
use image::RgbaImage;
use tempfile::TempDir;

use crate::error::RecorderError;
use crate::recorder::{parse_mime, CaptureConfig, MediaRecorder};

const RECORDER_NAME: &str = "ffmpeg";

/// Size of the chunks read back from the muxer.
const CHUNK_BYTES: usize = 64 * 1024;

/// Encoders and muxers an ffmpeg build offers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FfmpegCapabilities {
    pub encoders: BTreeSet<String>,
    pub muxers: BTreeSet<String>,
}

impl FfmpegCapabilities {
    /// Ask the ffmpeg binary what it can do.
    pub fn probe(binary: &str) -> DublineResult<Self> {
        let encoders = run_listing(binary, "-encoders")?;
        let muxers = run_listing(binary, "-muxers")?;
        let caps = Self {
            encoders: parse_encoders(&encoders),
            muxers: parse_muxers(&muxers),
        };
        tracing::debug!(
            encoders = caps.encoders.len(),
            muxers = caps.muxers.len(),
            "Probed ffmpeg capabilities"
        );
        Ok(caps)
    }

    pub fn has_encoder(&self, name: &str) -> bool {
        self.encoders.contains(name)
    }

    pub fn has_muxer(&self, name: &str) -> bool {
        self.muxers.contains(name)
    }
}

fn run_listing(binary: &str, flag: &str) -> DublineResult<String> {
    let output = Command::new(binary)
        .args(["-hide_banner", flag])
        .output()
        .map_err(|e| DublineError::unsupported(format!("Failed to run {binary}: {e}")))?;
    if !output.status.success() {
        return Err(DublineError::unsupported(format!(
            "{binary} {flag} failed (status {})",
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Names from `ffmpeg -encoders`: the listing after the `------` rule,
/// one `FLAGS name description` entry per line.
fn parse_encoders(listing: &str) -> BTreeSet<String> {
    listing
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("---"))
        .skip(1)
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
        .collect()
}

/// Muxer names from `ffmpeg -muxers`; comma lists are split.
fn parse_muxers(listing: &str) -> BTreeSet<String> {
    listing
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("--"))
        .skip(1)
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let flags = tokens.next()?;
            let names = tokens.next()?;
            flags.contains('E').then_some(names)
        })
        .flat_map(|names| names.split(',').map(str::to_string).collect::<Vec<_>>())
        .collect()
}

/// Muxer and encoders chosen for a mime type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProfile {
    pub muxer: &'static str,
    pub video_encoder: &'static str,
    pub audio_encoder: &'static str,
}

fn video_candidates(codec: &str) -> &'static [&'static str] {
    match codec {
        "vp9" | "vp09" => &["libvpx-vp9"],
        "vp8" => &["libvpx"],
        "av1" | "av01" => &["libaom-av1", "libsvtav1"],
        c if c.starts_with("avc1") || c == "h264" => &["libx264", "libopenh264"],
        _ => &[],
    }
}

fn audio_candidates(codec: &str) -> &'static [&'static str] {
    match codec {
        "opus" => &["libopus", "opus"],
        "vorbis" => &["libvorbis"],
        c if c.starts_with("mp4a") || c == "aac" => &["aac"],
        _ => &[],
    }
}

/// Pick a muxer and encoders this build has for `mime_type`.
pub fn resolve_profile(mime_type: &str, caps: &FfmpegCapabilities) -> Option<ResolvedProfile> {
    let (essence, codecs) = parse_mime(mime_type);
    let (muxer, default_video, default_audio): (&'static str, &[&str], &[&str]) =
        match essence.as_str() {
            "video/webm" => ("webm", &["libvpx-vp9", "libvpx"], &["libopus", "libvorbis"]),
            "video/mp4" => ("mp4", &["libx264", "libopenh264"], &["aac"]),
            "video/x-matroska" => ("matroska", &["libx264", "libvpx-vp9"], &["aac", "libopus"]),
            _ => return None,
        };
    if !caps.has_muxer(muxer) {
        return None;
    }

    let mut video: &[&'static str] = default_video;
    let mut audio: &[&'static str] = default_audio;
    for codec in &codecs {
        if !video_candidates(codec).is_empty() {
            video = video_candidates(codec);
        } else if !audio_candidates(codec).is_empty() {
            audio = audio_candidates(codec);
        } else {
            return None;
        }
    }

    let video_encoder = video.iter().copied().find(|e| caps.has_encoder(e))?;
    let audio_encoder = audio.iter().copied().find(|e| caps.has_encoder(e))?;
    Some(ResolvedProfile {
        muxer,
        video_encoder,
        audio_encoder,
    })
}

fn video_codec_args(encoder: &str) -> Vec<String> {
    let args: &[&str] = match encoder {
        "libvpx" | "libvpx-vp9" => &["-deadline", "realtime", "-cpu-used", "8", "-b:v", "2M"],
        "libx264" => &["-preset", "veryfast", "-crf", "23"],
        "libaom-av1" => &["-cpu-used", "8", "-crf", "35", "-b:v", "0"],
        _ => &[],
    };
    args.iter().map(|s| s.to_string()).collect()
}

struct Session {
    config: CaptureConfig,
    profile: ResolvedProfile,
    workdir: TempDir,
    encoder: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    stderr_task: Option<JoinHandle<String>>,
    audio: BufWriter<File>,
    audio_samples: u64,
    slots: FrameSlots,
}

/// Constant-rate frame numbering on the capture clock.
#[derive(Debug, Default)]
struct FrameSlots {
    next: u64,
    last: Option<Vec<u8>>,
}

impl FrameSlots {
    /// Write `frame` at the slot for `capture_secs`. The previous frame is
    /// repeated over slots the capture clock skipped; a frame whose slot is
    /// already filled takes the next free one, so every frame is written.
    fn push<W: Write>(&mut self, sink: &mut W, frame: &[u8], capture_secs: f64, fps: u32) -> std::io::Result<()> {
        let slot = (capture_secs.max(0.0) * fps as f64).round() as u64;
        while self.next < slot {
            sink.write_all(self.last.as_deref().unwrap_or(frame))?;
            self.next += 1;
        }
        sink.write_all(frame)?;
        self.next += 1;
        self.last = Some(frame.to_vec());
        Ok(())
    }
}

/// Records through ffmpeg subprocesses.
pub struct FfmpegRecorder {
    binary: String,
    caps: FfmpegCapabilities,
    session: Option<Session>,
}

impl FfmpegRecorder {
    /// Probe the `ffmpeg` on `PATH`.
    pub fn new() -> DublineResult<Self> {
        let caps = FfmpegCapabilities::probe("ffmpeg")?;
        Ok(Self::with_capabilities("ffmpeg", caps))
    }

    pub fn with_capabilities(binary: impl Into<String>, caps: FfmpegCapabilities) -> Self {
        Self {
            binary: binary.into(),
            caps,
            session: None,
        }
    }

    pub fn capabilities(&self) -> &FfmpegCapabilities {
        &self.caps
    }

    fn session(&mut self) -> Result<&mut Session, RecorderError> {
        self.session
            .as_mut()
            .ok_or_else(|| RecorderError::new(RECORDER_NAME, "not started"))
    }

    fn spawn_encoder(&self, config: &CaptureConfig, profile: &ResolvedProfile, workdir: &TempDir) -> Result<Child, RecorderError> {
        let video_path = workdir.path().join("video.mkv");
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgba".to_string(),
            "-s".to_string(),
            format!("{}x{}", config.geometry.width, config.geometry.height),
            "-framerate".to_string(),
            config.fps.to_string(),
            "-i".to_string(),
            "pipe:0".to_string(),
            "-an".to_string(),
            "-c:v".to_string(),
            profile.video_encoder.to_string(),
        ];
        args.append(&mut video_codec_args(profile.video_encoder));
        args.push("-pix_fmt".to_string());
        args.push("yuv420p".to_string());
        args.push("-f".to_string());
        args.push("matroska".to_string());
        args.push(video_path.display().to_string());

        tracing::debug!(args = ?args, "Starting ffmpeg encoder");
        Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RecorderError::new(RECORDER_NAME, format!("failed to start encoder: {e}")))
    }

    fn mux(&self, session: &Session) -> Result<Vec<Vec<u8>>, RecorderError> {
        let dir = session.workdir.path();
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            dir.join("video.mkv").display().to_string(),
        ];
        let has_audio = session.audio_samples > 0;
        if has_audio {
            args.extend([
                "-f".to_string(),
                "f32le".to_string(),
                "-ar".to_string(),
                session.config.audio.sample_rate.to_string(),
                "-ac".to_string(),
                session.config.audio.channels.to_string(),
                "-i".to_string(),
                dir.join("audio.f32").display().to_string(),
            ]);
        }
        args.extend(["-map".to_string(), "0:v:0".to_string(), "-c:v".to_string(), "copy".to_string()]);
        if has_audio {
            args.extend([
                "-map".to_string(),
                "1:a:0".to_string(),
                "-c:a".to_string(),
                session.profile.audio_encoder.to_string(),
            ]);
        }
        if session.profile.muxer == "mp4" {
            // A pipe is not seekable, so the moov atom cannot be patched in.
            args.extend(["-movflags".to_string(), "frag_keyframe+empty_moov".to_string()]);
        }
        args.extend(["-f".to_string(), session.profile.muxer.to_string(), "pipe:1".to_string()]);

        tracing::debug!(args = ?args, "Muxing export");
        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RecorderError::new(RECORDER_NAME, format!("failed to start muxer: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RecorderError::new(RECORDER_NAME, "failed to capture muxer stdout"))?;
        let stderr_task = child.stderr.take().map(drain_stderr);

        let mut reader = BufReader::new(stdout);
        let mut chunks = Vec::new();
        loop {
            let mut chunk = vec![0u8; CHUNK_BYTES];
            let read = reader
                .read(&mut chunk)
                .map_err(|e| RecorderError::new(RECORDER_NAME, format!("failed reading muxer output: {e}")))?;
            if read == 0 {
                break;
            }
            chunk.truncate(read);
            chunks.push(chunk);
        }

        let status = child
            .wait()
            .map_err(|e| RecorderError::new(RECORDER_NAME, format!("failed to wait on muxer: {e}")))?;
        let stderr_output = join_stderr(stderr_task);
        if !status.success() {
            return Err(RecorderError::new(
                RECORDER_NAME,
                format!("mux failed (status {status}): {}", stderr_output.trim()),
            ));
        }

        Ok(chunks)
    }
}

/// Drain stderr concurrently so ffmpeg never blocks on a full pipe.
fn drain_stderr(stderr: std::process::ChildStderr) -> JoinHandle<String> {
    std::thread::spawn(move || -> String {
        let mut reader = BufReader::new(stderr);
        let mut output = String::new();
        match reader.read_to_string(&mut output) {
            Ok(_) => output,
            Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
        }
    })
}

fn join_stderr(task: Option<JoinHandle<String>>) -> String {
    task.map(|t| {
        t.join()
            .unwrap_or_else(|_| "<failed to join stderr reader>".to_string())
    })
    .unwrap_or_default()
}

impl MediaRecorder for FfmpegRecorder {
    fn name(&self) -> &str {
        RECORDER_NAME
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        resolve_profile(mime_type, &self.caps).is_some()
    }

    fn start(&mut self, config: &CaptureConfig) -> Result<(), RecorderError> {
        if self.session.is_some() {
            return Err(RecorderError::new(RECORDER_NAME, "already recording"));
        }
        let profile = resolve_profile(&config.mime_type, &self.caps).ok_or_else(|| {
            RecorderError::new(RECORDER_NAME, format!("unsupported type {}", config.mime_type))
        })?;

        let workdir = tempfile::Builder::new()
            .prefix("dubline-export")
            .tempdir()
            .map_err(|e| RecorderError::new(RECORDER_NAME, format!("failed to create workdir: {e}")))?;
        let audio = File::create(workdir.path().join("audio.f32"))
            .map(BufWriter::new)
            .map_err(|e| RecorderError::new(RECORDER_NAME, format!("failed to create audio spool: {e}")))?;

        let mut encoder = self.spawn_encoder(config, &profile, &workdir)?;
        let stdin = encoder.stdin.take().map(BufWriter::new);
        let stderr_task = encoder.stderr.take().map(drain_stderr);

        tracing::info!(
            pid = encoder.id(),
            mime_type = %config.mime_type,
            muxer = profile.muxer,
            video_encoder = profile.video_encoder,
            audio_encoder = profile.audio_encoder,
            width = config.geometry.width,
            height = config.geometry.height,
            fps = config.fps,
            "ffmpeg recorder started"
        );

        self.session = Some(Session {
            config: config.clone(),
            profile,
            workdir,
            encoder,
            stdin,
            stderr_task,
            audio,
            audio_samples: 0,
            slots: FrameSlots::default(),
        });
        Ok(())
    }

    fn push_video_frame(&mut self, frame: &RgbaImage, capture_secs: f64) -> Result<(), RecorderError> {
        let session = self.session()?;
        let geometry = session.config.geometry;
        if frame.dimensions() != (geometry.width, geometry.height) {
            return Err(RecorderError::new(
                RECORDER_NAME,
                format!(
                    "frame is {}x{}, expected {}x{}",
                    frame.width(),
                    frame.height(),
                    geometry.width,
                    geometry.height
                ),
            ));
        }

        let fps = session.config.fps;
        let stdin = session
            .stdin
            .as_mut()
            .ok_or_else(|| RecorderError::new(RECORDER_NAME, "encoder input closed"))?;
        session
            .slots
            .push(stdin, frame.as_raw(), capture_secs, fps)
            .map_err(|e| RecorderError::new(RECORDER_NAME, format!("encoder rejected frame: {e}")))
    }

    fn push_audio(&mut self, samples: &[f32]) -> Result<(), RecorderError> {
        let session = self.session()?;
        for sample in samples {
            session
                .audio
                .write_all(&sample.to_le_bytes())
                .map_err(|e| RecorderError::new(RECORDER_NAME, format!("audio spool write failed: {e}")))?;
        }
        session.audio_samples += samples.len() as u64;
        Ok(())
    }

    fn stop(&mut self) -> Result<Vec<Vec<u8>>, RecorderError> {
        let mut session = self
            .session
            .take()
            .ok_or_else(|| RecorderError::new(RECORDER_NAME, "not started"))?;

        if let Some(mut stdin) = session.stdin.take() {
            stdin
                .flush()
                .map_err(|e| RecorderError::new(RECORDER_NAME, format!("failed to flush frames: {e}")))?;
        }
        let status = session
            .encoder
            .wait()
            .map_err(|e| RecorderError::new(RECORDER_NAME, format!("failed to wait on encoder: {e}")))?;
        let stderr_output = join_stderr(session.stderr_task.take());
        if !status.success() {
            return Err(RecorderError::new(
                RECORDER_NAME,
                format!("encoder failed (status {status}): {}", stderr_output.trim()),
            ));
        }
        if session.slots.next == 0 {
            return Err(RecorderError::new(RECORDER_NAME, "no frames were recorded"));
        }

        session
            .audio
            .flush()
            .map_err(|e| RecorderError::new(RECORDER_NAME, format!("failed to flush audio: {e}")))?;

        let chunks = self.mux(&session)?;
        tracing::info!(
            frames = session.slots.next,
            audio_samples = session.audio_samples,
            chunks = chunks.len(),
            bytes = chunks.iter().map(Vec::len).sum::<usize>(),
            "ffmpeg recorder finished"
        );
        Ok(chunks)
    }

    fn abort(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.stdin = None;
            if let Err(e) = session.encoder.kill() {
                tracing::debug!(error = %e, "Encoder already exited");
            }
            let _ = session.encoder.wait();
            join_stderr(session.stderr_task.take());
        }
    }
}

impl Drop for FfmpegRecorder {
    fn drop(&mut self) {
        self.abort();
    }
}
