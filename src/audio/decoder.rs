//! Decode sessions.
//!
//! The pipeline only sees the [`Decoder`] / [`DecodeSession`] traits. The
//! bundled implementation drives an `ffmpeg` child process that writes
//! signed 16-bit stereo PCM to its stdout; effects become an `-af` filter
//! chain and seeking restarts the process with `-ss`.

use bytes::Bytes;
use serde::Deserialize;
use std::{
    io::Read,
    process::{Child, ChildStdout, Command, Stdio},
};
use tracing::{debug, warn};

use super::equalizer::EffectParams;
use crate::error::DecodeError;

/// Canales de salida (estéreo)
pub const CHANNELS: u32 = 2;
/// Bytes por frame: 2 canales × 16 bits
pub const BYTES_PER_FRAME: usize = 4;

/// Abre sesiones de decodificación
pub trait Decoder: Send + Sync {
    fn open(&self, source: &str, output_rate: u32) -> Result<Box<dyn DecodeSession>, DecodeError>;
}

/// Una sesión de decodificación; la posee en exclusiva una ejecución del pipeline
pub trait DecodeSession: Send {
    /// Siguiente bloque de PCM, `None` al terminar la fuente
    fn next_unit(&mut self) -> Result<Option<Bytes>, DecodeError>;
    fn seek_seconds(&mut self, seconds: f64) -> Result<(), DecodeError>;
    fn set_effects(&mut self, effects: &EffectParams) -> Result<(), DecodeError>;
    fn set_output_rate(&mut self, rate: u32) -> Result<(), DecodeError>;
    fn title(&self) -> Option<String>;
    fn total_duration_seconds(&self) -> Option<f64>;
}

/// Decoder basado en `ffmpeg` + `ffprobe`
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    ffmpeg: String,
    ffprobe: String,
    unit_bytes: usize,
}

impl FfmpegDecoder {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>, unit_bytes: usize) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            unit_bytes: unit_bytes.max(BYTES_PER_FRAME),
        }
    }

    fn probe(&self, source: &str) -> ProbeInfo {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration:format_tags=title",
                "-of",
                "json",
                source,
            ])
            .stdin(Stdio::null())
            .output();

        match output {
            Ok(output) if output.status.success() => {
                serde_json::from_slice::<ProbeOutput>(&output.stdout)
                    .map(ProbeInfo::from)
                    .unwrap_or_default()
            }
            Ok(output) => {
                warn!(
                    "ffprobe falló para {}: {}",
                    source,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                ProbeInfo::default()
            }
            Err(e) => {
                warn!("No se pudo ejecutar ffprobe: {}", e);
                ProbeInfo::default()
            }
        }
    }
}

impl Decoder for FfmpegDecoder {
    fn open(&self, source: &str, output_rate: u32) -> Result<Box<dyn DecodeSession>, DecodeError> {
        let probe = self.probe(source);
        let mut session = FfmpegSession {
            ffmpeg: self.ffmpeg.clone(),
            source: source.to_string(),
            rate: output_rate,
            effects: EffectParams::default(),
            position: 0.0,
            unit_bytes: self.unit_bytes,
            produced: false,
            process: None,
            probe,
        };
        // Arrancar aquí para que un binario ausente falle en la apertura
        session.spawn().map_err(|e| DecodeError::Open {
            source_id: source.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(session))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: ProbeFormat,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    #[serde(default)]
    tags: ProbeTags,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeTags {
    title: Option<String>,
}

#[derive(Debug, Default, Clone)]
struct ProbeInfo {
    title: Option<String>,
    duration: Option<f64>,
}

impl From<ProbeOutput> for ProbeInfo {
    fn from(output: ProbeOutput) -> Self {
        Self {
            title: output.format.tags.title.filter(|t| !t.is_empty()),
            duration: output
                .format
                .duration
                .and_then(|d| d.parse::<f64>().ok())
                .filter(|d| d.is_finite() && *d > 0.0),
        }
    }
}

struct FfmpegProcess {
    child: Child,
    stdout: ChildStdout,
}

/// Sesión sobre un proceso ffmpeg; cualquier cambio de configuración
/// termina el proceso y el siguiente `next_unit` lo relanza en `position`
struct FfmpegSession {
    ffmpeg: String,
    source: String,
    rate: u32,
    effects: EffectParams,
    position: f64,
    unit_bytes: usize,
    produced: bool,
    process: Option<FfmpegProcess>,
    probe: ProbeInfo,
}

impl FfmpegSession {
    fn spawn(&mut self) -> std::io::Result<()> {
        let args = ffmpeg_args(&self.source, self.position, self.rate, &self.effects);
        debug!("🎬 ffmpeg {}", args.join(" "));

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("ffmpeg sin stdout"))?;
        self.process = Some(FfmpegProcess { child, stdout });
        Ok(())
    }

    fn restart_later(&mut self) {
        if let Some(mut process) = self.process.take() {
            let _ = process.child.kill();
            let _ = process.child.wait();
        }
    }

    fn finish(&mut self) -> Result<Option<Bytes>, DecodeError> {
        let Some(mut process) = self.process.take() else {
            return Ok(None);
        };
        let status = process.child.wait()?;
        if !status.success() && !self.produced {
            let mut stderr = String::new();
            if let Some(mut pipe) = process.child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            return Err(DecodeError::Read(format!(
                "ffmpeg terminó con {}: {}",
                status,
                stderr.trim()
            )));
        }
        Ok(None)
    }
}

impl DecodeSession for FfmpegSession {
    fn next_unit(&mut self) -> Result<Option<Bytes>, DecodeError> {
        if self.process.is_none() {
            self.spawn()?;
        }
        let Some(process) = self.process.as_mut() else {
            return Ok(None);
        };

        let mut buf = vec![0u8; self.unit_bytes];
        let read = process.stdout.read(&mut buf)?;
        if read == 0 {
            return self.finish();
        }

        buf.truncate(read);
        self.produced = true;
        self.position += read as f64 / (self.rate as f64 * BYTES_PER_FRAME as f64);
        Ok(Some(Bytes::from(buf)))
    }

    fn seek_seconds(&mut self, seconds: f64) -> Result<(), DecodeError> {
        self.position = seconds.max(0.0);
        self.restart_later();
        Ok(())
    }

    fn set_effects(&mut self, effects: &EffectParams) -> Result<(), DecodeError> {
        self.effects = effects.clone();
        self.restart_later();
        Ok(())
    }

    fn set_output_rate(&mut self, rate: u32) -> Result<(), DecodeError> {
        self.rate = rate.max(1);
        self.restart_later();
        Ok(())
    }

    fn title(&self) -> Option<String> {
        self.probe.title.clone()
    }

    fn total_duration_seconds(&self) -> Option<f64> {
        self.probe.duration
    }
}

impl Drop for FfmpegSession {
    fn drop(&mut self) {
        self.restart_later();
    }
}

/// Argumentos de ffmpeg para decodificar `source` desde `start`
fn ffmpeg_args(source: &str, start: f64, rate: u32, effects: &EffectParams) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    if source.starts_with("http://") || source.starts_with("https://") {
        for arg in ["-reconnect", "1", "-reconnect_streamed", "1", "-reconnect_delay_max", "5"] {
            args.push(arg.to_string());
        }
    }
    if start > 0.0 {
        args.push("-ss".into());
        args.push(format!("{:.3}", start));
    }
    args.push("-i".into());
    args.push(source.to_string());

    if !effects.is_flat() {
        args.push("-af".into());
        args.push(filter_chain(effects));
    }

    for arg in ["-vn", "-f", "s16le", "-ac"] {
        args.push(arg.to_string());
    }
    args.push(CHANNELS.to_string());
    args.push("-ar".into());
    args.push(rate.to_string());
    args.push("pipe:1".into());
    args
}

/// Cadena de filtros para bass boost y ecualizador
fn filter_chain(effects: &EffectParams) -> String {
    let mut filters = Vec::new();
    if let Some(bass) = effects.bass.filter(|b| b.gain_db != 0.0) {
        filters.push(format!(
            "bass=g={:.1}:f={}:t=h:w={}",
            bass.gain_db, bass.frequency_hz, bass.width_hz
        ));
    }
    for (frequency, gain) in effects.equalizer.iter().filter(|(_, g)| **g != 0.0) {
        filters.push(format!("equalizer=f={}:t=o:w=1:g={:.1}", frequency, gain));
    }
    filters.join(",")
}
