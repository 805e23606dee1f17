use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::audio::{
    decoder::BYTES_PER_FRAME,
    equalizer::{EffectParams, EqPresets},
    pipeline::PipelineConfig,
    player::SessionSettings,
};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Salida
    pub output_dir: PathBuf,
    pub native_sample_rate: u32,
    pub packet_ms: u32,
    pub join_timeout_secs: u64,

    // Decodificación
    pub decode_unit_bytes: usize,
    pub lazy_decoding: bool,
    pub lazy_buffer_secs: f64,

    // Resolución
    pub resolve_timeout_secs: u64,
    pub resolve_poll_ms: u64,

    // Límites
    pub max_queue_size: usize,
    pub max_playlist_size: usize,

    // Rendimiento
    pub worker_threads: usize,

    // Binarios externos
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,

    // Efectos
    pub default_eq_preset: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            // Salida
            output_dir: std::env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            native_sample_rate: env_or("NATIVE_SAMPLE_RATE", defaults.native_sample_rate)?,
            packet_ms: env_or("PACKET_MS", defaults.packet_ms)?,
            join_timeout_secs: env_or("JOIN_TIMEOUT_SECS", defaults.join_timeout_secs)?,

            // Decodificación
            decode_unit_bytes: env_or("DECODE_UNIT_BYTES", defaults.decode_unit_bytes)?,
            lazy_decoding: env_or("LAZY_DECODING", defaults.lazy_decoding)?,
            lazy_buffer_secs: env_or("LAZY_BUFFER_SECS", defaults.lazy_buffer_secs)?,

            // Resolución
            resolve_timeout_secs: env_or("RESOLVE_TIMEOUT_SECS", defaults.resolve_timeout_secs)?,
            resolve_poll_ms: env_or("RESOLVE_POLL_MS", defaults.resolve_poll_ms)?,

            // Límites
            max_queue_size: env_or("MAX_QUEUE_SIZE", defaults.max_queue_size)?,
            max_playlist_size: env_or("MAX_PLAYLIST_SIZE", defaults.max_playlist_size)?,

            // Rendimiento
            worker_threads: match std::env::var("WORKER_THREADS") {
                Ok(val) if !val.trim().is_empty() => val.parse()?,
                _ => num_cpus::get(),
            },

            // Binarios externos
            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: std::env::var("FFPROBE_PATH").unwrap_or(defaults.ffprobe_path),

            // Efectos
            default_eq_preset: std::env::var("DEFAULT_EQ_PRESET")
                .unwrap_or(defaults.default_eq_preset),
        };

        std::fs::create_dir_all(&config.output_dir)
            .with_context(|| format!("No se pudo crear {}", config.output_dir.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Sample rate between 8kHz and 192kHz
    /// - Packet length between 5ms and 1000ms
    /// - Queue and playlist limits greater than 0
    /// - Known equalizer preset
    pub fn validate(&self) -> Result<()> {
        if !(8000..=192_000).contains(&self.native_sample_rate) {
            anyhow::bail!(
                "Sample rate must be between 8000 and 192000 Hz, got: {}",
                self.native_sample_rate
            );
        }

        if !(5..=1000).contains(&self.packet_ms) {
            anyhow::bail!("Packet length must be between 5 and 1000 ms, got: {}", self.packet_ms);
        }

        if self.decode_unit_bytes < BYTES_PER_FRAME {
            anyhow::bail!("Decode unit must hold at least one frame, got: {}", self.decode_unit_bytes);
        }

        if self.lazy_buffer_secs <= 0.0 {
            anyhow::bail!("Lazy buffer must be positive, got: {}", self.lazy_buffer_secs);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_playlist_size == 0 {
            anyhow::bail!("Max playlist size must be greater than 0");
        }

        if self.resolve_timeout_secs == 0 || self.join_timeout_secs == 0 {
            anyhow::bail!("Timeouts must be greater than 0");
        }

        if EqPresets::get(&self.default_eq_preset).is_none() {
            anyhow::bail!(
                "Unknown equalizer preset '{}', available: {}",
                self.default_eq_preset,
                EqPresets::list().join(", ")
            );
        }

        Ok(())
    }

    /// Parámetros del pipeline derivados de la configuración
    pub fn pipeline_config(&self) -> PipelineConfig {
        let frames = self.native_sample_rate as usize * self.packet_ms as usize / 1000;
        PipelineConfig {
            native_rate: self.native_sample_rate,
            packet_bytes: frames.max(1) * BYTES_PER_FRAME,
            lazy_decoding: self.lazy_decoding,
            lazy_buffer_secs: self.lazy_buffer_secs,
            ..PipelineConfig::default()
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        let equalizer = EqPresets::get(&self.default_eq_preset)
            .map(|preset| preset.to_map())
            .unwrap_or_default();
        SessionSettings {
            resolve_timeout: self.resolve_timeout(),
            resolve_poll: Duration::from_millis(self.resolve_poll_ms.max(1)),
            max_queue_size: self.max_queue_size,
            effects: EffectParams {
                bass: None,
                equalizer,
            },
        }
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }

    /// Returns a summary of the current configuration for logging.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Output: {} @ {}Hz, {}ms packets\n  \
            Decoding: {} bytes/unit, lazy={} ({}s)\n  \
            Resolve: {}s timeout, {}ms poll\n  \
            Limits: {} queue, {} playlist\n  \
            Tools: {}, {}, {}\n  \
            EQ preset: {}",
            self.output_dir.display(),
            self.native_sample_rate,
            self.packet_ms,
            self.decode_unit_bytes,
            self.lazy_decoding,
            self.lazy_buffer_secs,
            self.resolve_timeout_secs,
            self.resolve_poll_ms,
            self.max_queue_size,
            self.max_playlist_size,
            self.ytdlp_path,
            self.ffmpeg_path,
            self.ffprobe_path,
            self.default_eq_preset
        )
    }
}

/// Lee una variable de entorno o usa el valor por defecto
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => val
            .trim()
            .parse()
            .with_context(|| format!("Valor inválido para {}: '{}'", key, val)),
        _ => Ok(default),
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: "./output".into(),
            native_sample_rate: 48000,
            packet_ms: 200,
            join_timeout_secs: 10,

            decode_unit_bytes: 16 * 1024,
            lazy_decoding: true,
            lazy_buffer_secs: 2.0,

            resolve_timeout_secs: 30,
            resolve_poll_ms: 100,

            max_queue_size: 1000,
            max_playlist_size: 100,

            worker_threads: num_cpus::get(),

            ytdlp_path: "yt-dlp".into(),
            ffmpeg_path: "ffmpeg".into(),
            ffprobe_path: "ffprobe".into(),

            default_eq_preset: "normal".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_bad_values() {
        let config = Config {
            native_sample_rate: 1000,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            default_eq_preset: "metal".into(),
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            max_queue_size: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn pipeline_packet_matches_duration() {
        let config = Config {
            native_sample_rate: 48000,
            packet_ms: 20,
            ..Config::default()
        };
        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.native_rate, 48000);
        assert_eq!(pipeline.packet_bytes, 960 * BYTES_PER_FRAME);
    }

    #[test]
    fn session_uses_default_preset() {
        let config = Config {
            default_eq_preset: "bass".into(),
            ..Config::default()
        };
        let settings = config.session_settings();
        assert_eq!(settings.effects.equalizer, EqPresets::get("bass").unwrap().to_map());
        assert_eq!(settings.resolve_timeout, Duration::from_secs(30));
    }

    #[test]
    fn env_values_are_parsed() {
        std::env::set_var("OME_TEST_RATE", " 44100 ");
        assert_eq!(env_or("OME_TEST_RATE", 48000u32).unwrap(), 44100);
        std::env::set_var("OME_TEST_RATE", "fast");
        assert!(env_or("OME_TEST_RATE", 48000u32).is_err());
        assert_eq!(env_or("OME_TEST_MISSING", 7usize).unwrap(), 7);
    }
}
