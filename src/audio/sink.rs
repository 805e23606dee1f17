//! Output sinks.
//!
//! A sink accepts raw PCM (s16le stereo at the native rate) and reports how
//! many seconds of audio it still holds. [`PipeSink`] writes to a file or a
//! named pipe and models the playback clock from wall time, which is enough
//! for `ffplay -f s16le -ar 48000 -ac 2 guild.pcm` style listening.

use bytes::Bytes;
use parking_lot::Mutex;
use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, error, info};

use super::decoder::BYTES_PER_FRAME;
use crate::{error::SinkError, GuildId};

/// Destino del audio decodificado
#[cfg_attr(test, mockall::automock)]
pub trait Sink: Send + Sync {
    fn send(&self, pcm: Bytes) -> Result<(), SinkError>;
    /// Segundos de audio enviados que aún no se reprodujeron
    fn remaining_buffered_seconds(&self) -> f64;
    fn is_ready(&self) -> bool;
    /// Descarta el audio en vuelo (tras un seek)
    fn clear(&self);
}

/// Crea el sink de salida de una guild
pub trait SinkConnector: Send + Sync {
    fn connect(&self, guild_id: GuildId) -> Result<Arc<dyn Sink>, SinkError>;
}

type Writer = Box<dyn Write + Send>;

/// Sink que escribe PCM crudo en un archivo o FIFO
pub struct PipeSink {
    writer: Arc<Mutex<Option<Writer>>>,
    queued_until: Mutex<Instant>,
    sample_rate: u32,
}

impl PipeSink {
    /// Abre `path` en segundo plano; una FIFO bloquea hasta que aparece un lector
    pub fn open(path: impl AsRef<Path>, sample_rate: u32) -> Self {
        let path = path.as_ref().to_path_buf();
        let writer: Arc<Mutex<Option<Writer>>> = Arc::new(Mutex::new(None));
        let slot = writer.clone();

        std::thread::spawn(move || {
            match OpenOptions::new().write(true).create(true).truncate(true).open(&path) {
                Ok(file) => {
                    info!("🔊 Salida de audio lista en {}", path.display());
                    *slot.lock() = Some(Box::new(file));
                }
                Err(e) => error!("❌ No se pudo abrir {}: {}", path.display(), e),
            }
        });

        Self::with_slot(writer, sample_rate)
    }

    pub fn from_writer(writer: impl Write + Send + 'static, sample_rate: u32) -> Self {
        let boxed: Writer = Box::new(writer);
        Self::with_slot(Arc::new(Mutex::new(Some(boxed))), sample_rate)
    }

    fn with_slot(writer: Arc<Mutex<Option<Writer>>>, sample_rate: u32) -> Self {
        Self {
            writer,
            queued_until: Mutex::new(Instant::now()),
            sample_rate: sample_rate.max(1),
        }
    }

    fn duration_of(&self, bytes: usize) -> Duration {
        let bytes_per_second = self.sample_rate as f64 * BYTES_PER_FRAME as f64;
        Duration::from_secs_f64(bytes as f64 / bytes_per_second)
    }
}

impl Sink for PipeSink {
    fn send(&self, pcm: Bytes) -> Result<(), SinkError> {
        {
            let mut writer = self.writer.lock();
            let writer = writer.as_mut().ok_or(SinkError::Closed)?;
            writer.write_all(&pcm)?;
            writer.flush()?;
        }

        let now = Instant::now();
        let mut queued_until = self.queued_until.lock();
        let start = (*queued_until).max(now);
        *queued_until = start + self.duration_of(pcm.len());
        Ok(())
    }

    fn remaining_buffered_seconds(&self) -> f64 {
        self.queued_until
            .lock()
            .saturating_duration_since(Instant::now())
            .as_secs_f64()
    }

    fn is_ready(&self) -> bool {
        self.writer.lock().is_some()
    }

    fn clear(&self) {
        debug!("🧹 Descartando audio en vuelo");
        *self.queued_until.lock() = Instant::now();
    }
}

/// Conecta una `PipeSink` por guild en `dir/<guild>.pcm`
pub struct PipeConnector {
    dir: PathBuf,
    sample_rate: u32,
}

impl PipeConnector {
    pub fn new(dir: impl Into<PathBuf>, sample_rate: u32) -> Self {
        Self {
            dir: dir.into(),
            sample_rate,
        }
    }
}

impl SinkConnector for PipeConnector {
    fn connect(&self, guild_id: GuildId) -> Result<Arc<dyn Sink>, SinkError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.pcm", guild_id));
        Ok(Arc::new(PipeSink::open(path, self.sample_rate)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn remaining_seconds_follow_sent_audio() {
        let sink = PipeSink::from_writer(std::io::sink(), 48000);
        assert!(sink.is_ready());
        assert_eq!(sink.remaining_buffered_seconds(), 0.0);

        // 1 segundo de audio
        sink.send(Bytes::from(vec![0u8; 48000 * 4])).unwrap();
        let remaining = sink.remaining_buffered_seconds();
        assert!(remaining > 0.9 && remaining <= 1.0, "remaining = {remaining}");

        sink.send(Bytes::from(vec![0u8; 48000 * 4])).unwrap();
        assert!(sink.remaining_buffered_seconds() > 1.9);

        sink.clear();
        assert!(sink.remaining_buffered_seconds() < 0.01);
    }

    #[test]
    fn connector_writes_pcm_file_per_guild() {
        let dir = tempfile::tempdir().unwrap();
        let connector = PipeConnector::new(dir.path(), 48000);
        let sink = connector.connect(GuildId(42)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !sink.is_ready() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(sink.is_ready());
        sink.send(Bytes::from_static(&[1, 2, 3, 4])).unwrap();

        let mut content = Vec::new();
        std::fs::File::open(dir.path().join("42.pcm"))
            .unwrap()
            .read_to_end(&mut content)
            .unwrap();
        assert_eq!(content, vec![1, 2, 3, 4]);
    }
}
