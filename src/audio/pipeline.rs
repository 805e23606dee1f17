use bytes::BytesMut;
use parking_lot::{Condvar, Mutex};
use std::{
    sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    thread,
    time::Duration,
};
use tracing::{debug, info};

use super::{
    decoder::{DecodeSession, Decoder, BYTES_PER_FRAME},
    equalizer::{BassBoost, EffectParams, EqualizerMap},
    sink::Sink,
};
use crate::error::PlaybackError;

/// Parámetros del bucle de envío
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Frecuencia a la que reproduce el sink
    pub native_rate: u32,
    /// Tamaño del paquete que se entrega al sink
    pub packet_bytes: usize,
    /// Esperar a que el sink se vacíe antes de seguir decodificando
    pub lazy_decoding: bool,
    /// Segundos de audio que se permiten en el sink con lazy decoding
    pub lazy_buffer_secs: f64,
    pub throttle_step: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            native_rate: 48000,
            packet_bytes: 48000 * BYTES_PER_FRAME / 5, // 200ms
            lazy_decoding: true,
            lazy_buffer_secs: 2.0,
            throttle_step: Duration::from_millis(20),
        }
    }
}

/// Parámetros con los que arranca una ejecución
#[derive(Debug, Clone, PartialEq)]
pub struct PlayParams {
    pub output_rate: u32,
    pub effects: EffectParams,
}

/// Metadatos que reporta el decoder al abrir la fuente
#[derive(Debug, Clone, Default)]
pub struct OpenedTrack {
    pub title: Option<String>,
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Finished,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SeekRequest {
    To(f64),
    By(f64),
}

/// Cambios pedidos desde otros hilos; se aplican entre paquetes
#[derive(Debug, Default)]
struct PendingControl {
    seek: Option<SeekRequest>,
    effects: Option<EffectParams>,
    output_rate: Option<u32>,
}

/// Contabilidad de tiempo de una ejecución
struct Clock {
    /// Segundos de contenido ya entregados al sink
    decoded: f64,
    output_rate: u32,
    native_rate: u32,
}

impl Clock {
    fn content_seconds(&self, bytes: usize) -> f64 {
        bytes as f64 / (self.output_rate as f64 * BYTES_PER_FRAME as f64)
    }

    /// Posición audible: lo entregado menos lo que el sink aún no reprodujo
    fn elapsed(&self, sink: &dyn Sink) -> f64 {
        let ratio = self.native_rate as f64 / self.output_rate as f64;
        (self.decoded - sink.remaining_buffered_seconds() * ratio).max(0.0)
    }
}

/// Pipeline decode → buffer → sink de una sesión.
///
/// Cada `run` abre y posee su propia sesión de decodificación. Los controles
/// (seek, efectos, velocidad) llegan desde otros hilos como pedidos que el
/// bucle aplica en el siguiente límite de paquete.
pub struct AudioPipeline {
    config: PipelineConfig,
    paused: Mutex<bool>,
    pause_changed: Condvar,
    stop_current: AtomicBool,
    active: AtomicBool,
    pending: Mutex<PendingControl>,
    effects: Mutex<EffectParams>,
    elapsed_bits: AtomicU64,
    output_rate: AtomicU32,
}

impl AudioPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let native_rate = config.native_rate;
        Self {
            config,
            paused: Mutex::new(false),
            pause_changed: Condvar::new(),
            stop_current: AtomicBool::new(false),
            active: AtomicBool::new(false),
            pending: Mutex::new(PendingControl::default()),
            effects: Mutex::new(EffectParams::default()),
            elapsed_bits: AtomicU64::new(0f64.to_bits()),
            output_rate: AtomicU32::new(native_rate),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Frecuencia de salida del decoder para una velocidad dada
    pub fn output_rate_for(&self, speed: f32) -> u32 {
        ((self.config.native_rate as f64 / speed as f64).round() as u32).max(1)
    }

    /// Reproduce `source` hasta terminar o hasta que se cancele
    pub fn run(
        &self,
        source: &str,
        params: &PlayParams,
        decoder: &dyn Decoder,
        sink: &dyn Sink,
        on_open: impl FnOnce(&OpenedTrack),
    ) -> Result<RunOutcome, PlaybackError> {
        self.active.store(true, Ordering::Release);
        let result = self.open_and_stream(source, params, decoder, sink, on_open);
        self.active.store(false, Ordering::Release);

        match &result {
            Ok(RunOutcome::Finished) => debug!("✅ Fuente terminada: {}", source),
            Ok(RunOutcome::Cancelled) => debug!("⏭️ Reproducción interrumpida: {}", source),
            Err(e) => debug!("❌ Pipeline falló para {}: {}", source, e),
        }
        result
    }

    fn open_and_stream(
        &self,
        source: &str,
        params: &PlayParams,
        decoder: &dyn Decoder,
        sink: &dyn Sink,
        on_open: impl FnOnce(&OpenedTrack),
    ) -> Result<RunOutcome, PlaybackError> {
        let mut session = decoder.open(source, params.output_rate)?;
        on_open(&OpenedTrack {
            title: session.title(),
            duration: session.total_duration_seconds(),
        });

        if !params.effects.is_flat() {
            session.set_effects(&params.effects)?;
        }
        self.stream(session.as_mut(), sink, params.output_rate)
    }

    fn stream(
        &self,
        session: &mut dyn DecodeSession,
        sink: &dyn Sink,
        output_rate: u32,
    ) -> Result<RunOutcome, PlaybackError> {
        let mut clock = Clock {
            decoded: 0.0,
            output_rate,
            native_rate: self.config.native_rate,
        };
        let mut buffer = BytesMut::with_capacity(self.config.packet_bytes);
        let mut discard = false;

        loop {
            if !self.wait_while_paused() {
                return Ok(RunOutcome::Cancelled);
            }
            self.apply_pending(session, sink, &mut clock, &mut buffer, &mut discard)?;

            match session.next_unit()? {
                Some(unit) => buffer.extend_from_slice(&unit),
                None => break,
            }

            if buffer.len() >= self.config.packet_bytes {
                self.throttle(sink);
                if self.is_interrupted() {
                    return Ok(RunOutcome::Cancelled);
                }
                self.send(sink, &mut buffer, &mut clock, &mut discard)?;
            }
        }

        if !buffer.is_empty() {
            self.send(sink, &mut buffer, &mut clock, &mut discard)?;
        }
        Ok(RunOutcome::Finished)
    }

    fn send(
        &self,
        sink: &dyn Sink,
        buffer: &mut BytesMut,
        clock: &mut Clock,
        discard: &mut bool,
    ) -> Result<(), PlaybackError> {
        if std::mem::take(discard) {
            sink.clear();
        }
        let packet = buffer.split().freeze();
        clock.decoded += clock.content_seconds(packet.len());
        sink.send(packet)?;
        self.store_elapsed(clock.elapsed(sink));
        Ok(())
    }

    fn apply_pending(
        &self,
        session: &mut dyn DecodeSession,
        sink: &dyn Sink,
        clock: &mut Clock,
        buffer: &mut BytesMut,
        discard: &mut bool,
    ) -> Result<(), PlaybackError> {
        let pending = std::mem::take(&mut *self.pending.lock());

        if let Some(effects) = pending.effects {
            session.set_effects(&effects)?;
        }

        if let Some(rate) = pending.output_rate.filter(|r| *r != clock.output_rate) {
            // Pausa → reposicionar en la posición audible → reanudar
            let position = clock.elapsed(sink);
            buffer.clear();
            sink.clear();
            session.set_output_rate(rate)?;
            session.seek_seconds(position)?;
            clock.output_rate = rate;
            clock.decoded = position;
            self.output_rate.store(rate, Ordering::Release);
            self.store_elapsed(position);
            info!("⏩ Frecuencia de salida cambiada a {} Hz en {:.1}s", rate, position);
        }

        if let Some(seek) = pending.seek {
            let target = match seek {
                SeekRequest::To(seconds) => seconds,
                SeekRequest::By(delta) => clock.elapsed(sink) + delta,
            }
            .max(0.0);
            session.seek_seconds(target)?;
            buffer.clear();
            clock.decoded = target;
            *discard = true;
            self.store_elapsed(target);
            info!("⏩ Posición movida a {:.1}s", target);
        }

        Ok(())
    }

    /// Espera mientras esté en pausa; `false` si hay que cortar
    fn wait_while_paused(&self) -> bool {
        let mut paused = self.paused.lock();
        while *paused && !self.is_interrupted() {
            self.pause_changed.wait(&mut paused);
        }
        !self.is_interrupted()
    }

    /// Lazy decoding: no adelantarse más de lo configurado al sink
    fn throttle(&self, sink: &dyn Sink) {
        if !self.config.lazy_decoding {
            return;
        }
        while sink.remaining_buffered_seconds() > self.config.lazy_buffer_secs
            && !self.is_interrupted()
        {
            thread::sleep(self.config.throttle_step);
        }
    }

    // Controles

    pub fn pause(&self, pause: bool) {
        let mut paused = self.paused.lock();
        if *paused != pause {
            *paused = pause;
            if pause {
                info!("⏸️ Reproducción pausada");
            } else {
                info!("▶️ Reproducción reanudada");
            }
        }
        self.pause_changed.notify_all();
    }

    /// Corta la ejecución actual y despierta a quien espere
    pub fn skip(&self) {
        self.stop_current.store(true, Ordering::Release);
        let _paused = self.paused.lock();
        self.pause_changed.notify_all();
    }

    /// Prepara la siguiente ejecución con `params`.
    ///
    /// Desde aquí el pipeline acepta controles: lo que llegue mientras el
    /// decoder abre la fuente queda pendiente y se aplica en el primer paquete.
    pub(crate) fn arm(&self, params: &PlayParams) {
        self.stop_current.store(false, Ordering::Release);
        *self.effects.lock() = params.effects.clone();
        *self.pending.lock() = PendingControl::default();
        self.output_rate.store(params.output_rate, Ordering::Release);
        self.store_elapsed(0.0);
        self.active.store(true, Ordering::Release);
    }

    pub fn is_interrupted(&self) -> bool {
        self.stop_current.load(Ordering::Acquire)
    }

    pub fn seek_to(&self, seconds: f64) -> Result<(), PlaybackError> {
        self.ensure_active()?;
        self.pending.lock().seek = Some(SeekRequest::To(seconds.max(0.0)));
        Ok(())
    }

    pub fn seek_by(&self, delta: f64) -> Result<(), PlaybackError> {
        self.ensure_active()?;
        let mut pending = self.pending.lock();
        pending.seek = Some(match pending.seek {
            Some(SeekRequest::To(seconds)) => SeekRequest::To((seconds + delta).max(0.0)),
            Some(SeekRequest::By(previous)) => SeekRequest::By(previous + delta),
            None => SeekRequest::By(delta),
        });
        Ok(())
    }

    pub fn set_output_rate(&self, rate: u32) -> Result<(), PlaybackError> {
        self.ensure_active()?;
        self.pending.lock().output_rate = Some(rate.max(1));
        Ok(())
    }

    pub fn set_bass_boost(&self, bass: Option<BassBoost>) -> Result<(), PlaybackError> {
        self.ensure_active()?;
        let mut effects = self.effects.lock();
        effects.bass = bass;
        self.pending.lock().effects = Some(effects.clone());
        Ok(())
    }

    pub fn set_equalizer(&self, equalizer: EqualizerMap) -> Result<(), PlaybackError> {
        self.ensure_active()?;
        let mut effects = self.effects.lock();
        effects.equalizer = equalizer;
        self.pending.lock().effects = Some(effects.clone());
        Ok(())
    }

    // Estado

    pub fn is_paused(&self) -> bool {
        *self.paused.lock()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Segundos reproducidos del track actual
    pub fn elapsed_seconds(&self) -> f64 {
        f64::from_bits(self.elapsed_bits.load(Ordering::Acquire))
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate.load(Ordering::Acquire)
    }

    fn store_elapsed(&self, seconds: f64) {
        self.elapsed_bits.store(seconds.to_bits(), Ordering::Release);
    }

    fn ensure_active(&self) -> Result<(), PlaybackError> {
        if !self.is_active() {
            return Err(PlaybackError::NotReady);
        }
        Ok(())
    }
}
