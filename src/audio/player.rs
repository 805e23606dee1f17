use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use super::{
    decoder::Decoder,
    equalizer::{BassBoost, EffectParams, EqualizerMap},
    pipeline::{AudioPipeline, PipelineConfig, PlayParams, RunOutcome},
    queue::{BatchInsert, PlaylistRange, QueueInfo, Repeat, Track, TrackQueue},
    resolution::{HandshakeOutcome, ResolutionHandshake},
    sink::Sink,
};
use crate::{
    error::{PlaybackError, QueueError, ResolveError},
    sources::Resolver,
    GuildId,
};

/// Estado del reproductor de una guild
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Resolving,
    Playing,
    Stopped,
}

/// Ajustes de una sesión
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Tiempo máximo de espera por el resolver
    pub resolve_timeout: Duration,
    /// Cada cuánto se revisa si la resolución quedó obsoleta
    pub resolve_poll: Duration,
    pub max_queue_size: usize,
    /// Efectos con los que arranca cada track
    pub effects: EffectParams,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            resolve_timeout: Duration::from_secs(30),
            resolve_poll: Duration::from_millis(100),
            max_queue_size: 1000,
            effects: EffectParams::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NowPlaying {
    pub index: usize,
    pub track: Track,
    pub range: Option<PlaylistRange>,
    pub elapsed: Duration,
    pub paused: bool,
    pub state: PlayerState,
}

enum Step {
    Continue,
    Exit,
}

enum Resolution {
    Ready,
    Superseded,
    Stopped,
    Failed(ResolveError),
}

/// Estado compartido entre la sesión y su hilo de reproducción
struct Shared {
    guild_id: GuildId,
    queue: Arc<Mutex<TrackQueue>>,
    pipeline: AudioPipeline,
    resolver: Arc<dyn Resolver>,
    decoder: Arc<dyn Decoder>,
    sink: Arc<dyn Sink>,
    runtime: Handle,
    settings: SessionSettings,
    effects: Mutex<EffectParams>,
    state: Mutex<PlayerState>,
    stopped: AtomicBool,
    /// Solo se modifica con la cola bloqueada
    running: AtomicBool,
}

/// Reproductor de una guild: la cola y el hilo que la recorre.
///
/// Los comandos pueden llegar desde cualquier hilo. Los que interrumpen la
/// reproducción (skip, stop, borrar el track actual) cambian la cola y cortan
/// el pipeline dentro de la misma sección crítica.
pub struct PlaybackSession {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackSession {
    pub fn new(
        guild_id: GuildId,
        sink: Arc<dyn Sink>,
        resolver: Arc<dyn Resolver>,
        decoder: Arc<dyn Decoder>,
        runtime: Handle,
        pipeline: PipelineConfig,
        settings: SessionSettings,
    ) -> Self {
        let effects = settings.effects.clone();
        Self {
            shared: Arc::new(Shared {
                guild_id,
                queue: Arc::new(Mutex::new(TrackQueue::new(settings.max_queue_size))),
                pipeline: AudioPipeline::new(pipeline),
                resolver,
                decoder,
                sink,
                runtime,
                settings,
                effects: Mutex::new(effects),
                state: Mutex::new(PlayerState::Idle),
                stopped: AtomicBool::new(false),
                running: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.shared.guild_id
    }

    pub fn resolver(&self) -> &Arc<dyn Resolver> {
        &self.shared.resolver
    }

    pub fn runtime(&self) -> &Handle {
        &self.shared.runtime
    }

    // Encolar

    /// Agrega un track (al final si `index` es `None`) y devuelve su índice único
    pub fn enqueue(
        &self,
        track: Track,
        index: Option<usize>,
        speed: f32,
        repeat: Repeat,
    ) -> Result<u64, PlaybackError> {
        let (unique, start) = {
            let mut queue = self.shared.queue.lock();
            let index = index.unwrap_or(queue.len());
            let unique = queue.insert_track(index, track, speed, repeat)?;
            (unique, self.claim_worker())
        };
        if start {
            self.spawn_worker();
        }
        Ok(unique)
    }

    pub fn enqueue_batch(
        &self,
        tracks: Vec<Track>,
        index: Option<usize>,
        speed: f32,
        as_playlist: bool,
        title: &str,
        repeat: Repeat,
    ) -> Result<BatchInsert, PlaybackError> {
        let (batch, start) = {
            let mut queue = self.shared.queue.lock();
            let index = index.unwrap_or(queue.len());
            let batch = queue.insert_batch(index, tracks, speed, as_playlist, title, repeat)?;
            let start = !batch.unique_indices.is_empty() && self.claim_worker();
            (batch, start)
        };
        if start {
            self.spawn_worker();
        }
        Ok(batch)
    }

    // Interrupciones

    /// Pasa al siguiente track sin aplicar repeticiones
    pub fn skip(&self) -> Result<(), PlaybackError> {
        let mut queue = self.shared.queue.lock();
        let current = queue.current().ok_or(PlaybackError::NotReady)?;
        queue.reset_track_plays(current);
        if let Some(range) = queue.range_containing(current) {
            if queue.ranges()[range].end == current {
                queue.reset_range_plays(range);
            }
        }
        queue.set_current(Some(current + 1));
        self.shared.pipeline.skip();
        info!("⏭️ Canción saltada en guild {}", self.shared.guild_id);
        Ok(())
    }

    /// Salta a la posición `index`
    pub fn skip_to(&self, index: usize) -> Result<(), PlaybackError> {
        let start = {
            let mut queue = self.shared.queue.lock();
            if index >= queue.len() {
                return Err(QueueError::InvalidIndex {
                    index,
                    len: queue.len(),
                }
                .into());
            }
            queue.reset_track_plays(index);
            queue.set_current(Some(index));
            self.shared.pipeline.skip();
            self.claim_worker()
        };
        if start {
            self.spawn_worker();
        }
        info!("⏭️ Saltando a la posición {}", index);
        Ok(())
    }

    /// Detiene la reproducción y vacía la cola
    pub fn stop(&self) {
        {
            let mut queue = self.shared.queue.lock();
            self.shared.stopped.store(true, Ordering::Release);
            queue.clear();
            self.shared.pipeline.skip();
            self.shared.set_state(PlayerState::Stopped);
        }
        self.shared.pipeline.pause(false);
        info!("⏹️ Reproducción detenida en guild {}", self.shared.guild_id);
    }

    /// Detiene la sesión y espera a que termine su hilo
    pub fn shutdown(&self) {
        self.stop();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("❌ El hilo de reproducción de {} terminó con pánico", self.shared.guild_id);
            }
        }
    }

    // Edición de la cola

    pub fn delete(&self, index: usize) -> Result<Track, PlaybackError> {
        let mut queue = self.shared.queue.lock();
        let was_current = queue.current() == Some(index);
        let removed = queue.delete_track(index)?;
        if was_current {
            self.shared.pipeline.skip();
        }
        Ok(removed)
    }

    pub fn delete_range(&self, from: usize, to: usize) -> Result<Vec<Track>, PlaybackError> {
        let mut queue = self.shared.queue.lock();
        let hits_current = queue
            .current()
            .is_some_and(|current| from <= current && current <= to);
        let removed = queue.delete_range(from, to)?;
        if hits_current {
            self.shared.pipeline.skip();
        }
        Ok(removed)
    }

    pub fn transfer(&self, from: usize, to: usize) -> Result<(), PlaybackError> {
        Ok(self.shared.queue.lock().transfer_track(from, to)?)
    }

    pub fn reverse(&self, from: usize, to: usize) -> Result<(), PlaybackError> {
        Ok(self.shared.queue.lock().reverse(from, to)?)
    }

    pub fn shuffle(&self, from: usize, to: usize, keep_first: Option<usize>) -> Result<(), PlaybackError> {
        Ok(self.shared.queue.lock().shuffle(from, to, keep_first)?)
    }

    pub fn shuffle_all(&self, keep_first: Option<usize>) -> Result<(), PlaybackError> {
        Ok(self.shared.queue.lock().shuffle_all(keep_first)?)
    }

    pub fn reverse_playlist(&self, range: usize) -> Result<(), PlaybackError> {
        Ok(self.shared.queue.lock().reverse_playlist(range)?)
    }

    pub fn shuffle_playlist(&self, range: usize, keep_first: Option<usize>) -> Result<(), PlaybackError> {
        Ok(self.shared.queue.lock().shuffle_playlist(range, keep_first)?)
    }

    pub fn add_range(
        &self,
        begin: usize,
        end: usize,
        repeat: Repeat,
        title: &str,
    ) -> Result<u64, PlaybackError> {
        Ok(self.shared.queue.lock().add_range(begin, end, repeat, title)?)
    }

    pub fn remove_range(&self, range: usize) -> Result<PlaylistRange, PlaybackError> {
        Ok(self.shared.queue.lock().remove_playlist_range(range)?)
    }

    pub fn set_repeat(&self, index: usize, repeat: Repeat) -> Result<(), PlaybackError> {
        Ok(self.shared.queue.lock().set_repeat(index, repeat)?)
    }

    pub fn set_range_repeat(&self, range: usize, repeat: Repeat) -> Result<(), PlaybackError> {
        Ok(self.shared.queue.lock().set_range_repeat(range, repeat)?)
    }

    /// Cambia la velocidad de un track; si está sonando se aplica en vivo
    pub fn set_speed(&self, index: usize, speed: f32) -> Result<(), PlaybackError> {
        let mut queue = self.shared.queue.lock();
        queue.set_speed(index, speed)?;
        if queue.current() == Some(index) && self.shared.pipeline.is_active() {
            let rate = self.shared.pipeline.output_rate_for(speed);
            ignore_not_ready(self.shared.pipeline.set_output_rate(rate))?;
        }
        Ok(())
    }

    // Controles del pipeline

    pub fn pause(&self, pause: bool) {
        self.shared.pipeline.pause(pause);
    }

    pub fn seek_to(&self, seconds: f64) -> Result<(), PlaybackError> {
        self.shared.pipeline.seek_to(seconds)
    }

    pub fn seek_by(&self, delta: f64) -> Result<(), PlaybackError> {
        self.shared.pipeline.seek_by(delta)
    }

    /// Guarda el bass boost de la sesión y lo aplica al track en curso
    pub fn set_bass_boost(&self, bass: Option<BassBoost>) -> Result<(), PlaybackError> {
        let _queue = self.shared.queue.lock();
        self.shared.effects.lock().bass = bass;
        ignore_not_ready(self.shared.pipeline.set_bass_boost(bass))
    }

    pub fn set_equalizer(&self, equalizer: EqualizerMap) -> Result<(), PlaybackError> {
        let _queue = self.shared.queue.lock();
        self.shared.effects.lock().equalizer = equalizer.clone();
        ignore_not_ready(self.shared.pipeline.set_equalizer(equalizer))
    }

    pub fn effects(&self) -> EffectParams {
        self.shared.effects.lock().clone()
    }

    // Consultas

    pub fn state(&self) -> PlayerState {
        self.shared.state()
    }

    pub fn is_paused(&self) -> bool {
        self.shared.pipeline.is_paused()
    }

    pub fn now_playing(&self) -> Option<NowPlaying> {
        let queue = self.shared.queue.lock();
        let index = queue.current()?;
        let track = queue.track(index)?.clone();
        let range = queue
            .range_containing(index)
            .and_then(|r| queue.range(r))
            .cloned();
        Some(NowPlaying {
            index,
            track,
            range,
            elapsed: Duration::from_secs_f64(self.shared.pipeline.elapsed_seconds()),
            paused: self.shared.pipeline.is_paused(),
            state: self.shared.state(),
        })
    }

    pub fn queue_info(&self) -> QueueInfo {
        self.shared.queue.lock().info()
    }

    // Hilo de reproducción

    /// Reserva el arranque del hilo; llamar con la cola bloqueada
    fn claim_worker(&self) -> bool {
        self.shared.stopped.store(false, Ordering::Release);
        !self.shared.running.swap(true, Ordering::AcqRel)
    }

    fn spawn_worker(&self) {
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(format!("player-{}", self.shared.guild_id))
            .spawn(move || shared.run());

        match spawned {
            Ok(handle) => {
                // El hilo anterior ya terminó o está por terminar
                *self.worker.lock() = Some(handle);
            }
            Err(e) => {
                error!("❌ No se pudo iniciar el hilo de reproducción: {}", e);
                let _queue = self.shared.queue.lock();
                self.shared.running.store(false, Ordering::Release);
            }
        }
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        if self.shared.running.load(Ordering::Acquire) {
            self.stop();
        }
    }
}

impl Shared {
    fn run(&self) {
        info!("▶️ Reproductor iniciado para guild {}", self.guild_id);
        while let Step::Continue = self.cycle() {}
        debug!("💤 Reproductor de guild {} en reposo", self.guild_id);
    }

    fn cycle(&self) -> Step {
        // 1. Track actual
        let (unique, pending) = {
            let mut queue = self.queue.lock();
            if self.stopped.load(Ordering::Acquire) {
                return self.exit(PlayerState::Stopped);
            }
            let index = queue.current().unwrap_or(0);
            if index >= queue.len() {
                queue.clear();
                info!("📭 Cola terminada en guild {}", self.guild_id);
                return self.exit(PlayerState::Idle);
            }
            queue.set_current(Some(index));
            let track = &queue.tracks()[index];
            let pending = (!track.is_resolved()).then(|| track.source.clone());
            if pending.is_some() {
                self.set_state(PlayerState::Resolving);
            }
            (track.unique_index(), pending)
        };

        if let Some(source) = pending {
            match self.resolve(unique, source) {
                Resolution::Ready => {}
                Resolution::Superseded | Resolution::Stopped => return Step::Continue,
                Resolution::Failed(e) => {
                    warn!("⚠️ No se pudo resolver el track #{}: {}", unique, e);
                    self.drop_track(unique);
                    return Step::Continue;
                }
            }
        }

        // 2. Parámetros de reproducción
        let (stream_url, title, params) = {
            let queue = self.queue.lock();
            if self.stopped.load(Ordering::Acquire) {
                return Step::Continue;
            }
            let Some(track) = queue.current_track().filter(|t| t.unique_index() == unique) else {
                return Step::Continue;
            };
            let Some(stream_url) = track.stream_url.clone() else {
                return Step::Continue;
            };
            let params = PlayParams {
                output_rate: self.pipeline.output_rate_for(track.speed),
                effects: self.effects.lock().clone(),
            };
            self.pipeline.arm(&params);
            self.set_state(PlayerState::Playing);
            (stream_url, track.title.clone(), params)
        };

        info!("🎵 Reproduciendo: {}", title);
        let result = self.pipeline.run(
            &stream_url,
            &params,
            self.decoder.as_ref(),
            self.sink.as_ref(),
            |opened| {
                let duration = opened.duration.map(|d| d.round() as u64);
                self.queue
                    .lock()
                    .backfill_metadata(unique, opened.title.as_deref(), duration);
            },
        );

        // 3. Siguiente índice
        match result {
            Ok(RunOutcome::Finished) => {}
            Ok(RunOutcome::Cancelled) => return Step::Continue,
            Err(e) if e.is_per_track() => {
                warn!("⚠️ Track #{} descartado: {}", unique, e);
                self.drop_track(unique);
                return Step::Continue;
            }
            Err(e) => {
                error!("❌ Reproducción detenida en guild {}: {}", self.guild_id, e);
                let _queue = self.queue.lock();
                return self.exit(PlayerState::Stopped);
            }
        }

        let mut queue = self.queue.lock();
        if self.stopped.load(Ordering::Acquire) {
            return Step::Continue;
        }
        let Some(index) = queue.current() else {
            return Step::Continue;
        };
        if queue.track(index).map(Track::unique_index) != Some(unique) {
            return Step::Continue;
        }
        let next = next_index(&mut queue, index);
        queue.set_current(Some(next));
        Step::Continue
    }

    /// Espera la resolución del track `unique` mientras siga siendo el actual
    fn resolve(&self, unique: u64, source: String) -> Resolution {
        let handshake = ResolutionHandshake::spawn(
            &self.runtime,
            self.resolver.clone(),
            self.queue.clone(),
            unique,
            source,
        );
        let deadline = Instant::now() + self.settings.resolve_timeout;

        loop {
            if let Some(outcome) = handshake.wait_timeout(self.settings.resolve_poll) {
                return match outcome {
                    HandshakeOutcome::Committed => Resolution::Ready,
                    HandshakeOutcome::Superseded => Resolution::Superseded,
                    HandshakeOutcome::Failed(e) => Resolution::Failed(e),
                };
            }
            if self.stopped.load(Ordering::Acquire) {
                handshake.terminate();
                return Resolution::Stopped;
            }
            if !self.slot_holds(unique) {
                handshake.detach();
                return Resolution::Superseded;
            }
            if Instant::now() >= deadline {
                handshake.terminate();
                return Resolution::Failed(ResolveError::Timeout(
                    self.settings.resolve_timeout.as_secs(),
                ));
            }
        }
    }

    fn slot_holds(&self, unique: u64) -> bool {
        self.queue
            .lock()
            .current_track()
            .is_some_and(|t| t.unique_index() == unique)
    }

    fn drop_track(&self, unique: u64) {
        let mut queue = self.queue.lock();
        if let Some(position) = queue.position_of(unique) {
            if let Ok(track) = queue.delete_track(position) {
                info!("🗑️ '{}' eliminado de la cola", track.title);
            }
        }
    }

    /// Marca el hilo como terminado; llamar con la cola bloqueada
    fn exit(&self, state: PlayerState) -> Step {
        self.running.store(false, Ordering::Release);
        self.set_state(state);
        Step::Exit
    }

    fn state(&self) -> PlayerState {
        *self.state.lock()
    }

    fn set_state(&self, state: PlayerState) {
        *self.state.lock() = state;
    }
}

/// Calcula el índice que sigue a `index` y actualiza los contadores de repetición
fn next_index(queue: &mut TrackQueue, index: usize) -> usize {
    let played = queue.bump_track_plays(index);
    if queue.tracks()[index].repeat.allows_another(played) {
        return index;
    }
    queue.reset_track_plays(index);

    let closing = queue
        .range_containing(index)
        .filter(|&r| queue.ranges()[r].end == index);
    if let Some(range) = closing {
        let played = queue.bump_range_plays(range);
        let playlist = &queue.ranges()[range];
        if playlist.repeat.allows_another(played) {
            debug!("🔁 Repitiendo playlist '{}'", playlist.title);
            return playlist.begin;
        }
        queue.reset_range_plays(range);
    }

    index + 1
}

fn ignore_not_ready(result: Result<(), PlaybackError>) -> Result<(), PlaybackError> {
    match result {
        Err(PlaybackError::NotReady) => Ok(()),
        other => other,
    }
}
