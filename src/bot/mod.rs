//! # Bot Module
//!
//! Guild session management and the text command layer.
//!
//! This module contains:
//! - [`GuildManager`]: one [`PlaybackSession`] per guild, created when the
//!   guild's audio output is joined and torn down on leave
//! - [`commands`]: parsing and execution of `<guild> <command> [args]` lines
//!
//! ## Example
//!
//! ```rust,no_run
//! # use open_music_engine::{bot::GuildManager, GuildId};
//! # fn example(manager: &GuildManager) -> anyhow::Result<()> {
//! let session = manager.join(GuildId(42))?;
//! session.pause(true);
//! manager.leave(GuildId(42));
//! # Ok(())
//! # }
//! ```

use dashmap::DashMap;
use parking_lot::Mutex;
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use tokio::runtime::Handle;
use tracing::{error, info, warn};

pub mod commands;

use crate::{
    audio::{
        decoder::Decoder,
        pipeline::PipelineConfig,
        player::{PlaybackSession, SessionSettings},
        sink::SinkConnector,
    },
    error::PlaybackError,
    sources::Resolver,
    GuildId,
};

/// Administra las sesiones de reproducción de todas las guilds.
///
/// ## Thread Safety
///
/// Las sesiones viven en un [`DashMap`]; cada comando puede llegar desde un
/// hilo distinto. Conectar la salida de audio se hace fuera del mapa para no
/// bloquear a otras guilds mientras se espera al sink; los joins de una misma
/// guild se serializan con su `join_locks`.
pub struct GuildManager {
    sessions: DashMap<GuildId, Arc<PlaybackSession>>,
    join_locks: DashMap<GuildId, Arc<Mutex<()>>>,
    connector: Arc<dyn SinkConnector>,
    resolver: Arc<dyn Resolver>,
    decoder: Arc<dyn Decoder>,
    runtime: Handle,
    pipeline: PipelineConfig,
    settings: SessionSettings,
    join_timeout: Duration,
    max_playlist_size: usize,
}

impl GuildManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connector: Arc<dyn SinkConnector>,
        resolver: Arc<dyn Resolver>,
        decoder: Arc<dyn Decoder>,
        runtime: Handle,
        pipeline: PipelineConfig,
        settings: SessionSettings,
        join_timeout: Duration,
        max_playlist_size: usize,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            join_locks: DashMap::new(),
            connector,
            resolver,
            decoder,
            runtime,
            pipeline,
            settings,
            join_timeout,
            max_playlist_size,
        }
    }

    /// Connects the guild's audio output and returns its session.
    ///
    /// Reuses the existing session when the guild is already joined. The
    /// output has `join_timeout` to become ready; otherwise the call fails
    /// with [`PlaybackError::OutputUnavailable`].
    pub fn join(&self, guild_id: GuildId) -> Result<Arc<PlaybackSession>, PlaybackError> {
        if let Some(session) = self.get(guild_id) {
            return Ok(session);
        }

        let join_lock = self.join_locks.entry(guild_id).or_default().clone();
        let _joining = join_lock.lock();
        if let Some(session) = self.get(guild_id) {
            return Ok(session);
        }

        let sink = self.connector.connect(guild_id)?;
        let deadline = Instant::now() + self.join_timeout;
        while !sink.is_ready() {
            if Instant::now() >= deadline {
                warn!("⏱️ Timeout conectando la salida de audio de guild {}", guild_id);
                return Err(PlaybackError::OutputUnavailable);
            }
            thread::sleep(Duration::from_millis(10));
        }

        let session = Arc::new(PlaybackSession::new(
            guild_id,
            sink,
            self.resolver.clone(),
            self.decoder.clone(),
            self.runtime.clone(),
            self.pipeline.clone(),
            self.settings.clone(),
        ));
        self.sessions.insert(guild_id, session.clone());
        info!("🔊 Conectado a la salida de audio en guild {}", guild_id);
        Ok(session)
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<PlaybackSession>> {
        self.sessions.get(&guild_id).map(|s| s.clone())
    }

    /// Detiene la sesión de la guild y la elimina
    pub fn leave(&self, guild_id: GuildId) -> bool {
        match self.sessions.remove(&guild_id) {
            Some((_, session)) => {
                session.shutdown();
                info!("👋 Desconectado de la salida de audio en guild {}", guild_id);
                true
            }
            None => false,
        }
    }

    pub fn guilds(&self) -> Vec<GuildId> {
        let mut guilds: Vec<GuildId> = self.sessions.iter().map(|e| *e.key()).collect();
        guilds.sort();
        guilds
    }

    pub fn max_playlist_size(&self) -> usize {
        self.max_playlist_size
    }

    /// Detiene todas las sesiones
    pub fn shutdown(&self) {
        let guilds = self.guilds();
        info!("🛑 Cerrando {} sesiones", guilds.len());
        for guild_id in guilds {
            if !self.leave(guild_id) {
                error!("❌ La sesión de guild {} desapareció durante el cierre", guild_id);
            }
        }
    }
}
