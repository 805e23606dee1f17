//! Error types for the playback engine.
//!
//! Queue errors are command-level precondition failures: the queue is left
//! untouched. Resolution and decode errors are per-track and recovered by the
//! orchestrator, which drops the failing track and keeps going.

use thiserror::Error;

/// Errores de validación de la cola
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("Índice inválido: {index} (la cola tiene {len} elementos)")]
    InvalidIndex { index: usize, len: usize },

    #[error("Rango inválido: {from}..={to} (la cola tiene {len} elementos)")]
    InvalidRange { from: usize, to: usize, len: usize },

    #[error("Playlist inválida: {index} (hay {count} playlists)")]
    InvalidPlaylist { index: usize, count: usize },

    #[error("Velocidad inválida: {0}")]
    InvalidSpeed(f32),

    #[error("La cola está llena (máximo {0} canciones)")]
    Full(usize),
}

/// Errores del resolver externo
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("Resolver falló para '{source_id}': {reason}")]
    Failed { source_id: String, reason: String },

    #[error("Respuesta del resolver inválida: {0}")]
    InvalidOutput(String),

    #[error("Resolución cancelada")]
    Cancelled,

    #[error("Resolución excedió {0}s")]
    Timeout(u64),
}

/// Errores del decoder
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("No se pudo abrir '{source_id}': {reason}")]
    Open { source_id: String, reason: String },

    #[error("Error de lectura: {0}")]
    Read(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errores del sink de salida
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sink cerrado")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error de una sesión de reproducción
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Resolución fallida: {0}")]
    Resolution(#[from] ResolveError),

    #[error("Decodificación fallida: {0}")]
    Decode(#[from] DecodeError),

    #[error("Salida de audio: {0}")]
    Sink(#[from] SinkError),

    #[error("No hay una sesión de decodificación activa")]
    NotReady,

    #[error("No se pudo establecer la salida de audio")]
    OutputUnavailable,
}

impl PlaybackError {
    /// Errores que solo afectan al track actual
    pub fn is_per_track(&self) -> bool {
        matches!(self, Self::Resolution(_) | Self::Decode(_))
    }
}
