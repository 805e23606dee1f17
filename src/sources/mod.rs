//! # Sources Module
//!
//! Turns what the user typed (a page URL, a direct stream URL or a search
//! term) into something the decoder can open. Resolution is asynchronous and
//! runs outside the queue lock; see [`crate::audio::resolution`].

pub mod ytdlp;

use async_trait::async_trait;
use url::Url;

use crate::{
    audio::queue::{Track, TrackKind},
    error::ResolveError,
};

pub use ytdlp::YtDlpResolver;

/// Resultado de resolver un identificador
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub stream_url: String,
    pub title: Option<String>,
    pub duration: Option<u64>,
}

/// Entradas de una playlist remota
#[derive(Debug, Clone)]
pub struct PlaylistFetch {
    pub title: String,
    pub entries: Vec<Track>,
}

/// Resolver externo: identificador → fuente reproducible
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resuelve un track a una URL de stream
    async fn resolve(&self, source: &str) -> Result<ResolvedSource, ResolveError>;

    /// Obtiene las entradas de una playlist (sin resolverlas)
    async fn fetch_playlist(&self, url: &str) -> Result<PlaylistFetch, ResolveError>;

    /// Indica si la URL apunta a una playlist
    fn is_playlist_url(&self, url: &str) -> bool;

    /// Nombre del resolver
    fn source_name(&self) -> &'static str;
}

const AUDIO_EXTENSIONS: [&str; 8] = [".mp3", ".wav", ".ogg", ".flac", ".m4a", ".opus", ".aac", ".webm"];
const STREAM_EXTENSIONS: [&str; 3] = [".m3u8", ".pls", ".m3u"];

/// Clasifica lo que escribió el usuario
pub fn classify(input: &str) -> TrackKind {
    let input = input.trim();
    match Url::parse(input) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            let path = url.path().to_lowercase();
            if AUDIO_EXTENSIONS
                .iter()
                .chain(STREAM_EXTENSIONS.iter())
                .any(|ext| path.ends_with(ext))
            {
                TrackKind::Stream
            } else {
                TrackKind::Url
            }
        }
        Ok(url) if url.scheme() == "file" => TrackKind::Stream,
        _ => TrackKind::Search,
    }
}

/// Crea el track correspondiente a la entrada del usuario
pub fn track_from_input(input: &str) -> Track {
    let input = input.trim();
    Track::new(input, classify(input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_inputs() {
        assert_eq!(classify("https://www.youtube.com/watch?v=dQw4w9WgXcQ"), TrackKind::Url);
        assert_eq!(classify("https://cdn.example.com/song.MP3"), TrackKind::Stream);
        assert_eq!(classify("http://radio.example/live.m3u8"), TrackKind::Stream);
        assert_eq!(classify("file:///tmp/a.flac"), TrackKind::Stream);
        assert_eq!(classify("never gonna give you up"), TrackKind::Search);
        assert_eq!(classify("ftp://example.com/a"), TrackKind::Search);
    }

    #[test]
    fn search_tracks_need_resolution() {
        let track = track_from_input("  lofi beats ");
        assert_eq!(track.source, "lofi beats");
        assert!(!track.is_resolved());
    }
}
