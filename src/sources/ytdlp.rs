use async_trait::async_trait;
use serde::Deserialize;
use std::{process::Stdio, time::Duration};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{classify, PlaylistFetch, ResolvedSource, Resolver};
use crate::{
    audio::queue::{Track, TrackKind},
    error::ResolveError,
};

/// Resolver basado en el proceso `yt-dlp`.
///
/// Cada llamada lanza un proceso hijo con `kill_on_drop`, así que cancelar el
/// future (o abortar la tarea que lo ejecuta) termina el proceso.
pub struct YtDlpResolver {
    binary: String,
    timeout: Duration,
}

impl YtDlpResolver {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Verifica que yt-dlp esté disponible
    pub async fn verify_dependencies(&self) -> Result<String, ResolveError> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map_err(|e| self.failed("--version", e.to_string()))?;

        if !output.status.success() {
            return Err(self.failed("--version", "yt-dlp no disponible".into()));
        }
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("✅ yt-dlp versión: {}", version);
        Ok(version)
    }

    /// Busca archivo de cookies disponible
    fn find_cookies_file() -> Option<String> {
        let candidates = [
            format!(
                "{}/.config/yt-dlp/cookies.txt",
                std::env::var("HOME").unwrap_or_default()
            ),
            "./cookies.txt".to_string(),
        ];

        candidates
            .into_iter()
            .find(|path| std::path::Path::new(path).exists())
    }

    async fn run(&self, args: &[&str], target: &str) -> Result<String, ResolveError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .args(["--no-warnings", "--quiet", "--socket-timeout", "15"])
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if let Some(cookies) = Self::find_cookies_file() {
            debug!("🍪 Usando cookies en: {}", cookies);
            cmd.args(["--cookies", cookies.as_str()]);
        }
        cmd.arg(target);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ResolveError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| self.failed(target, e.to_string()))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            warn!("yt-dlp falló para {}: {}", target, error.trim());
            return Err(self.failed(target, error.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn failed(&self, target: &str, reason: String) -> ResolveError {
        ResolveError::Failed {
            source_id: target.to_string(),
            reason,
        }
    }
}

#[async_trait]
impl Resolver for YtDlpResolver {
    async fn resolve(&self, source: &str) -> Result<ResolvedSource, ResolveError> {
        let target = match classify(source) {
            TrackKind::Search => format!("ytsearch1:{}", source),
            _ => source.to_string(),
        };
        info!("🔍 Resolviendo: {}", target);

        let json = self
            .run(&["-J", "--no-playlist", "-f", "bestaudio/best"], &target)
            .await?;
        let resolved = parse_resolved(&json)?;
        debug!("🔗 Stream resuelto para {}", source);
        Ok(resolved)
    }

    async fn fetch_playlist(&self, url: &str) -> Result<PlaylistFetch, ResolveError> {
        let json = self.run(&["-J", "--flat-playlist"], url).await?;
        let playlist = parse_playlist(&json)?;
        info!(
            "🎵 Playlist '{}' extraída con {} tracks",
            playlist.title,
            playlist.entries.len()
        );
        Ok(playlist)
    }

    fn is_playlist_url(&self, url: &str) -> bool {
        url.contains("list=") || url.contains("/playlist") || url.contains("/sets/")
    }

    fn source_name(&self) -> &'static str {
        "yt-dlp"
    }
}

/// Salida JSON de `yt-dlp -J`
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    url: Option<String>,
    webpage_url: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    #[serde(default)]
    entries: Vec<YtDlpInfo>,
}

fn parse_info(json: &str) -> Result<YtDlpInfo, ResolveError> {
    serde_json::from_str(json).map_err(|e| ResolveError::InvalidOutput(e.to_string()))
}

fn seconds(duration: Option<f64>) -> Option<u64> {
    duration.filter(|d| d.is_finite() && *d > 0.0).map(|d| d.round() as u64)
}

fn parse_resolved(json: &str) -> Result<ResolvedSource, ResolveError> {
    let mut info = parse_info(json)?;
    // Las búsquedas devuelven una playlist con un único resultado
    if info.url.is_none() && !info.entries.is_empty() {
        info = info.entries.swap_remove(0);
    }

    let stream_url = info
        .url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ResolveError::InvalidOutput("falta 'url' en la respuesta".into()))?;

    Ok(ResolvedSource {
        stream_url,
        title: info.title,
        duration: seconds(info.duration),
    })
}

fn parse_playlist(json: &str) -> Result<PlaylistFetch, ResolveError> {
    let info = parse_info(json)?;
    let title = info.title.unwrap_or_else(|| "Playlist".to_string());

    let entries = info
        .entries
        .into_iter()
        .filter_map(|entry| {
            let url = entry.webpage_url.or(entry.url)?;
            let mut track = Track::new(url.clone(), classify(&url));
            if let Some(title) = entry.title {
                track = track.with_title(title);
            }
            if let Some(duration) = seconds(entry.duration) {
                track = track.with_duration(duration);
            }
            Some(track)
        })
        .collect();

    Ok(PlaylistFetch { title, entries })
}
