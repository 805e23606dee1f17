//! Text commands: `<guild> <command> [args]`, one per line.
//!
//! ```text
//! 42 play https://www.youtube.com/watch?v=dQw4w9WgXcQ
//! 42 insert 0 lofi beats
//! 42 playlist 2 5 3 Warmup
//! 42 seek 1m30s
//! 42 eq bass
//! ```

use anyhow::{anyhow, bail, Context, Result};
use std::{fmt::Write as _, time::Duration};
use tracing::{debug, info};

use super::GuildManager;
use crate::{
    audio::{
        equalizer::{equalizer_from_str, BassBoost, EqualizerMap, MAX_GAIN_DB},
        player::{NowPlaying, PlaybackSession},
        queue::Repeat,
    },
    sources::track_from_input,
    GuildId,
};

const QUEUE_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Join,
    Leave,
    Play(String),
    Insert { index: usize, query: String },
    Pause,
    Resume,
    Skip,
    SkipTo(usize),
    Stop,
    Seek(f64),
    Forward(f64),
    Rewind(f64),
    Speed { speed: f32, index: Option<usize> },
    Repeat { index: usize, repeat: Repeat },
    Remove(usize),
    RemoveRange { from: usize, to: usize },
    Move { from: usize, to: usize },
    Reverse { from: usize, to: usize },
    Shuffle { span: Option<(usize, usize)>, keep_first: Option<usize> },
    Playlist { begin: usize, end: usize, repeat: Repeat, title: String },
    RemovePlaylist(usize),
    PlaylistRepeat { range: usize, repeat: Repeat },
    ReversePlaylist(usize),
    ShufflePlaylist(usize),
    Bass(Option<f32>),
    Equalizer(Option<EqualizerMap>),
    NowPlaying,
    Queue(usize),
}

/// Parsea una línea `<guild> <comando> [args]`
pub fn parse_line(line: &str) -> Result<(GuildId, Command)> {
    let line = line.trim();
    let (guild, rest) = line
        .split_once(char::is_whitespace)
        .ok_or_else(|| anyhow!("Uso: <guild> <comando> [args]"))?;
    let guild: GuildId = guild
        .parse()
        .with_context(|| format!("Guild inválida: '{}'", guild))?;
    Ok((guild, parse_command(rest.trim())?))
}

pub fn parse_command(input: &str) -> Result<Command> {
    let (name, rest) = match input.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (input, ""),
    };
    let args: Vec<&str> = rest.split_whitespace().collect();

    let command = match name.to_lowercase().as_str() {
        "join" => Command::Join,
        "leave" | "disconnect" => Command::Leave,
        "play" | "p" => {
            if rest.is_empty() {
                bail!("Uso: play <url o búsqueda>");
            }
            Command::Play(rest.to_string())
        }
        "insert" => {
            let (index, query) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| anyhow!("Uso: insert <posición> <url o búsqueda>"))?;
            Command::Insert {
                index: parse_index(index)?,
                query: query.trim().to_string(),
            }
        }
        "pause" => Command::Pause,
        "resume" => Command::Resume,
        "skip" | "next" => Command::Skip,
        "skipto" => Command::SkipTo(parse_index(arg(&args, 0, "skipto <posición>")?)?),
        "stop" => Command::Stop,
        "seek" => Command::Seek(parse_seconds(arg(&args, 0, "seek <tiempo>")?)?),
        "forward" | "ff" => Command::Forward(parse_seconds(arg(&args, 0, "forward <tiempo>")?)?),
        "rewind" | "rw" => Command::Rewind(parse_seconds(arg(&args, 0, "rewind <tiempo>")?)?),
        "speed" => Command::Speed {
            speed: parse_speed(arg(&args, 0, "speed <velocidad> [posición]")?)?,
            index: args.get(1).map(|i| parse_index(i)).transpose()?,
        },
        "repeat" | "loop" => Command::Repeat {
            index: parse_index(arg(&args, 0, "repeat <posición> <veces|inf>")?)?,
            repeat: parse_repeat(arg(&args, 1, "repeat <posición> <veces|inf>")?)?,
        },
        "remove" | "delete" => Command::Remove(parse_index(arg(&args, 0, "remove <posición>")?)?),
        "removerange" => Command::RemoveRange {
            from: parse_index(arg(&args, 0, "removerange <desde> <hasta>")?)?,
            to: parse_index(arg(&args, 1, "removerange <desde> <hasta>")?)?,
        },
        "move" => Command::Move {
            from: parse_index(arg(&args, 0, "move <desde> <hacia>")?)?,
            to: parse_index(arg(&args, 1, "move <desde> <hacia>")?)?,
        },
        "reverse" => Command::Reverse {
            from: parse_index(arg(&args, 0, "reverse <desde> <hasta>")?)?,
            to: parse_index(arg(&args, 1, "reverse <desde> <hasta>")?)?,
        },
        "shuffle" => match args.as_slice() {
            [] => Command::Shuffle {
                span: None,
                keep_first: None,
            },
            [keep] => Command::Shuffle {
                span: None,
                keep_first: Some(parse_index(keep)?),
            },
            [from, to] => Command::Shuffle {
                span: Some((parse_index(from)?, parse_index(to)?)),
                keep_first: None,
            },
            [from, to, keep] => Command::Shuffle {
                span: Some((parse_index(from)?, parse_index(to)?)),
                keep_first: Some(parse_index(keep)?),
            },
            _ => bail!("Uso: shuffle [desde hasta] [fijo]"),
        },
        "playlist" => {
            let usage = "playlist <inicio> <fin> <veces|inf> [título]";
            Command::Playlist {
                begin: parse_index(arg(&args, 0, usage)?)?,
                end: parse_index(arg(&args, 1, usage)?)?,
                repeat: parse_repeat(arg(&args, 2, usage)?)?,
                title: args.get(3..).map(|t| t.join(" ")).unwrap_or_default(),
            }
        }
        "unplaylist" => Command::RemovePlaylist(parse_index(arg(&args, 0, "unplaylist <playlist>")?)?),
        "playlistrepeat" => Command::PlaylistRepeat {
            range: parse_index(arg(&args, 0, "playlistrepeat <playlist> <veces|inf>")?)?,
            repeat: parse_repeat(arg(&args, 1, "playlistrepeat <playlist> <veces|inf>")?)?,
        },
        "reverseplaylist" => {
            Command::ReversePlaylist(parse_index(arg(&args, 0, "reverseplaylist <playlist>")?)?)
        }
        "shuffleplaylist" => {
            Command::ShufflePlaylist(parse_index(arg(&args, 0, "shuffleplaylist <playlist>")?)?)
        }
        "bass" | "bassboost" => match arg(&args, 0, "bass <ganancia|off>")? {
            "off" => Command::Bass(None),
            gain => {
                let gain: f32 = gain
                    .parse()
                    .map_err(|_| anyhow!("Ganancia inválida: '{}'", gain))?;
                if !(-MAX_GAIN_DB..=MAX_GAIN_DB).contains(&gain) {
                    bail!("Ganancia fuera de rango: {} (debe estar entre -15 y +15)", gain);
                }
                Command::Bass(Some(gain))
            }
        },
        "eq" | "equalizer" => match rest {
            "" => bail!("Uso: eq <preset|frecuencia:ganancia ...|off>"),
            "off" => Command::Equalizer(None),
            config => Command::Equalizer(Some(equalizer_from_str(config)?)),
        },
        "np" | "nowplaying" => Command::NowPlaying,
        "queue" | "q" => Command::Queue(match args.first() {
            Some(page) => page
                .parse()
                .map_err(|_| anyhow!("Página inválida: '{}'", page))?,
            None => 1,
        }),
        other => bail!("Comando desconocido: '{}'", other),
    };
    Ok(command)
}

/// Ejecuta un comando y devuelve la respuesta para el usuario
pub fn execute(manager: &GuildManager, guild_id: GuildId, command: Command) -> Result<String> {
    debug!("⚡ Ejecutando {:?} en guild {}", command, guild_id);

    if command == Command::Leave && manager.get(guild_id).is_none() {
        return Ok("❌ No hay una sesión activa".to_string());
    }

    let session = match command {
        Command::Join | Command::Play(_) | Command::Insert { .. } => manager.join(guild_id)?,
        _ => manager
            .get(guild_id)
            .ok_or_else(|| anyhow!("No hay una sesión activa en guild {}", guild_id))?,
    };

    let reply = match command {
        Command::Join => format!("🔊 Conectado en guild {}", guild_id),
        Command::Leave => {
            drop(session);
            manager.leave(guild_id);
            "👋 Desconectado".to_string()
        }
        Command::Play(query) => enqueue(manager, &session, &query, None)?,
        Command::Insert { index, query } => enqueue(manager, &session, &query, Some(index))?,
        Command::Pause => {
            session.pause(true);
            "⏸️ Pausado".to_string()
        }
        Command::Resume => {
            session.pause(false);
            "▶️ Reanudado".to_string()
        }
        Command::Skip => {
            session.skip()?;
            "⏭️ Saltado".to_string()
        }
        Command::SkipTo(index) => {
            session.skip_to(index)?;
            format!("⏭️ Saltando a la posición {}", index)
        }
        Command::Stop => {
            session.stop();
            "⏹️ Detenido y cola limpiada".to_string()
        }
        Command::Seek(seconds) => {
            session.seek_to(seconds)?;
            format!("⏩ Posición: {}", format_seconds(seconds))
        }
        Command::Forward(seconds) => {
            session.seek_by(seconds)?;
            format!("⏩ +{}", format_seconds(seconds))
        }
        Command::Rewind(seconds) => {
            session.seek_by(-seconds)?;
            format!("⏪ -{}", format_seconds(seconds))
        }
        Command::Speed { speed, index } => {
            let index = match index {
                Some(index) => index,
                None => session
                    .now_playing()
                    .map(|np| np.index)
                    .ok_or_else(|| anyhow!("No hay nada reproduciéndose"))?,
            };
            session.set_speed(index, speed)?;
            format!("⏩ Velocidad {}x en la posición {}", speed, index)
        }
        Command::Repeat { index, repeat } => {
            session.set_repeat(index, repeat)?;
            format!("🔁 Posición {}: {}", index, format_repeat(repeat))
        }
        Command::Remove(index) => {
            let track = session.delete(index)?;
            format!("🗑️ Eliminado: {}", track.title)
        }
        Command::RemoveRange { from, to } => {
            let removed = session.delete_range(from, to)?;
            format!("🗑️ {} canciones eliminadas", removed.len())
        }
        Command::Move { from, to } => {
            session.transfer(from, to)?;
            format!("📍 Movido de {} a {}", from, to)
        }
        Command::Reverse { from, to } => {
            session.reverse(from, to)?;
            format!("🔃 Invertido {}..={}", from, to)
        }
        Command::Shuffle { span, keep_first } => {
            match span {
                Some((from, to)) => session.shuffle(from, to, keep_first)?,
                None => session.shuffle_all(keep_first)?,
            }
            "🔀 Cola mezclada".to_string()
        }
        Command::Playlist {
            begin,
            end,
            repeat,
            title,
        } => {
            session.add_range(begin, end, repeat, &title)?;
            format!("📃 Playlist {}..={} ({})", begin, end, format_repeat(repeat))
        }
        Command::RemovePlaylist(range) => {
            let removed = session.remove_range(range)?;
            format!("🗑️ Playlist '{}' eliminada", removed.title)
        }
        Command::PlaylistRepeat { range, repeat } => {
            session.set_range_repeat(range, repeat)?;
            format!("🔁 Playlist {}: {}", range, format_repeat(repeat))
        }
        Command::ReversePlaylist(range) => {
            session.reverse_playlist(range)?;
            format!("🔃 Playlist {} invertida", range)
        }
        Command::ShufflePlaylist(range) => {
            session.shuffle_playlist(range, None)?;
            format!("🔀 Playlist {} mezclada", range)
        }
        Command::Bass(gain) => {
            session.set_bass_boost(gain.map(BassBoost::new))?;
            match gain {
                Some(gain) => format!("🔊 Bass boost {:+.1} dB", gain),
                None => "🔊 Bass boost desactivado".to_string(),
            }
        }
        Command::Equalizer(map) => {
            let enabled = map.is_some();
            session.set_equalizer(map.unwrap_or_default())?;
            if enabled {
                "🎛️ Ecualizador aplicado".to_string()
            } else {
                "🎛️ Ecualizador desactivado".to_string()
            }
        }
        Command::NowPlaying => match session.now_playing() {
            Some(np) => format_now_playing(&np),
            None => "🔇 No hay nada reproduciéndose".to_string(),
        },
        Command::Queue(page) => format_queue(&session, page),
    };
    Ok(reply)
}

fn enqueue(
    manager: &GuildManager,
    session: &PlaybackSession,
    query: &str,
    index: Option<usize>,
) -> Result<String> {
    let resolver = session.resolver().clone();

    if resolver.is_playlist_url(query) {
        let playlist = session
            .runtime()
            .block_on(resolver.fetch_playlist(query))?;
        let mut entries = playlist.entries;
        entries.truncate(manager.max_playlist_size());
        let batch = session.enqueue_batch(entries, index, 1.0, true, &playlist.title, Repeat::default())?;
        info!("📃 Playlist '{}' agregada ({} canciones)", playlist.title, batch.unique_indices.len());
        return Ok(format!(
            "📃 {} canciones de '{}' agregadas en la posición {}",
            batch.unique_indices.len(),
            playlist.title,
            batch.index
        ));
    }

    let track = track_from_input(query);
    let title = track.title.clone();
    session.enqueue(track, index, 1.0, Repeat::default())?;
    Ok(format!("➕ Agregado a la cola: {}", title))
}

fn arg<'a>(args: &[&'a str], position: usize, usage: &str) -> Result<&'a str> {
    args.get(position)
        .copied()
        .ok_or_else(|| anyhow!("Uso: {}", usage))
}

fn parse_index(input: &str) -> Result<usize> {
    input
        .trim()
        .parse()
        .map_err(|_| anyhow!("Posición inválida: '{}'", input))
}

fn parse_speed(input: &str) -> Result<f32> {
    let speed: f32 = input
        .trim_end_matches('x')
        .parse()
        .map_err(|_| anyhow!("Velocidad inválida: '{}'", input))?;
    if !speed.is_finite() || speed <= 0.0 {
        bail!("La velocidad debe ser mayor que 0");
    }
    Ok(speed)
}

fn parse_repeat(input: &str) -> Result<Repeat> {
    match input.to_lowercase().as_str() {
        "inf" | "infinite" | "forever" | "∞" => Ok(Repeat::Infinite),
        n => {
            let times: u32 = n
                .parse()
                .map_err(|_| anyhow!("Repeticiones inválidas: '{}'", input))?;
            if times == 0 {
                bail!("Las repeticiones deben ser al menos 1");
            }
            Ok(Repeat::times(times))
        }
    }
}

/// Segundos como número ("90", "12.5") o duración ("1m30s")
fn parse_seconds(input: &str) -> Result<f64> {
    if let Ok(seconds) = input.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return Ok(seconds);
        }
        bail!("Tiempo inválido: '{}'", input);
    }
    humantime::parse_duration(input)
        .map(|d| d.as_secs_f64())
        .map_err(|e| anyhow!("Tiempo inválido '{}': {}", input, e))
}

fn format_seconds(seconds: f64) -> String {
    format_duration(Duration::from_secs_f64(seconds.max(0.0)))
}

fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

fn format_repeat(repeat: Repeat) -> String {
    match repeat {
        Repeat::Infinite => "repetición infinita".to_string(),
        Repeat::Times(1) => "sin repetición".to_string(),
        Repeat::Times(n) => format!("{} veces", n),
    }
}

fn format_now_playing(np: &NowPlaying) -> String {
    let mut out = format!(
        "{} [{}] {} ({} / {})",
        if np.paused { "⏸️" } else { "🎵" },
        np.index,
        np.track.title,
        format_duration(np.elapsed),
        format_duration(np.track.duration()),
    );
    if let Some(range) = &np.range {
        let _ = write!(out, "\n📃 {} ({}..={})", range.title, range.begin, range.end);
    }
    out
}

fn format_queue(session: &PlaybackSession, page: usize) -> String {
    let info = session.queue_info();
    if info.total_items == 0 {
        return "📭 La cola está vacía".to_string();
    }

    let page = info.get_page(page, QUEUE_PAGE_SIZE);
    let mut out = format!(
        "📋 Cola: {} canciones, {} (página {}/{})",
        info.total_items,
        format_duration(info.total_duration),
        page.current_page,
        page.total_pages
    );
    for (offset, track) in page.items.iter().enumerate() {
        let index = page.first_index + offset;
        let marker = if info.current == Some(index) { "▶" } else { " " };
        let _ = write!(
            out,
            "\n{} {}. {} [{}]",
            marker,
            index,
            track.title,
            format_duration(track.duration())
        );
    }
    for (i, range) in info.ranges.iter().enumerate() {
        let _ = write!(
            out,
            "\n📃 #{} {} ({}..={}, {})",
            i,
            range.title,
            range.begin,
            range.end,
            format_repeat(range.repeat)
        );
    }
    out
}
