//! # Open Music Engine
//!
//! Multi-guild audio playback engine: a track queue with playlist ranges, a
//! playback thread per guild that resolves, decodes and streams each track,
//! and live controls (pause, skip, seek, speed, repeat, shuffle, effects)
//! that can be issued from any thread.

use std::{fmt, str::FromStr};

pub mod audio;
pub mod bot;
pub mod config;
pub mod error;
pub mod sources;

/// Identificador de una guild (una sesión de reproducción por guild)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GuildId(pub u64);

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GuildId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(GuildId)
    }
}

impl From<u64> for GuildId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}
