//! # Audio Module
//!
//! Queue, playback orchestration and the streaming pipeline.
//!
//! ## Architecture
//!
//! ### [`queue`] - Track Queue
//! - Ordered tracks plus non-overlapping playlist ranges
//! - Index shifting under insert, delete, move, reverse and shuffle
//! - Unique indices that survive reordering
//!
//! ### [`player`] - Playback Session
//! - One worker thread per guild walking the queue
//! - Track and playlist repeat, skip, stop
//! - Per-track failures drop the track and keep going
//!
//! ### [`resolution`] - Background Resolution
//! - Resolver runs on the tokio runtime, tagged by unique index
//! - Stale results are abandoned, forced termination on timeout or stop
//!
//! ### [`pipeline`] - Audio Pipeline
//! - Decode → buffer → sink loop with cooperative cancellation
//! - Live seek, speed and effect changes between packets
//!
//! ## Audio Format
//!
//! - **Sample Rate**: 48kHz native (configurable)
//! - **Bit Depth**: 16-bit signed little-endian
//! - **Channels**: Stereo
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use open_music_engine::{
//!     audio::{
//!         decoder::FfmpegDecoder,
//!         pipeline::PipelineConfig,
//!         player::{PlaybackSession, SessionSettings},
//!         queue::{Repeat, Track, TrackKind},
//!         sink::PipeSink,
//!     },
//!     sources::ytdlp::YtDlpResolver,
//!     GuildId,
//! };
//!
//! # fn example(runtime: tokio::runtime::Handle) -> anyhow::Result<()> {
//! let session = PlaybackSession::new(
//!     GuildId(1),
//!     Arc::new(PipeSink::open("/tmp/1.pcm", 48000)),
//!     Arc::new(YtDlpResolver::new("yt-dlp", std::time::Duration::from_secs(30))),
//!     Arc::new(FfmpegDecoder::new("ffmpeg", "ffprobe", 16384)),
//!     runtime,
//!     PipelineConfig::default(),
//!     SessionSettings::default(),
//! );
//!
//! session.enqueue(Track::new("lofi beats", TrackKind::Search), None, 1.0, Repeat::default())?;
//! session.pause(true);
//! session.pause(false);
//! session.skip()?;
//! # Ok(())
//! # }
//! ```

pub mod decoder;
pub mod equalizer;
pub mod pipeline;
pub mod player;
pub mod queue;
pub mod resolution;
pub mod sink;

#[cfg(test)]
pub(crate) mod testing;
