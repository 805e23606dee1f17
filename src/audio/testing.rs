//! Colaboradores falsos para los tests del reproductor.

use async_trait::async_trait;
use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use tokio::sync::Semaphore;

use super::{
    decoder::{DecodeSession, Decoder},
    equalizer::EffectParams,
    sink::Sink,
};
use crate::{
    error::{DecodeError, ResolveError, SinkError},
    sources::{PlaylistFetch, ResolvedSource, Resolver},
};

/// Espera hasta 5s a que se cumpla la condición
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[derive(Clone)]
pub struct FakeDecoder {
    units: Option<usize>,
    unit_size: usize,
    unit_delay: Duration,
    failing_open: HashSet<String>,
    failing_read: HashSet<String>,
    open_gate: Option<Receiver<()>>,
    log: Arc<Mutex<Vec<String>>>,
    opened: Arc<Mutex<Vec<String>>>,
}

impl FakeDecoder {
    pub fn new() -> Self {
        Self {
            units: Some(1),
            unit_size: 4,
            unit_delay: Duration::ZERO,
            failing_open: HashSet::new(),
            failing_read: HashSet::new(),
            open_gate: None,
            log: Arc::new(Mutex::new(Vec::new())),
            opened: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_units(mut self, units: usize, unit_size: usize) -> Self {
        self.units = Some(units);
        self.unit_size = unit_size;
        self
    }

    pub fn endless(mut self, unit_size: usize) -> Self {
        self.units = None;
        self.unit_size = unit_size;
        self.unit_delay = Duration::from_millis(1);
        self
    }

    pub fn failing_open(mut self, source: &str) -> Self {
        self.failing_open.insert(source.to_string());
        self
    }

    pub fn failing_read(mut self, source: &str) -> Self {
        self.failing_read.insert(source.to_string());
        self
    }

    /// Cada `open` espera un mensaje en el `Sender` devuelto
    pub fn gated_open(mut self) -> (Self, Sender<()>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.open_gate = Some(rx);
        (self, tx)
    }

    /// Llamadas de control recibidas por las sesiones
    pub fn log(&self) -> Arc<Mutex<Vec<String>>> {
        self.log.clone()
    }

    /// Fuentes abiertas, en orden
    pub fn opened(&self) -> Arc<Mutex<Vec<String>>> {
        self.opened.clone()
    }
}

impl Decoder for FakeDecoder {
    fn open(&self, source: &str, _output_rate: u32) -> Result<Box<dyn DecodeSession>, DecodeError> {
        self.opened.lock().push(source.to_string());
        if let Some(gate) = &self.open_gate {
            let _ = gate.recv();
        }
        if self.failing_open.contains(source) {
            return Err(DecodeError::Open {
                source_id: source.to_string(),
                reason: "fake".into(),
            });
        }
        Ok(Box::new(FakeSession {
            source: source.to_string(),
            remaining: self.units,
            unit_size: self.unit_size,
            unit_delay: self.unit_delay,
            fail: self.failing_read.contains(source),
            log: self.log.clone(),
        }))
    }
}

struct FakeSession {
    source: String,
    remaining: Option<usize>,
    unit_size: usize,
    unit_delay: Duration,
    fail: bool,
    log: Arc<Mutex<Vec<String>>>,
}

impl DecodeSession for FakeSession {
    fn next_unit(&mut self) -> Result<Option<Bytes>, DecodeError> {
        if self.fail {
            return Err(DecodeError::Read("fake".into()));
        }
        if !self.unit_delay.is_zero() {
            thread::sleep(self.unit_delay);
        }
        match self.remaining {
            Some(0) => return Ok(None),
            Some(n) => self.remaining = Some(n - 1),
            None => {}
        }
        Ok(Some(Bytes::from(vec![0u8; self.unit_size])))
    }

    fn seek_seconds(&mut self, seconds: f64) -> Result<(), DecodeError> {
        self.log.lock().push(format!("seek {:.1}", seconds));
        Ok(())
    }

    fn set_effects(&mut self, effects: &EffectParams) -> Result<(), DecodeError> {
        self.log.lock().push(format!("effects {:?}", effects.bass));
        Ok(())
    }

    fn set_output_rate(&mut self, rate: u32) -> Result<(), DecodeError> {
        self.log.lock().push(format!("rate {}", rate));
        Ok(())
    }

    fn title(&self) -> Option<String> {
        Some(format!("fake:{}", self.source))
    }

    fn total_duration_seconds(&self) -> Option<f64> {
        Some(120.0)
    }
}

pub struct RecordingSink {
    packets: Mutex<Vec<usize>>,
    clears: AtomicUsize,
    remaining: Mutex<f64>,
    ready: AtomicBool,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self {
            packets: Mutex::new(Vec::new()),
            clears: AtomicUsize::new(0),
            remaining: Mutex::new(0.0),
            ready: AtomicBool::new(true),
        }
    }
}

impl RecordingSink {
    pub fn not_ready() -> Self {
        let sink = Self::default();
        sink.ready.store(false, Ordering::SeqCst);
        sink
    }

    pub fn packet_sizes(&self) -> Vec<usize> {
        self.packets.lock().clone()
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    pub fn set_remaining(&self, seconds: f64) {
        *self.remaining.lock() = seconds;
    }
}

impl Sink for RecordingSink {
    fn send(&self, pcm: Bytes) -> Result<(), SinkError> {
        self.packets.lock().push(pcm.len());
        Ok(())
    }

    fn remaining_buffered_seconds(&self) -> f64 {
        *self.remaining.lock()
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }
}

/// Resolver falso: `source` → `stream://source`
pub struct FakeResolver {
    failing: HashSet<String>,
    gated: HashSet<String>,
    gate: Arc<Semaphore>,
    calls: Mutex<Vec<String>>,
    playlist: Mutex<Option<PlaylistFetch>>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self {
            failing: HashSet::new(),
            gated: HashSet::new(),
            gate: Arc::new(Semaphore::new(0)),
            calls: Mutex::new(Vec::new()),
            playlist: Mutex::new(None),
        }
    }

    pub fn failing(mut self, source: &str) -> Self {
        self.failing.insert(source.to_string());
        self
    }

    /// La resolución de `source` espera a `release()`
    pub fn gated(mut self, source: &str) -> Self {
        self.gated.insert(source.to_string());
        self
    }

    pub fn with_playlist(self, playlist: PlaylistFetch) -> Self {
        *self.playlist.lock() = Some(playlist);
        self
    }

    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Resolver for FakeResolver {
    async fn resolve(&self, source: &str) -> Result<ResolvedSource, ResolveError> {
        self.calls.lock().push(source.to_string());
        if self.gated.contains(source) {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| ResolveError::Cancelled)?;
            permit.forget();
        }
        if self.failing.contains(source) {
            return Err(ResolveError::Failed {
                source_id: source.to_string(),
                reason: "fake".into(),
            });
        }
        Ok(ResolvedSource {
            stream_url: format!("stream://{}", source),
            title: Some(format!("Resolved {}", source)),
            duration: Some(60),
        })
    }

    async fn fetch_playlist(&self, url: &str) -> Result<PlaylistFetch, ResolveError> {
        self.playlist
            .lock()
            .clone()
            .ok_or_else(|| ResolveError::Failed {
                source_id: url.to_string(),
                reason: "sin playlist".into(),
            })
    }

    fn is_playlist_url(&self, url: &str) -> bool {
        url.contains("list=")
    }

    fn source_name(&self) -> &'static str {
        "fake"
    }
}
