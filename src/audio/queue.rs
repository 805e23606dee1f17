use chrono::{DateTime, Utc};
use rand::{seq::SliceRandom, Rng};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::QueueError;

/// Cantidad de repeticiones de un track o playlist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Times(u32),
    Infinite,
}

impl Repeat {
    /// Crea un conteo finito (mínimo 1)
    pub fn times(count: u32) -> Self {
        Self::Times(count.max(1))
    }

    /// Indica si quedan repeticiones después de `played` reproducciones
    pub fn allows_another(&self, played: u32) -> bool {
        match self {
            Self::Infinite => true,
            Self::Times(count) => played < *count,
        }
    }
}

impl Default for Repeat {
    fn default() -> Self {
        Self::Times(1)
    }
}

/// Origen de un track en la cola
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    /// URL de una página que el resolver convierte en stream
    Url,
    /// Término de búsqueda
    Search,
    /// Stream directo, no necesita resolución
    Stream,
}

#[derive(Debug, Clone)]
pub struct Track {
    pub source: String,
    pub stream_url: Option<String>,
    pub title: String,
    /// Duración en segundos, 0 si se desconoce
    pub duration: u64,
    pub kind: TrackKind,
    pub speed: f32,
    pub repeat: Repeat,
    pub added_at: DateTime<Utc>,
    unique_index: u64,
    times_played: u32,
}

impl Track {
    pub fn new(source: impl Into<String>, kind: TrackKind) -> Self {
        let source = source.into();
        let stream_url = (kind == TrackKind::Stream).then(|| source.clone());
        Self {
            title: source.clone(),
            source,
            stream_url,
            duration: 0,
            kind,
            speed: 1.0,
            repeat: Repeat::default(),
            added_at: Utc::now(),
            unique_index: 0,
            times_played: 0,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration = seconds;
        self
    }

    pub fn with_stream_url(mut self, url: impl Into<String>) -> Self {
        self.stream_url = Some(url.into());
        self
    }

    pub fn unique_index(&self) -> u64 {
        self.unique_index
    }

    pub fn times_played(&self) -> u32 {
        self.times_played
    }

    pub fn is_resolved(&self) -> bool {
        self.stream_url.as_deref().is_some_and(|url| !url.is_empty())
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration)
    }

    fn has_placeholder_title(&self) -> bool {
        self.title.is_empty() || self.title == self.source
    }
}

/// Sub-rango etiquetado de la cola que puede repetirse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistRange {
    pub begin: usize,
    pub end: usize,
    pub repeat: Repeat,
    pub title: String,
    unique_index: u64,
    times_played: u32,
}

impl PlaylistRange {
    pub fn unique_index(&self) -> u64 {
        self.unique_index
    }

    pub fn times_played(&self) -> u32 {
        self.times_played
    }

    pub fn contains(&self, index: usize) -> bool {
        self.begin <= index && index <= self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.begin + 1
    }

    fn overlaps(&self, begin: usize, end: usize) -> bool {
        self.begin <= end && begin <= self.end
    }
}

/// Resultado de insertar un lote de tracks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchInsert {
    pub index: usize,
    pub unique_indices: Vec<u64>,
    /// Índice de la playlist creada, si se creó una
    pub range: Option<usize>,
}

/// Cola ordenada de tracks con sus playlists.
///
/// No tiene sincronización propia: quien la use debe serializar el acceso
/// (la sesión la guarda detrás de un único `Mutex`). Las playlists se
/// mantienen ordenadas por `begin`, sin solaparse y con al menos dos tracks.
#[derive(Debug)]
pub struct TrackQueue {
    tracks: Vec<Track>,
    ranges: Vec<PlaylistRange>,
    current: Option<usize>,
    next_track_index: u64,
    next_range_index: u64,
    max_size: usize,
}

impl TrackQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            tracks: Vec::new(),
            ranges: Vec::new(),
            current: None,
            next_track_index: 0,
            next_range_index: 0,
            max_size,
        }
    }

    // Consultas

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn range(&self, index: usize) -> Option<&PlaylistRange> {
        self.ranges.get(index)
    }

    pub fn ranges(&self) -> &[PlaylistRange] {
        &self.ranges
    }

    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    /// Posición actual de un track según su índice único
    pub fn position_of(&self, unique_index: u64) -> Option<usize> {
        self.tracks
            .iter()
            .position(|t| t.unique_index == unique_index)
    }

    /// Playlist que contiene la posición dada
    pub fn range_containing(&self, index: usize) -> Option<usize> {
        self.ranges.iter().position(|r| r.contains(index))
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.current.and_then(|i| self.tracks.get(i))
    }

    pub fn current_range(&self) -> Option<usize> {
        self.current.and_then(|i| self.range_containing(i))
    }

    pub fn set_current(&mut self, index: Option<usize>) {
        self.current = index;
    }

    // Inserción

    /// Inserta un track y devuelve su índice único
    pub fn insert_track(
        &mut self,
        index: usize,
        mut track: Track,
        speed: f32,
        repeat: Repeat,
    ) -> Result<u64, QueueError> {
        validate_speed(speed)?;
        if self.tracks.len() >= self.max_size {
            return Err(QueueError::Full(self.max_size));
        }

        let index = index.min(self.tracks.len());
        track.unique_index = self.take_track_index();
        track.speed = speed;
        track.repeat = repeat;
        track.times_played = 0;
        let unique = track.unique_index;

        self.shift_for_insert(index, 1);
        debug!("➕ Track '{}' insertado en posición {}", track.title, index);
        self.tracks.insert(index, track);
        Ok(unique)
    }

    /// Inserta varios tracks de una vez, opcionalmente como playlist.
    ///
    /// Si la posición cae dentro de una playlist existente el lote pasa a
    /// formar parte de ella y no se crea una nueva. `repeat` es el de la
    /// playlist creada; si no se crea ninguna se aplica a cada track. Los
    /// tracks que no caben en la cola se descartan.
    pub fn insert_batch(
        &mut self,
        index: usize,
        tracks: Vec<Track>,
        speed: f32,
        as_playlist: bool,
        title: &str,
        repeat: Repeat,
    ) -> Result<BatchInsert, QueueError> {
        validate_speed(speed)?;
        let available = self.max_size.saturating_sub(self.tracks.len());
        if available == 0 && !tracks.is_empty() {
            return Err(QueueError::Full(self.max_size));
        }

        let index = index.min(self.tracks.len());
        let mut batch: Vec<Track> = tracks.into_iter().take(available).collect();
        let count = batch.len();
        if count == 0 {
            return Ok(BatchInsert {
                index,
                unique_indices: Vec::new(),
                range: None,
            });
        }

        let absorbed = as_playlist
            && self
                .ranges
                .iter()
                .any(|r| r.begin < index && index <= r.end);
        let creates_range = as_playlist && !absorbed && count >= 2;
        let track_repeat = if creates_range { Repeat::default() } else { repeat };

        let mut unique_indices = Vec::with_capacity(count);
        for track in &mut batch {
            track.unique_index = self.take_track_index();
            track.speed = speed;
            track.repeat = track_repeat;
            track.times_played = 0;
            unique_indices.push(track.unique_index);
        }

        self.shift_for_insert(index, count);
        self.tracks.splice(index..index, batch);

        let range = if creates_range {
            Some(self.push_range(index, index + count - 1, repeat, title.to_string()))
        } else {
            None
        };

        info!("➕ Agregadas {} canciones a la cola en posición {}", count, index);
        Ok(BatchInsert {
            index,
            unique_indices,
            range,
        })
    }

    // Eliminación

    pub fn delete_track(&mut self, index: usize) -> Result<Track, QueueError> {
        self.check_index(index)?;
        let removed = self.tracks.remove(index);

        self.ranges.retain_mut(|r| {
            if index < r.begin {
                r.begin -= 1;
                r.end -= 1;
            } else if index <= r.end {
                r.end -= 1;
            }
            r.begin < r.end
        });

        if let Some(current) = self.current {
            if index < current {
                self.current = Some(current - 1);
            }
        }

        debug!("❌ Track eliminado en posición {}", index);
        Ok(removed)
    }

    /// Elimina los tracks `from..=to`
    pub fn delete_range(&mut self, from: usize, to: usize) -> Result<Vec<Track>, QueueError> {
        self.check_span(from, to)?;
        let removed: Vec<Track> = self.tracks.drain(from..=to).collect();
        let count = removed.len();

        self.ranges.retain_mut(|r| {
            if r.end < from {
                return true;
            }
            if r.begin > to {
                r.begin -= count;
                r.end -= count;
                return true;
            }
            if from <= r.begin && r.end <= to {
                return false;
            }
            let begin = r.begin.min(from);
            let end = if r.end > to { r.end - count } else { from - 1 };
            r.begin = begin;
            r.end = end;
            r.begin < r.end
        });

        if let Some(current) = self.current {
            if current > to {
                self.current = Some(current - count);
            } else if current >= from {
                self.current = Some(from);
            }
        }

        debug!("❌ {} tracks eliminados ({}..={})", count, from, to);
        Ok(removed)
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.ranges.clear();
        self.current = None;
        info!("🗑️ Cola limpiada");
    }

    // Reordenamiento

    /// Mueve un track a otra posición.
    ///
    /// La pertenencia a playlists es posicional: el track movido queda en la
    /// playlist que corresponda a su nueva posición.
    pub fn transfer_track(&mut self, from: usize, to: usize) -> Result<(), QueueError> {
        self.check_index(from)?;
        self.check_index(to)?;

        let playing = self.current_unique();
        self.rotate(from, to);
        self.follow(playing);
        debug!("📍 Track movido de posición {} a {}", from, to);
        Ok(())
    }

    pub fn reverse(&mut self, from: usize, to: usize) -> Result<(), QueueError> {
        self.check_span(from, to)?;

        let playing = self.current_unique();
        self.tracks[from..=to].reverse();
        self.follow(playing);
        debug!("🔃 Tracks {}..={} invertidos", from, to);
        Ok(())
    }

    pub fn shuffle(
        &mut self,
        from: usize,
        to: usize,
        keep_first: Option<usize>,
    ) -> Result<(), QueueError> {
        self.shuffle_with(from, to, keep_first, &mut rand::thread_rng())
    }

    /// Mezcla `from..=to`; `keep_first` queda primero y fuera de la mezcla
    pub fn shuffle_with<R: Rng + ?Sized>(
        &mut self,
        from: usize,
        to: usize,
        keep_first: Option<usize>,
        rng: &mut R,
    ) -> Result<(), QueueError> {
        self.check_span(from, to)?;
        if let Some(keep) = keep_first {
            if keep < from || keep > to {
                return Err(QueueError::InvalidIndex {
                    index: keep,
                    len: self.tracks.len(),
                });
            }
        }

        let playing = self.current_unique();
        let mut start = from;
        if let Some(keep) = keep_first {
            self.rotate(keep, from);
            start = from + 1;
        }
        if start <= to {
            self.tracks[start..=to].shuffle(rng);
        }
        self.follow(playing);
        info!("🔀 Tracks {}..={} mezclados", from, to);
        Ok(())
    }

    /// Mezcla toda la cola y elimina todas las playlists
    pub fn shuffle_all(&mut self, keep_first: Option<usize>) -> Result<(), QueueError> {
        if self.tracks.is_empty() {
            return Ok(());
        }
        let last = self.tracks.len() - 1;
        self.shuffle_with(0, last, keep_first, &mut rand::thread_rng())?;
        self.ranges.clear();
        info!("🔀 Cola mezclada");
        Ok(())
    }

    pub fn reverse_playlist(&mut self, range: usize) -> Result<(), QueueError> {
        let (begin, end) = self.range_bounds(range)?;
        self.reverse(begin, end)
    }

    pub fn shuffle_playlist(
        &mut self,
        range: usize,
        keep_first: Option<usize>,
    ) -> Result<(), QueueError> {
        let (begin, end) = self.range_bounds(range)?;
        self.shuffle(begin, end, keep_first)
    }

    // Playlists

    /// Define una playlist; las que se solapen con ella se eliminan
    pub fn add_range(
        &mut self,
        begin: usize,
        end: usize,
        repeat: Repeat,
        title: impl Into<String>,
    ) -> Result<u64, QueueError> {
        self.check_span(begin, end)?;
        if begin == end {
            return Err(QueueError::InvalidRange {
                from: begin,
                to: end,
                len: self.tracks.len(),
            });
        }

        let before = self.ranges.len();
        self.ranges.retain(|r| !r.overlaps(begin, end));
        if self.ranges.len() != before {
            debug!("🗑️ {} playlists reemplazadas", before - self.ranges.len());
        }

        let position = self.push_range(begin, end, repeat, title.into());
        Ok(self.ranges[position].unique_index)
    }

    /// Elimina la playlist; sus tracks permanecen en la cola
    pub fn remove_playlist_range(&mut self, range: usize) -> Result<PlaylistRange, QueueError> {
        self.check_playlist(range)?;
        Ok(self.ranges.remove(range))
    }

    // Setters

    pub fn set_title(&mut self, index: usize, title: impl Into<String>) -> Result<(), QueueError> {
        self.check_index(index)?;
        self.tracks[index].title = title.into();
        Ok(())
    }

    pub fn set_duration(&mut self, index: usize, seconds: u64) -> Result<(), QueueError> {
        self.check_index(index)?;
        self.tracks[index].duration = seconds;
        Ok(())
    }

    pub fn set_speed(&mut self, index: usize, speed: f32) -> Result<(), QueueError> {
        self.check_index(index)?;
        validate_speed(speed)?;
        self.tracks[index].speed = speed;
        Ok(())
    }

    pub fn set_repeat(&mut self, index: usize, repeat: Repeat) -> Result<(), QueueError> {
        self.check_index(index)?;
        self.tracks[index].repeat = repeat;
        Ok(())
    }

    pub fn set_range_title(
        &mut self,
        range: usize,
        title: impl Into<String>,
    ) -> Result<(), QueueError> {
        self.check_playlist(range)?;
        self.ranges[range].title = title.into();
        Ok(())
    }

    pub fn set_range_repeat(&mut self, range: usize, repeat: Repeat) -> Result<(), QueueError> {
        self.check_playlist(range)?;
        self.ranges[range].repeat = repeat;
        Ok(())
    }

    /// Escribe el stream resuelto en el track con ese índice único.
    ///
    /// Devuelve `false` si el track ya no está en la cola.
    pub fn fill_stream(
        &mut self,
        unique_index: u64,
        stream_url: String,
        title: Option<String>,
        duration: Option<u64>,
    ) -> bool {
        let Some(index) = self.position_of(unique_index) else {
            return false;
        };
        let track = &mut self.tracks[index];
        track.stream_url = Some(stream_url);
        if let Some(title) = title.filter(|t| !t.is_empty()) {
            if track.has_placeholder_title() {
                track.title = title;
            }
        }
        if let Some(duration) = duration.filter(|d| *d > 0) {
            if track.duration == 0 {
                track.duration = duration;
            }
        }
        true
    }

    /// Completa título y duración tras la primera decodificación
    pub fn backfill_metadata(
        &mut self,
        unique_index: u64,
        title: Option<&str>,
        duration: Option<u64>,
    ) -> bool {
        let Some(index) = self.position_of(unique_index) else {
            return false;
        };
        let track = &mut self.tracks[index];
        if let Some(title) = title.filter(|t| !t.is_empty()) {
            if track.has_placeholder_title() {
                track.title = title.to_string();
            }
        }
        if let Some(duration) = duration.filter(|d| *d > 0) {
            if track.duration == 0 {
                track.duration = duration;
            }
        }
        true
    }

    // Contadores de repetición (los usa el reproductor)

    pub(crate) fn bump_track_plays(&mut self, index: usize) -> u32 {
        let track = &mut self.tracks[index];
        track.times_played += 1;
        track.times_played
    }

    pub(crate) fn reset_track_plays(&mut self, index: usize) {
        if let Some(track) = self.tracks.get_mut(index) {
            track.times_played = 0;
        }
    }

    pub(crate) fn bump_range_plays(&mut self, range: usize) -> u32 {
        let range = &mut self.ranges[range];
        range.times_played += 1;
        range.times_played
    }

    pub(crate) fn reset_range_plays(&mut self, range: usize) {
        if let Some(range) = self.ranges.get_mut(range) {
            range.times_played = 0;
        }
    }

    /// Obtiene información de la cola
    pub fn info(&self) -> QueueInfo {
        QueueInfo {
            items: self.tracks.clone(),
            ranges: self.ranges.clone(),
            current: self.current,
            total_items: self.tracks.len(),
            total_duration: self.tracks.iter().map(Track::duration).sum(),
        }
    }

    // Funciones privadas

    fn take_track_index(&mut self) -> u64 {
        let index = self.next_track_index;
        self.next_track_index += 1;
        index
    }

    fn take_range_index(&mut self) -> u64 {
        let index = self.next_range_index;
        self.next_range_index += 1;
        index
    }

    fn push_range(&mut self, begin: usize, end: usize, repeat: Repeat, title: String) -> usize {
        let range = PlaylistRange {
            begin,
            end,
            repeat,
            title,
            unique_index: self.take_range_index(),
            times_played: 0,
        };
        let position = self.ranges.partition_point(|r| r.begin < begin);
        info!("📃 Playlist '{}' creada ({}..={})", range.title, begin, end);
        self.ranges.insert(position, range);
        position
    }

    fn shift_for_insert(&mut self, index: usize, count: usize) {
        for range in &mut self.ranges {
            if range.begin >= index {
                range.begin += count;
                range.end += count;
            } else if index <= range.end {
                range.end += count;
            }
        }

        if let Some(current) = self.current {
            if index <= current {
                self.current = Some(current + count);
            }
        }
    }

    fn rotate(&mut self, from: usize, to: usize) {
        if from < to {
            self.tracks[from..=to].rotate_left(1);
        } else if from > to {
            self.tracks[to..=from].rotate_right(1);
        }
    }

    fn current_unique(&self) -> Option<u64> {
        self.current_track().map(|t| t.unique_index)
    }

    /// Mantiene el índice actual sobre el mismo track tras reordenar
    fn follow(&mut self, playing: Option<u64>) {
        if let Some(unique) = playing {
            if let Some(position) = self.position_of(unique) {
                self.current = Some(position);
            }
        }
    }

    fn range_bounds(&self, range: usize) -> Result<(usize, usize), QueueError> {
        self.check_playlist(range)?;
        let r = &self.ranges[range];
        Ok((r.begin, r.end))
    }

    fn check_index(&self, index: usize) -> Result<(), QueueError> {
        if index >= self.tracks.len() {
            return Err(QueueError::InvalidIndex {
                index,
                len: self.tracks.len(),
            });
        }
        Ok(())
    }

    fn check_span(&self, from: usize, to: usize) -> Result<(), QueueError> {
        if from > to || to >= self.tracks.len() {
            return Err(QueueError::InvalidRange {
                from,
                to,
                len: self.tracks.len(),
            });
        }
        Ok(())
    }

    fn check_playlist(&self, range: usize) -> Result<(), QueueError> {
        if range >= self.ranges.len() {
            return Err(QueueError::InvalidPlaylist {
                index: range,
                count: self.ranges.len(),
            });
        }
        Ok(())
    }
}

fn validate_speed(speed: f32) -> Result<(), QueueError> {
    if !speed.is_finite() || speed <= 0.0 {
        return Err(QueueError::InvalidSpeed(speed));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct QueueInfo {
    pub items: Vec<Track>,
    pub ranges: Vec<PlaylistRange>,
    pub current: Option<usize>,
    pub total_items: usize,
    pub total_duration: Duration,
}

impl QueueInfo {
    /// Obtiene una página específica de la cola
    pub fn get_page(&self, page: usize, items_per_page: usize) -> QueuePage {
        let items_per_page = items_per_page.max(1);
        let safe_page = page.max(1);
        let start = (safe_page - 1) * items_per_page;
        let end = (start + items_per_page).min(self.items.len());
        let total_pages = if self.total_items == 0 {
            1
        } else {
            self.total_items.div_ceil(items_per_page)
        };

        QueuePage {
            items: if start < self.items.len() {
                self.items[start..end].to_vec()
            } else {
                Vec::new()
            },
            first_index: start,
            current_page: safe_page,
            total_pages,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuePage {
    pub items: Vec<Track>,
    pub first_index: usize,
    pub current_page: usize,
    pub total_pages: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn track(name: &str) -> Track {
        Track::new(format!("https://example.com/{name}"), TrackKind::Url).with_title(name)
    }

    fn queue_of(count: usize) -> TrackQueue {
        let mut queue = TrackQueue::new(1000);
        for i in 0..count {
            queue
                .insert_track(i, track(&format!("t{i}")), 1.0, Repeat::default())
                .unwrap();
        }
        queue
    }

    fn titles(queue: &TrackQueue) -> Vec<String> {
        queue.tracks().iter().map(|t| t.title.clone()).collect()
    }

    fn bounds(queue: &TrackQueue) -> Vec<(usize, usize)> {
        queue.ranges().iter().map(|r| (r.begin, r.end)).collect()
    }

    fn assert_invariants(queue: &TrackQueue) {
        for r in queue.ranges() {
            assert!(r.begin < r.end, "playlist colapsada: {r:?}");
            assert!(r.end < queue.len(), "playlist fuera de la cola: {r:?}");
        }
        for pair in queue.ranges().windows(2) {
            assert!(pair[0].end < pair[1].begin, "playlists solapadas: {pair:?}");
        }
    }

    #[test]
    fn insert_at_front_keeps_distinct_unique_indices() {
        let mut queue = TrackQueue::new(10);
        let a = queue.insert_track(0, track("A"), 1.0, Repeat::default()).unwrap();
        let b = queue.insert_track(0, track("B"), 1.0, Repeat::default()).unwrap();

        assert_eq!(titles(&queue), vec!["B", "A"]);
        assert_ne!(a, b);
        assert_eq!(queue.track(0).unwrap().unique_index(), b);
    }

    #[test]
    fn insert_index_is_clamped_to_append() {
        let mut queue = queue_of(2);
        queue.insert_track(99, track("end"), 1.0, Repeat::default()).unwrap();
        assert_eq!(titles(&queue), vec!["t0", "t1", "end"]);
    }

    #[test]
    fn insert_rejects_bad_speed_and_full_queue() {
        let mut queue = TrackQueue::new(1);
        assert_eq!(
            queue.insert_track(0, track("A"), 0.0, Repeat::default()),
            Err(QueueError::InvalidSpeed(0.0))
        );
        queue.insert_track(0, track("A"), 1.0, Repeat::default()).unwrap();
        assert_eq!(
            queue.insert_track(0, track("B"), 1.0, Repeat::default()),
            Err(QueueError::Full(1))
        );
    }

    #[test]
    fn insert_shifts_and_extends_ranges() {
        let mut queue = queue_of(8);
        queue.add_range(2, 4, Repeat::default(), "p1").unwrap();
        queue.add_range(5, 7, Repeat::default(), "p2").unwrap();

        // dentro de p1: extiende su final, desplaza p2
        queue.insert_track(3, track("x"), 1.0, Repeat::default()).unwrap();
        assert_eq!(bounds(&queue), vec![(2, 5), (6, 8)]);

        // justo en el inicio de p2: desplaza ambos extremos
        queue.insert_track(6, track("y"), 1.0, Repeat::default()).unwrap();
        assert_eq!(bounds(&queue), vec![(2, 5), (7, 9)]);
    }

    #[test]
    fn batch_creates_playlist_outside_ranges() {
        let mut queue = queue_of(3);
        let batch = vec![track("a"), track("b"), track("c")];
        let result = queue
            .insert_batch(1, batch, 1.0, true, "mix", Repeat::times(2))
            .unwrap();

        assert_eq!(result.range, Some(0));
        assert_eq!(result.unique_indices.len(), 3);
        let range = queue.range(0).unwrap();
        assert_eq!((range.begin, range.end), (1, 3));
        assert_eq!(range.title, "mix");
        assert_eq!(range.repeat, Repeat::Times(2));
    }

    #[test]
    fn batch_inside_playlist_is_absorbed() {
        let mut queue = queue_of(6);
        queue.add_range(1, 4, Repeat::default(), "outer").unwrap();
        let result = queue
            .insert_batch(3, vec![track("a"), track("b")], 1.0, true, "inner", Repeat::default())
            .unwrap();

        assert_eq!(result.range, None);
        assert_eq!(bounds(&queue), vec![(1, 6)]);
        assert_eq!(queue.range(0).unwrap().title, "outer");
    }

    #[test]
    fn batch_without_new_playlist_repeats_each_track() {
        let mut queue = queue_of(2);
        queue
            .insert_batch(2, vec![track("a"), track("b")], 1.0, false, "", Repeat::times(3))
            .unwrap();
        queue
            .insert_batch(0, vec![track("solo")], 1.0, true, "one", Repeat::Infinite)
            .unwrap();

        assert!(queue.ranges().is_empty());
        let repeats: Vec<Repeat> = queue.tracks().iter().map(|t| t.repeat).collect();
        assert_eq!(
            repeats,
            vec![
                Repeat::Infinite,
                Repeat::default(),
                Repeat::default(),
                Repeat::Times(3),
                Repeat::Times(3),
            ]
        );

        queue.add_range(0, 4, Repeat::default(), "outer").unwrap();
        queue
            .insert_batch(2, vec![track("x"), track("y")], 1.0, true, "inner", Repeat::times(2))
            .unwrap();
        assert_eq!(queue.range_count(), 1);
        assert_eq!(queue.track(2).unwrap().repeat, Repeat::Times(2));
        assert_eq!(queue.track(3).unwrap().repeat, Repeat::Times(2));
    }

    #[test]
    fn batch_playlist_keeps_tracks_single_play() {
        let mut queue = queue_of(1);
        queue
            .insert_batch(1, vec![track("a"), track("b")], 1.0, true, "mix", Repeat::times(4))
            .unwrap();
        assert_eq!(queue.range(0).unwrap().repeat, Repeat::Times(4));
        assert!(queue.tracks().iter().all(|t| t.repeat == Repeat::default()));
    }

    #[test]
    fn batch_is_truncated_to_free_space() {
        let mut queue = TrackQueue::new(3);
        queue.insert_track(0, track("a"), 1.0, Repeat::default()).unwrap();
        let result = queue
            .insert_batch(1, vec![track("b"), track("c"), track("d")], 1.0, true, "p", Repeat::default())
            .unwrap();
        assert_eq!(result.unique_indices.len(), 2);
        assert_eq!(titles(&queue), vec!["a", "b", "c"]);
    }

    #[test]
    fn delete_inside_range_truncates_end() {
        let mut queue = queue_of(10);
        queue.add_range(2, 6, Repeat::default(), "p").unwrap();
        queue.delete_track(3).unwrap();
        assert_eq!(bounds(&queue), vec![(2, 5)]);
    }

    #[test]
    fn delete_before_range_shifts_it() {
        let mut queue = queue_of(10);
        queue.add_range(4, 6, Repeat::default(), "p").unwrap();
        queue.delete_track(0).unwrap();
        assert_eq!(bounds(&queue), vec![(3, 5)]);
    }

    #[test]
    fn deleting_boundary_of_two_track_range_collapses_it() {
        let mut queue = queue_of(5);
        queue.add_range(1, 2, Repeat::default(), "p").unwrap();
        queue.delete_track(2).unwrap();
        assert!(queue.ranges().is_empty());

        let mut queue = queue_of(5);
        queue.add_range(1, 2, Repeat::default(), "p").unwrap();
        queue.delete_track(1).unwrap();
        assert!(queue.ranges().is_empty());
    }

    #[test]
    fn deleting_every_track_of_range_removes_it() {
        let mut queue = queue_of(8);
        queue.add_range(2, 4, Repeat::default(), "p").unwrap();
        queue.delete_range(2, 4).unwrap();
        assert!(queue.ranges().is_empty());
        assert_eq!(titles(&queue), vec!["t0", "t1", "t5", "t6", "t7"]);
    }

    #[test]
    fn delete_range_truncates_straddling_ranges() {
        let mut queue = queue_of(12);
        queue.add_range(1, 4, Repeat::default(), "left").unwrap();
        queue.add_range(6, 9, Repeat::default(), "right").unwrap();
        queue.add_range(10, 11, Repeat::default(), "after").unwrap();

        queue.delete_range(3, 7).unwrap();
        // left pierde 3..=4, right pierde 6..=7 y se desplaza
        assert_eq!(bounds(&queue), vec![(1, 2), (3, 4), (5, 6)]);
        assert_invariants(&queue);
    }

    #[test]
    fn invalid_requests_leave_queue_unchanged() {
        let mut queue = queue_of(3);
        queue.add_range(0, 2, Repeat::default(), "p").unwrap();

        assert!(matches!(queue.delete_track(3), Err(QueueError::InvalidIndex { .. })));
        assert!(matches!(queue.delete_range(2, 1), Err(QueueError::InvalidRange { .. })));
        assert!(matches!(queue.reverse(0, 5), Err(QueueError::InvalidRange { .. })));
        assert!(matches!(queue.transfer_track(0, 7), Err(QueueError::InvalidIndex { .. })));
        assert!(matches!(queue.add_range(1, 1, Repeat::default(), "x"), Err(QueueError::InvalidRange { .. })));
        assert!(matches!(queue.set_range_repeat(4, Repeat::Infinite), Err(QueueError::InvalidPlaylist { .. })));

        assert_eq!(titles(&queue), vec!["t0", "t1", "t2"]);
        assert_eq!(bounds(&queue), vec![(0, 2)]);
    }

    #[test]
    fn transfer_rotates_and_keeps_ranges_positional() {
        let mut queue = queue_of(5);
        queue.add_range(0, 1, Repeat::default(), "p").unwrap();
        queue.transfer_track(0, 3).unwrap();
        assert_eq!(titles(&queue), vec!["t1", "t2", "t3", "t0", "t4"]);
        assert_eq!(bounds(&queue), vec![(0, 1)]);

        queue.transfer_track(4, 0).unwrap();
        assert_eq!(titles(&queue), vec!["t4", "t1", "t2", "t3", "t0"]);
    }

    #[test]
    fn reverse_twice_is_identity() {
        let mut queue = queue_of(6);
        let before = titles(&queue);
        queue.reverse(1, 4).unwrap();
        assert_eq!(titles(&queue), vec!["t0", "t4", "t3", "t2", "t1", "t5"]);
        queue.reverse(1, 4).unwrap();
        assert_eq!(titles(&queue), before);
    }

    #[test]
    fn shuffle_keeps_first_and_multiset() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let mut queue = queue_of(10);
            let kept = queue.track(6).unwrap().unique_index();
            let mut before: Vec<u64> = queue.tracks()[2..=8].iter().map(|t| t.unique_index()).collect();

            queue.shuffle_with(2, 8, Some(6), &mut rng).unwrap();

            assert_eq!(queue.track(2).unwrap().unique_index(), kept);
            let mut after: Vec<u64> = queue.tracks()[2..=8].iter().map(|t| t.unique_index()).collect();
            before.sort_unstable();
            after.sort_unstable();
            assert_eq!(before, after);
            assert_eq!(queue.track(0).unwrap().title, "t0");
            assert_eq!(queue.track(9).unwrap().title, "t9");
        }
    }

    #[test]
    fn shuffle_keep_first_outside_span_is_rejected() {
        let mut queue = queue_of(5);
        assert!(matches!(
            queue.shuffle(1, 3, Some(4)),
            Err(QueueError::InvalidIndex { index: 4, .. })
        ));
    }

    #[test]
    fn whole_queue_shuffle_clears_ranges_scoped_does_not() {
        let mut queue = queue_of(6);
        queue.add_range(1, 3, Repeat::default(), "p").unwrap();
        queue.shuffle_playlist(0, None).unwrap();
        assert_eq!(bounds(&queue), vec![(1, 3)]);

        queue.shuffle_all(None).unwrap();
        assert!(queue.ranges().is_empty());
    }

    #[test]
    fn add_range_replaces_overlapping_ranges() {
        let mut queue = queue_of(10);
        queue.add_range(0, 2, Repeat::default(), "a").unwrap();
        queue.add_range(4, 6, Repeat::default(), "b").unwrap();
        queue.add_range(8, 9, Repeat::default(), "c").unwrap();

        queue.add_range(2, 5, Repeat::Infinite, "new").unwrap();
        let names: Vec<&str> = queue.ranges().iter().map(|r| r.title.as_str()).collect();
        assert_eq!(names, vec!["new", "c"]);
        assert_invariants(&queue);
    }

    #[test]
    fn current_index_follows_playing_track() {
        let mut queue = queue_of(5);
        queue.set_current(Some(2));
        let playing = queue.current_track().unwrap().unique_index();

        queue.insert_track(0, track("x"), 1.0, Repeat::default()).unwrap();
        assert_eq!(queue.current(), Some(3));

        queue.reverse(0, 5).unwrap();
        assert_eq!(queue.current_track().unwrap().unique_index(), playing);

        queue.transfer_track(queue.current().unwrap(), 0).unwrap();
        assert_eq!(queue.current(), Some(0));
        assert_eq!(queue.current_track().unwrap().unique_index(), playing);
    }

    #[test]
    fn deleting_current_leaves_slot_with_next_track() {
        let mut queue = queue_of(4);
        queue.set_current(Some(1));
        queue.delete_track(1).unwrap();
        assert_eq!(queue.current(), Some(1));
        assert_eq!(queue.current_track().unwrap().title, "t2");

        queue.delete_range(0, 1).unwrap();
        assert_eq!(queue.current(), Some(0));
        assert_eq!(queue.current_track().unwrap().title, "t3");
    }

    #[test]
    fn fill_stream_targets_unique_index_only() {
        let mut queue = queue_of(3);
        let unique = queue.track(1).unwrap().unique_index();
        queue.transfer_track(1, 2).unwrap();

        assert!(queue.fill_stream(unique, "https://cdn/a.webm".into(), Some("Real".into()), Some(90)));
        let track = queue.track(2).unwrap();
        assert_eq!(track.stream_url.as_deref(), Some("https://cdn/a.webm"));
        // el título puesto por el usuario no se pisa
        assert_eq!(track.title, "t1");
        assert_eq!(track.duration, 90);

        queue.delete_track(2).unwrap();
        assert!(!queue.fill_stream(unique, "https://cdn/b.webm".into(), None, None));
    }

    #[test]
    fn stream_tracks_are_resolved_on_creation() {
        let track = Track::new("http://radio.example/live.mp3", TrackKind::Stream);
        assert!(track.is_resolved());
        assert!(!Track::new("lofi beats", TrackKind::Search).is_resolved());
    }

    #[test]
    fn queue_pages() {
        let queue = queue_of(12);
        let info = queue.info();
        let page = info.get_page(2, 5);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.first_index, 5);
        assert_eq!(page.items.len(), 5);
        assert!(info.get_page(4, 5).items.is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(usize),
        Batch(usize, usize, bool),
        Delete(usize),
        DeleteSpan(usize, usize),
        AddRange(usize, usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..40).prop_map(Op::Insert),
            (0usize..40, 1usize..5, any::<bool>()).prop_map(|(i, n, p)| Op::Batch(i, n, p)),
            (0usize..40).prop_map(Op::Delete),
            (0usize..40, 0usize..6).prop_map(|(i, n)| Op::DeleteSpan(i, i + n)),
            (0usize..40, 1usize..6).prop_map(|(i, n)| Op::AddRange(i, i + n)),
        ]
    }

    proptest! {
        #[test]
        fn ranges_stay_valid_under_mutation(ops in prop::collection::vec(op(), 1..60)) {
            let mut queue = queue_of(10);
            for op in ops {
                let _ = match op {
                    Op::Insert(i) => queue.insert_track(i, track("p"), 1.0, Repeat::default()).map(|_| ()),
                    Op::Batch(i, n, p) => {
                        let batch = (0..n).map(|k| track(&format!("b{k}"))).collect();
                        queue.insert_batch(i, batch, 1.0, p, "batch", Repeat::default()).map(|_| ())
                    }
                    Op::Delete(i) => queue.delete_track(i).map(|_| ()),
                    Op::DeleteSpan(f, t) => queue.delete_range(f, t).map(|_| ()),
                    Op::AddRange(b, e) => queue.add_range(b, e, Repeat::default(), "r").map(|_| ()),
                };
                assert_invariants(&queue);
            }
        }
    }
}
