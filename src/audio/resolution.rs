//! Background source resolution.
//!
//! A request is tagged with the unique index of the track it resolves. The
//! worker writes its result by unique index, never by position, and the
//! waiting side re-checks the tag after every wake. A result for a track that
//! was deleted meanwhile lands nowhere.

use parking_lot::{Condvar, Mutex};
use std::{sync::Arc, time::Duration};
use tokio::{runtime::Handle, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::queue::TrackQueue;
use crate::{error::ResolveError, sources::Resolver};

/// Resultado de una resolución
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeOutcome {
    /// El stream quedó escrito en el track
    Committed,
    /// El track ya no está en la cola
    Superseded,
    Failed(ResolveError),
}

#[derive(Default)]
struct Signal {
    outcome: Mutex<Option<HandshakeOutcome>>,
    done: Condvar,
}

impl Signal {
    fn finish(&self, outcome: HandshakeOutcome) {
        *self.outcome.lock() = Some(outcome);
        self.done.notify_all();
    }
}

pub struct ResolutionHandshake {
    unique_index: u64,
    signal: Arc<Signal>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ResolutionHandshake {
    /// Lanza la resolución del track `unique_index` en el runtime
    pub fn spawn(
        runtime: &Handle,
        resolver: Arc<dyn Resolver>,
        queue: Arc<Mutex<TrackQueue>>,
        unique_index: u64,
        source: String,
    ) -> Self {
        let signal = Arc::new(Signal::default());
        let cancel = CancellationToken::new();

        let task = runtime.spawn({
            let signal = signal.clone();
            let cancel = cancel.clone();
            async move {
                let result = tokio::select! {
                    _ = cancel.cancelled() => Err(ResolveError::Cancelled),
                    result = resolver.resolve(&source) => result,
                };

                let outcome = match result {
                    Ok(resolved) => {
                        let committed = queue.lock().fill_stream(
                            unique_index,
                            resolved.stream_url,
                            resolved.title,
                            resolved.duration,
                        );
                        if committed {
                            HandshakeOutcome::Committed
                        } else {
                            debug!("🗑️ Track #{} ya no está en la cola, resultado descartado", unique_index);
                            HandshakeOutcome::Superseded
                        }
                    }
                    Err(e) => HandshakeOutcome::Failed(e),
                };
                signal.finish(outcome);
            }
        });

        debug!("🔍 Resolución lanzada para track #{}", unique_index);
        Self {
            unique_index,
            signal,
            cancel,
            task,
        }
    }

    pub fn unique_index(&self) -> u64 {
        self.unique_index
    }

    /// Espera el resultado como mucho `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> Option<HandshakeOutcome> {
        let mut outcome = self.signal.outcome.lock();
        if outcome.is_none() {
            self.signal.done.wait_for(&mut outcome, timeout);
        }
        outcome.take()
    }

    /// Deja que el worker termine solo; seguirá escribiendo por índice único
    pub fn detach(self) {
        debug!("↪️ Resolución de track #{} abandonada", self.unique_index);
    }

    /// Cancela el worker y su proceso
    pub fn terminate(self) {
        warn!(
            "🛑 Forzando terminación del resolver para track #{}",
            self.unique_index
        );
        self.cancel.cancel();
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        queue::{Repeat, Track, TrackKind},
        testing::FakeResolver,
    };
    use pretty_assertions::assert_eq;

    const WAIT: Duration = Duration::from_secs(5);

    fn setup(resolver: FakeResolver) -> (tokio::runtime::Runtime, Arc<FakeResolver>, Arc<Mutex<TrackQueue>>) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let queue = Arc::new(Mutex::new(TrackQueue::new(100)));
        {
            let mut q = queue.lock();
            for name in ["a", "b", "c"] {
                let end = q.len();
                q.insert_track(end, Track::new(name, TrackKind::Search), 1.0, Repeat::default())
                    .unwrap();
            }
        }
        (runtime, Arc::new(resolver), queue)
    }

    #[test]
    fn commits_by_unique_index_after_move() {
        let (runtime, resolver, queue) = setup(FakeResolver::new().gated("b"));
        let unique = queue.lock().track(1).unwrap().unique_index();

        let handshake =
            ResolutionHandshake::spawn(runtime.handle(), resolver.clone(), queue.clone(), unique, "b".into());
        queue.lock().transfer_track(1, 0).unwrap();
        resolver.release();

        assert_eq!(handshake.wait_timeout(WAIT), Some(HandshakeOutcome::Committed));
        let q = queue.lock();
        assert_eq!(q.track(0).unwrap().stream_url.as_deref(), Some("stream://b"));
        assert_eq!(q.track(0).unwrap().title, "Resolved b");
        assert!(!q.track(1).unwrap().is_resolved());
    }

    #[test]
    fn deleted_track_receives_no_write() {
        let (runtime, resolver, queue) = setup(FakeResolver::new().gated("b"));
        let unique = queue.lock().track(1).unwrap().unique_index();

        let handshake =
            ResolutionHandshake::spawn(runtime.handle(), resolver.clone(), queue.clone(), unique, "b".into());
        queue.lock().delete_track(1).unwrap();
        resolver.release();

        assert_eq!(handshake.wait_timeout(WAIT), Some(HandshakeOutcome::Superseded));
        assert!(queue.lock().tracks().iter().all(|t| !t.is_resolved()));
    }

    #[test]
    fn failures_are_reported() {
        let (runtime, resolver, queue) = setup(FakeResolver::new().failing("c"));
        let unique = queue.lock().track(2).unwrap().unique_index();

        let handshake = ResolutionHandshake::spawn(runtime.handle(), resolver, queue.clone(), unique, "c".into());
        assert!(matches!(
            handshake.wait_timeout(WAIT),
            Some(HandshakeOutcome::Failed(ResolveError::Failed { .. }))
        ));
        assert!(!queue.lock().track(2).unwrap().is_resolved());
    }

    #[test]
    fn wait_times_out_and_terminate_stops_worker() {
        let (runtime, resolver, queue) = setup(FakeResolver::new().gated("a"));
        let unique = queue.lock().track(0).unwrap().unique_index();

        let handshake =
            ResolutionHandshake::spawn(runtime.handle(), resolver.clone(), queue.clone(), unique, "a".into());
        assert_eq!(handshake.wait_timeout(Duration::from_millis(20)), None);
        handshake.terminate();

        resolver.release();
        std::thread::sleep(Duration::from_millis(50));
        assert!(!queue.lock().track(0).unwrap().is_resolved());
    }
}
