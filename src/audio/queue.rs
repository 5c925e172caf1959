use super::renderer::AudioSink;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipOutcome {
    Finished,
    /// The sink reported an error; the queue moved on anyway.
    Failed,
    /// Discarded by [`PlaybackQueue::stop`] before or while playing.
    Stopped,
}

/// Resolves once its clip has left the queue.
pub struct ClipHandle {
    rx: oneshot::Receiver<ClipOutcome>,
}

impl ClipHandle {
    pub async fn finished(self) -> ClipOutcome {
        self.rx.await.unwrap_or(ClipOutcome::Stopped)
    }
}

struct PendingClip {
    audio: Vec<u8>,
    done: oneshot::Sender<ClipOutcome>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<PendingClip>,
    worker: Option<JoinHandle<()>>,
    generation: u64,
}

struct Inner {
    sink: Arc<dyn AudioSink>,
    state: Mutex<QueueState>,
    playing: watch::Sender<bool>,
    // Held while a clip is producing sound; a worker that was just aborted
    // releases it before the next one can start.
    output: tokio::sync::Mutex<()>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Sequential player: clips play one at a time in enqueue order.
#[derive(Clone)]
pub struct PlaybackQueue {
    inner: Arc<Inner>,
}

impl PlaybackQueue {
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        let (playing, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                sink,
                state: Mutex::new(QueueState::default()),
                playing,
                output: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Appends a clip, starting playback if the queue was idle.
    pub fn enqueue(&self, audio: Vec<u8>) -> ClipHandle {
        let (done, rx) = oneshot::channel();
        let mut state = self.inner.lock();
        state.pending.push_back(PendingClip { audio, done });

        if state.worker.is_none() {
            self.inner.playing.send_replace(true);
            let generation = state.generation;
            state.worker = Some(tokio::spawn(run(self.inner.clone(), generation)));
        }
        ClipHandle { rx }
    }

    /// Halts the current clip and drops everything pending. Returns how many
    /// clips were discarded, including the one playing.
    pub fn stop(&self) -> usize {
        let mut state = self.inner.lock();
        state.generation += 1;
        let mut discarded = state.pending.len();
        state.pending.clear();
        if let Some(worker) = state.worker.take() {
            worker.abort();
            discarded += 1;
        }
        self.inner.playing.send_replace(false);
        if discarded > 0 {
            tracing::info!(discarded, "playback stopped");
        }
        discarded
    }

    pub fn is_playing(&self) -> bool {
        *self.inner.playing.borrow()
    }

    pub fn pending(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Resolves when the queue next becomes idle (immediately if it already is).
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.playing.subscribe();
        let _ = rx.wait_for(|playing| !*playing).await;
    }
}

async fn run(inner: Arc<Inner>, generation: u64) {
    loop {
        let clip = {
            let mut state = inner.lock();
            if state.generation != generation {
                return;
            }
            match state.pending.pop_front() {
                Some(clip) => clip,
                None => {
                    state.worker = None;
                    inner.playing.send_replace(false);
                    return;
                }
            }
        };
        if clip.done.is_closed() {
            tracing::debug!(bytes = clip.audio.len(), "clip abandoned before playback; skipping");
            continue;
        }

        let outcome = {
            let _output = inner.output.lock().await;
            match inner.sink.play(&clip.audio).await {
                Ok(()) => ClipOutcome::Finished,
                Err(err) => {
                    tracing::warn!(error = %err, bytes = clip.audio.len(), "clip failed to play; skipping");
                    ClipOutcome::Failed
                }
            }
        };
        let _ = clip.done.send(outcome);
    }
}
