//! Read-ahead of player output on a background thread.
//!
//! The butler owns a [`Player`] and keeps bounded queues of video and audio
//! filled ahead of a consumer. A seek invalidates everything queued or in
//! flight; an error on the background thread is held and re-raised once on
//! the consumer's next call.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use reelkit_common::error::{ReelkitError, ReelkitResult};
use reelkit_common::time::DcpTime;

use crate::player::{Player, PlayerAudio, PlayerVideo};

/// Read-ahead depth in frames.
pub const DEFAULT_READAHEAD_FRAMES: usize = 10;

/// Whether a `get_*` call may wait for the background thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Blocking,
    NonBlocking,
}

#[derive(Debug, Clone)]
pub struct ButlerConfig {
    pub readahead_frames: usize,
    /// Queue bound is `readahead_frames × frames_in_memory_multiplier`.
    pub frames_in_memory_multiplier: usize,
    /// Queue audio as well as video.
    pub audio: bool,
}

impl Default for ButlerConfig {
    fn default() -> Self {
        Self {
            readahead_frames: DEFAULT_READAHEAD_FRAMES,
            frames_in_memory_multiplier: 3,
            audio: true,
        }
    }
}

impl ButlerConfig {
    pub fn capacity(&self) -> usize {
        (self.readahead_frames * self.frames_in_memory_multiplier).max(1)
    }
}

struct State {
    video: VecDeque<PlayerVideo>,
    audio: VecDeque<PlayerAudio>,
    capacity: usize,
    audio_enabled: bool,
    seek: Option<(DcpTime, bool)>,
    /// Bumped on every seek; output produced under an older value is stale.
    generation: u64,
    error: Option<ReelkitError>,
    finished: bool,
    stop: bool,
}

impl State {
    fn has_room(&self) -> bool {
        self.video.len() < self.capacity
            && (!self.audio_enabled || self.audio.len() < self.capacity)
    }
}

struct Shared {
    state: Mutex<State>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.changed
            .wait(guard)
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Background read-ahead wrapper around a [`Player`].
pub struct Butler {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Butler {
    pub fn new(player: Player, config: ButlerConfig) -> ReelkitResult<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                video: VecDeque::new(),
                audio: VecDeque::new(),
                capacity: config.capacity(),
                audio_enabled: config.audio,
                seek: None,
                generation: 0,
                error: None,
                finished: false,
                stop: false,
            }),
            changed: Condvar::new(),
        });

        let worker = shared.clone();
        let thread = std::thread::Builder::new()
            .name("reelkit-butler".to_string())
            .spawn(move || run(player, worker))?;

        tracing::debug!(capacity = config.capacity(), audio = config.audio, "Butler started");
        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Discard everything queued and restart production at `time`.
    ///
    /// A pending background error is returned (and cleared); the seek is
    /// made either way.
    pub fn seek(&self, time: DcpTime, accurate: bool) -> ReelkitResult<()> {
        let mut state = self.shared.lock();
        let pending = state.error.take();
        state.video.clear();
        state.audio.clear();
        state.generation += 1;
        state.seek = Some((time, accurate));
        state.finished = false;
        drop(state);
        self.shared.changed.notify_all();
        match pending {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Stop queueing audio and drop what is queued.
    pub fn disable_audio(&self) {
        let mut state = self.shared.lock();
        state.audio_enabled = false;
        state.audio.clear();
        drop(state);
        self.shared.changed.notify_all();
    }

    /// Next queued picture; `Ok(None)` at end of timeline, or when nothing
    /// is ready and `behaviour` is non-blocking.
    pub fn get_video(&self, behaviour: Behaviour) -> ReelkitResult<Option<PlayerVideo>> {
        self.take(behaviour, |state| state.video.pop_front())
    }

    /// Next queued audio block, on the same terms as [`Butler::get_video`].
    pub fn get_audio(&self, behaviour: Behaviour) -> ReelkitResult<Option<PlayerAudio>> {
        if !self.shared.lock().audio_enabled {
            return Ok(None);
        }
        self.take(behaviour, |state| state.audio.pop_front())
    }

    fn take<T>(
        &self,
        behaviour: Behaviour,
        pop: impl Fn(&mut State) -> Option<T>,
    ) -> ReelkitResult<Option<T>> {
        let mut state = self.shared.lock();
        loop {
            if let Some(err) = state.error.take() {
                return Err(err);
            }
            if let Some(item) = pop(&mut *state) {
                drop(state);
                self.shared.changed.notify_all();
                return Ok(Some(item));
            }
            if behaviour == Behaviour::NonBlocking || (state.finished && state.seek.is_none()) {
                return Ok(None);
            }
            state = self.shared.wait(state);
        }
    }

    /// Queued picture count.
    pub fn video_queued(&self) -> usize {
        self.shared.lock().video.len()
    }
}

impl Drop for Butler {
    fn drop(&mut self) {
        self.shared.lock().stop = true;
        self.shared.changed.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Butler thread panicked");
            }
        }
    }
}

fn run(mut player: Player, shared: Arc<Shared>) {
    loop {
        let (generation, seek) = {
            let mut state = shared.lock();
            loop {
                if state.stop {
                    return;
                }
                if state.seek.is_some() || (!state.finished && state.has_room()) {
                    break;
                }
                state = shared.wait(state);
            }
            (state.generation, state.seek.take())
        };

        // The player runs outside the lock so the consumer is never held up.
        let result = match seek {
            Some((time, accurate)) => player
                .seek(time, accurate)
                .and_then(|()| player.pass()),
            None => player.pass(),
        };

        let mut state = shared.lock();
        if state.generation != generation {
            continue;
        }
        match result {
            Ok(Some(quantum)) => {
                state.video.extend(quantum.video);
                if state.audio_enabled {
                    if let Some(audio) = quantum.audio {
                        state.audio.push_back(audio);
                    }
                }
            }
            Ok(None) => {
                tracing::debug!("Butler reached the end of the timeline");
                state.finished = true;
            }
            Err(err) => {
                tracing::error!(error = %err, "Butler stopped on error");
                state.error = Some(err);
                state.finished = true;
            }
        }
        drop(state);
        shared.changed.notify_all();
    }
}
