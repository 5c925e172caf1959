use super::session::{Phase, Progress, SessionGuard, SessionTable};
use crate::audio::chain::CacheChain;
use crate::audio::key::derive_key;
use crate::audio::queue::{ClipOutcome, PlaybackQueue};
use crate::audio::tier::CacheScope;
use crate::departure::{Departure, Language, StatusChange};
use crate::script;
use crate::settings::OperatorSettings;
use crate::store::{StoreError, StructuredStore};
use crate::tts::{SynthesisClient, SynthesisError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

pub const FAILURE_MESSAGE: &str = "Failed to play announcement, please try again";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// Fired by a status transition to boarding.
    Automatic,
    /// Fired explicitly by staff.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    VoiceDisabled,
    AutoAnnouncementDisabled,
    AlreadyActive,
    NotBoarding,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnnounceOutcome {
    Completed,
    Cancelled,
    Skipped(SkipReason),
    Failed(SynthesisError),
}

impl AnnounceOutcome {
    /// Text to surface to staff, if the outcome warrants it.
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            AnnounceOutcome::Failed(_) => Some(FAILURE_MESSAGE),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum AnnounceError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Pauses inserted between clips.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub between_languages: Duration,
    pub between_repeats: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            between_languages: Duration::from_millis(500),
            between_repeats: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone)]
struct ResolvedClip {
    language: Language,
    audio: Vec<u8>,
}

/// Drives render → resolve → play for departures, one session per departure.
pub struct Orchestrator {
    store: Arc<dyn StructuredStore>,
    cache: CacheChain,
    synthesis: Arc<SynthesisClient>,
    queue: PlaybackQueue,
    sessions: SessionTable,
    pacing: Pacing,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn StructuredStore>,
        cache: CacheChain,
        synthesis: Arc<SynthesisClient>,
        queue: PlaybackQueue,
        pacing: Pacing,
    ) -> Self {
        Self {
            store,
            cache,
            synthesis,
            queue,
            sessions: SessionTable::default(),
            pacing,
        }
    }

    pub fn progress(&self, departure_id: &str) -> Option<Progress> {
        self.sessions.progress(departure_id)
    }

    pub fn active(&self) -> Vec<Progress> {
        self.sessions.active()
    }

    pub fn is_active(&self, departure_id: &str) -> bool {
        self.sessions.is_active(departure_id)
    }

    /// Loads the departure and its operator's settings, then announces.
    pub async fn trigger(&self, departure_id: &str, kind: TriggerKind) -> Result<AnnounceOutcome, AnnounceError> {
        if self.sessions.is_active(departure_id) {
            tracing::debug!(departure = departure_id, "announcement already running; ignoring trigger");
            return Ok(AnnounceOutcome::Skipped(SkipReason::AlreadyActive));
        }
        let departure = self.store.departure(departure_id).await?;
        let settings = self.store.operator_settings(&departure.operator_id).await?;
        Ok(self.announce(&departure, &settings, kind).await)
    }

    /// Automatic mode: only a transition into boarding starts an announcement.
    pub async fn on_status_change(&self, change: &StatusChange) -> Result<AnnounceOutcome, AnnounceError> {
        if !change.is_boarding_transition() {
            return Ok(AnnounceOutcome::Skipped(SkipReason::NotBoarding));
        }
        self.trigger(&change.departure_id, TriggerKind::Automatic).await
    }

    /// Runs [`Orchestrator::trigger`] in the background and reports the result
    /// to `on_complete`.
    pub fn spawn_trigger<F>(self: &Arc<Self>, departure_id: String, kind: TriggerKind, on_complete: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<AnnounceOutcome, AnnounceError>) + Send + 'static,
    {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let result = this.trigger(&departure_id, kind).await;
            on_complete(result);
        })
    }

    pub async fn announce(
        &self,
        departure: &Departure,
        settings: &OperatorSettings,
        kind: TriggerKind,
    ) -> AnnounceOutcome {
        if !settings.voice_enabled {
            tracing::info!(departure = %departure.id, "voice announcements disabled for operator");
            return AnnounceOutcome::Skipped(SkipReason::VoiceDisabled);
        }
        if kind == TriggerKind::Automatic && !settings.auto_announcement_enabled {
            tracing::info!(departure = %departure.id, "automatic announcements disabled for operator");
            return AnnounceOutcome::Skipped(SkipReason::AutoAnnouncementDisabled);
        }

        let repeats = settings.repeats();
        let Some(guard) = self.sessions.try_begin(&departure.id, repeats) else {
            tracing::debug!(departure = %departure.id, "announcement already running; ignoring trigger");
            return AnnounceOutcome::Skipped(SkipReason::AlreadyActive);
        };

        tracing::info!(
            departure = %departure.id,
            destination = %departure.destination,
            ?kind,
            repeats,
            "announcement started"
        );

        let clips = match self.resolve_all(departure, settings).await {
            Ok(clips) => clips,
            Err(err) => {
                tracing::error!(departure = %departure.id, error = %err, "announcement failed; nothing played");
                return AnnounceOutcome::Failed(err);
            }
        };

        if guard.is_cancelled() {
            tracing::info!(departure = %departure.id, "announcement cancelled before playback");
            return AnnounceOutcome::Cancelled;
        }

        let outcome = self.play(&guard, &departure.id, &clips, repeats).await;
        tracing::info!(departure = %departure.id, ?outcome, "announcement finished");
        outcome
    }

    /// Frees the departure immediately and stops playback if it had started.
    /// In-flight synthesis still lands in the cache but is never played.
    pub fn cancel(&self, departure_id: &str) -> bool {
        let Some(progress) = self.sessions.cancel(departure_id) else {
            return false;
        };
        // A session still generating has nothing queued; other departures keep playing.
        if progress.phase == Phase::Playing {
            self.queue.stop();
        }
        tracing::info!(departure = departure_id, phase = ?progress.phase, "announcement cancelled");
        true
    }

    pub fn cancel_all(&self) -> usize {
        let cancelled = self.sessions.cancel_all();
        self.queue.stop();
        cancelled
    }

    /// Drops cached audio after an operator edits scripts or voices.
    pub async fn settings_changed(&self, operator_id: &str) -> usize {
        self.cache.clear_for_operator(operator_id).await
    }

    async fn resolve_all(
        &self,
        departure: &Departure,
        settings: &OperatorSettings,
    ) -> Result<Vec<ResolvedClip>, SynthesisError> {
        let [en, km, zh] = Language::PLAY_ORDER;
        // Every resolution runs to completion so successful ones are cached
        // even when another language fails.
        let (en, km, zh) = tokio::join!(
            self.resolve(en, departure, settings),
            self.resolve(km, departure, settings),
            self.resolve(zh, departure, settings),
        );
        Ok(vec![en?, km?, zh?])
    }

    async fn resolve(
        &self,
        language: Language,
        departure: &Departure,
        settings: &OperatorSettings,
    ) -> Result<ResolvedClip, SynthesisError> {
        let text = script::render_for(language, departure, settings);
        let voice = settings.voice(language);
        let key = derive_key(&text, language, &settings.operator_id, Some(&voice.cache_tag()));
        let scope = CacheScope::new(settings.operator_id.clone(), language);

        if let Some((audio, hit)) = self.cache.lookup(&key, &scope).await {
            tracing::debug!(departure = %departure.id, %language, tier = ?hit, "reusing cached audio");
            return Ok(ResolvedClip { language, audio });
        }

        let audio = self.synthesis.synthesize(&text, language, &voice).await?;
        self.cache.store(&key, &audio, &scope).await;
        Ok(ResolvedClip { language, audio })
    }

    async fn play(
        &self,
        guard: &SessionGuard,
        departure_id: &str,
        clips: &[ResolvedClip],
        repeats: u8,
    ) -> AnnounceOutcome {
        for repeat in 1..=repeats {
            for (index, clip) in clips.iter().enumerate() {
                if !guard.update(Phase::Playing, repeat, Some(clip.language)) {
                    return AnnounceOutcome::Cancelled;
                }
                tracing::debug!(departure = departure_id, repeat, language = %clip.language, "playing clip");

                loop {
                    let handle = self.queue.enqueue(clip.audio.clone());
                    let outcome = tokio::select! {
                        outcome = handle.finished() => outcome,
                        _ = guard.cancelled() => return AnnounceOutcome::Cancelled,
                    };
                    match outcome {
                        ClipOutcome::Stopped if guard.is_cancelled() => return AnnounceOutcome::Cancelled,
                        // Another departure's cancellation cleared the shared queue.
                        ClipOutcome::Stopped => {
                            tracing::debug!(departure = departure_id, language = %clip.language, "clip interrupted; replaying");
                        }
                        ClipOutcome::Finished | ClipOutcome::Failed => break,
                    }
                }

                if index + 1 < clips.len() && !self.pause(guard, self.pacing.between_languages).await {
                    return AnnounceOutcome::Cancelled;
                }
            }

            if repeat < repeats && !self.pause(guard, self.pacing.between_repeats).await {
                return AnnounceOutcome::Cancelled;
            }
        }
        AnnounceOutcome::Completed
    }

    /// Returns false if the session was cancelled during the pause.
    async fn pause(&self, guard: &SessionGuard, duration: Duration) -> bool {
        if duration.is_zero() {
            return !guard.is_cancelled();
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = guard.cancelled() => false,
        }
    }
}
