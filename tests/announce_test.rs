use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

use terminal_announcer::announce::{
    AnnounceOutcome, Orchestrator, Pacing, Phase, SkipReason, TriggerKind, FAILURE_MESSAGE,
};
use terminal_announcer::audio::cache::LocalCache;
use terminal_announcer::audio::chain::CacheChain;
use terminal_announcer::audio::queue::PlaybackQueue;
use terminal_announcer::audio::remote::MemoryRemoteCache;
use terminal_announcer::audio::renderer::{AudioSink, PlaybackError};
use terminal_announcer::departure::{Departure, DepartureStatus, FleetType, Language, StatusChange};
use terminal_announcer::settings::OperatorSettings;
use terminal_announcer::store::MemoryStore;
use terminal_announcer::tts::provider::{BackendAudio, BackendError, SynthesisRequest, TtsBackend};
use terminal_announcer::tts::SynthesisClient;

#[derive(Default)]
struct ScriptedBackend {
    requests: Mutex<Vec<(Language, String)>>,
    calls: AtomicUsize,
    fail: AtomicBool,
    delay_ms: AtomicUsize,
}

struct SharedBackend(Arc<ScriptedBackend>);

#[async_trait]
impl TtsBackend for SharedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<BackendAudio, BackendError> {
        let state = &self.0;
        state.calls.fetch_add(1, Ordering::SeqCst);
        state
            .requests
            .lock()
            .unwrap()
            .push((request.language, request.text.to_string()));
        let delay = state.delay_ms.load(Ordering::SeqCst) as u64;
        tokio::time::sleep(Duration::from_millis(delay)).await;
        if state.fail.load(Ordering::SeqCst) {
            return Err(BackendError::Failed("503 service unavailable".into()));
        }
        Ok(BackendAudio {
            bytes: request.language.as_str().as_bytes().to_vec(),
            mime_type: "audio/mpeg".into(),
        })
    }
}

#[derive(Default)]
struct RecordingSink {
    played: Mutex<Vec<String>>,
    started: Mutex<Vec<Instant>>,
    delay_ms: AtomicUsize,
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&self, clip: &[u8]) -> Result<(), PlaybackError> {
        self.started.lock().unwrap().push(Instant::now());
        let delay = self.delay_ms.load(Ordering::SeqCst) as u64;
        tokio::time::sleep(Duration::from_millis(delay)).await;
        self.played
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(clip).into_owned());
        Ok(())
    }
}

struct Harness {
    _dir: TempDir,
    backend: Arc<ScriptedBackend>,
    sink: Arc<RecordingSink>,
    store: Arc<MemoryStore>,
    local: Arc<LocalCache>,
    remote: Arc<MemoryRemoteCache>,
    orchestrator: Arc<Orchestrator>,
}

fn departure(id: &str, destination: &str) -> Departure {
    Departure {
        id: id.to_string(),
        branch_id: "pp-central".to_string(),
        operator_id: "larryta".to_string(),
        destination: destination.to_string(),
        plate_number: "PP-1234".to_string(),
        departure_time: "14:30".to_string(),
        status: DepartureStatus::Boarding,
        estimated_time: None,
        fleet_type: FleetType::Bus,
        fleet_image: None,
    }
}

fn operator(repeat_count: u8) -> OperatorSettings {
    let mut settings = OperatorSettings::new("larryta", "Larryta Express");
    settings.repeat_count = repeat_count;
    settings.trip_duration = Some("6 hours".to_string());
    settings.break_duration = Some("30 minutes".to_string());
    settings
}

async fn harness(settings: OperatorSettings) -> Harness {
    let pacing = Pacing {
        between_languages: Duration::ZERO,
        between_repeats: Duration::ZERO,
    };
    paced_harness(settings, pacing).await
}

async fn paced_harness(settings: OperatorSettings, pacing: Pacing) -> Harness {
    let dir = TempDir::new().unwrap();
    let local = Arc::new(LocalCache::open(dir.path().join("cache"), 10 * 1024 * 1024, 100).await.unwrap());
    let remote = Arc::new(MemoryRemoteCache::new());
    let cache = CacheChain::new(
        local.clone(),
        remote.clone(),
        chrono::Duration::hours(168),
        chrono::Duration::hours(168),
    );

    let backend = Arc::new(ScriptedBackend::default());
    let synthesis = SynthesisClient::new(vec![Box::new(SharedBackend(backend.clone()))], Duration::from_secs(5));

    let sink = Arc::new(RecordingSink::default());
    let queue = PlaybackQueue::new(sink.clone());

    let store = Arc::new(MemoryStore::new());
    store.put_departure(departure("d1", "Phnom Penh"));
    store.put_departure(departure("d2", "Siem Reap"));
    store.put_operator(settings);

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        cache,
        Arc::new(synthesis),
        queue,
        pacing,
    ));

    Harness {
        _dir: dir,
        backend,
        sink,
        store,
        local,
        remote,
        orchestrator,
    }
}

fn played(h: &Harness) -> Vec<String> {
    h.sink.played.lock().unwrap().clone()
}

#[tokio::test]
async fn single_repeat_plays_three_languages_in_order() {
    let h = harness(operator(1)).await;

    let outcome = h.orchestrator.trigger("d1", TriggerKind::Manual).await.unwrap();
    assert_eq!(outcome, AnnounceOutcome::Completed);

    assert_eq!(h.backend.calls.load(Ordering::SeqCst), 3);
    assert_eq!(played(&h), vec!["english", "khmer", "chinese"]);
    assert!(!h.orchestrator.is_active("d1"));

    let requests = h.backend.requests.lock().unwrap().clone();
    let (_, english) = requests
        .iter()
        .find(|(language, _)| *language == Language::English)
        .unwrap();
    assert!(english.contains("Phnom Penh"));
    assert!(english.contains("14:30"));
    assert!(english.contains("PP-1234"));
    assert!(english.contains("Larryta Express"));
    assert!(english.contains("Bus"));
    assert!(!english.contains('{'));
}

#[tokio::test]
async fn repeats_cycle_through_all_languages() {
    let h = harness(operator(2)).await;

    let outcome = h.orchestrator.trigger("d1", TriggerKind::Manual).await.unwrap();
    assert_eq!(outcome, AnnounceOutcome::Completed);

    assert_eq!(
        played(&h),
        vec!["english", "khmer", "chinese", "english", "khmer", "chinese"]
    );
    // Clips are resolved once and replayed.
    assert_eq!(h.backend.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn pauses_between_languages_and_repeats_only() {
    let pacing = Pacing {
        between_languages: Duration::from_millis(100),
        between_repeats: Duration::from_millis(250),
    };
    let h = paced_harness(operator(2), pacing).await;

    let begin = Instant::now();
    let outcome = h.orchestrator.trigger("d1", TriggerKind::Manual).await.unwrap();
    let elapsed = begin.elapsed();
    assert_eq!(outcome, AnnounceOutcome::Completed);

    let started = h.sink.started.lock().unwrap().clone();
    assert_eq!(started.len(), 6);
    let gaps: Vec<u128> = started
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_millis())
        .collect();
    for (index, gap) in gaps.iter().enumerate() {
        let expected = if index == 2 { 250 } else { 100 };
        assert!(
            *gap >= expected && *gap < expected + 100,
            "gap {index} was {gap}ms, expected about {expected}ms"
        );
    }

    // Four language pauses plus one repeat pause, nothing after the final clip.
    assert!(elapsed >= Duration::from_millis(650), "took {elapsed:?}");
    assert!(elapsed < Duration::from_millis(850), "took {elapsed:?}");
}

#[tokio::test]
async fn duplicate_trigger_is_ignored_while_other_departures_run() {
    let h = harness(operator(1)).await;
    h.backend.delay_ms.store(100, Ordering::SeqCst);

    let first = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move { orchestrator.trigger("d1", TriggerKind::Manual).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.orchestrator.is_active("d1"));
    assert_eq!(h.orchestrator.progress("d1").unwrap().phase, Phase::Generating);

    let duplicate = h.orchestrator.trigger("d1", TriggerKind::Manual).await.unwrap();
    assert_eq!(duplicate, AnnounceOutcome::Skipped(SkipReason::AlreadyActive));

    let other = h.orchestrator.trigger("d2", TriggerKind::Manual).await.unwrap();
    assert_eq!(other, AnnounceOutcome::Completed);
    assert_eq!(first.await.unwrap().unwrap(), AnnounceOutcome::Completed);

    assert_eq!(h.backend.calls.load(Ordering::SeqCst), 6);
    assert_eq!(played(&h).len(), 6);
    assert!(h.orchestrator.active().is_empty());
}

#[tokio::test]
async fn voice_disabled_operator_is_refused() {
    let mut settings = operator(3);
    settings.voice_enabled = false;
    let h = harness(settings).await;

    let outcome = h.orchestrator.trigger("d1", TriggerKind::Manual).await.unwrap();
    assert_eq!(outcome, AnnounceOutcome::Skipped(SkipReason::VoiceDisabled));
    assert_eq!(h.backend.calls.load(Ordering::SeqCst), 0);
    assert!(played(&h).is_empty());
    assert!(!h.orchestrator.is_active("d1"));
}

#[tokio::test]
async fn automatic_mode_follows_boarding_transitions() {
    let mut settings = operator(1);
    settings.auto_announcement_enabled = false;
    let h = harness(settings).await;

    let boarding = StatusChange {
        departure_id: "d1".to_string(),
        previous_status: Some(DepartureStatus::OnTime),
        status: DepartureStatus::Boarding,
    };
    let outcome = h.orchestrator.on_status_change(&boarding).await.unwrap();
    assert_eq!(outcome, AnnounceOutcome::Skipped(SkipReason::AutoAnnouncementDisabled));

    let departed = StatusChange {
        departure_id: "d1".to_string(),
        previous_status: Some(DepartureStatus::Boarding),
        status: DepartureStatus::Departed,
    };
    let outcome = h.orchestrator.on_status_change(&departed).await.unwrap();
    assert_eq!(outcome, AnnounceOutcome::Skipped(SkipReason::NotBoarding));

    // Manual triggers ignore the automatic switch.
    let outcome = h.orchestrator.trigger("d1", TriggerKind::Manual).await.unwrap();
    assert_eq!(outcome, AnnounceOutcome::Completed);

    h.store.put_operator(operator(1));
    let outcome = h.orchestrator.on_status_change(&boarding).await.unwrap();
    assert_eq!(outcome, AnnounceOutcome::Completed);
}

#[tokio::test]
async fn synthesis_failure_aborts_before_playback() {
    let h = harness(operator(3)).await;
    h.backend.fail.store(true, Ordering::SeqCst);

    let outcome = h.orchestrator.trigger("d1", TriggerKind::Manual).await.unwrap();
    assert!(matches!(outcome, AnnounceOutcome::Failed(_)));
    assert_eq!(outcome.user_message(), Some(FAILURE_MESSAGE));
    assert!(played(&h).is_empty());
    assert!(!h.orchestrator.is_active("d1"));

    h.backend.fail.store(false, Ordering::SeqCst);
    let outcome = h.orchestrator.trigger("d1", TriggerKind::Manual).await.unwrap();
    assert_eq!(outcome, AnnounceOutcome::Completed);
}

#[tokio::test]
async fn cancel_while_generating_caches_but_plays_nothing() {
    let h = harness(operator(1)).await;
    h.backend.delay_ms.store(100, Ordering::SeqCst);

    let task = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move { orchestrator.trigger("d1", TriggerKind::Manual).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(h.orchestrator.cancel("d1"));
    assert!(!h.orchestrator.is_active("d1"));
    assert!(!h.orchestrator.cancel("d1"));

    assert_eq!(task.await.unwrap().unwrap(), AnnounceOutcome::Cancelled);
    assert!(played(&h).is_empty());
    assert_eq!(h.remote.len(), 3);

    h.backend.delay_ms.store(0, Ordering::SeqCst);
    let outcome = h.orchestrator.trigger("d1", TriggerKind::Manual).await.unwrap();
    assert_eq!(outcome, AnnounceOutcome::Completed);
    assert_eq!(h.backend.calls.load(Ordering::SeqCst), 3);
    assert_eq!(played(&h), vec!["english", "khmer", "chinese"]);
}

#[tokio::test]
async fn cancel_while_playing_stops_the_rest() {
    let h = harness(operator(3)).await;
    h.sink.delay_ms.store(50, Ordering::SeqCst);

    let task = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move { orchestrator.trigger("d1", TriggerKind::Manual).await })
    };
    tokio::time::sleep(Duration::from_millis(75)).await;
    assert_eq!(h.orchestrator.progress("d1").unwrap().phase, Phase::Playing);

    assert!(h.orchestrator.cancel("d1"));
    assert_eq!(task.await.unwrap().unwrap(), AnnounceOutcome::Cancelled);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(played(&h).len() < 9);
}

#[tokio::test]
async fn cancelling_a_generating_departure_leaves_others_playing() {
    let h = harness(operator(1)).await;
    h.sink.delay_ms.store(60, Ordering::SeqCst);

    let playing = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move { orchestrator.trigger("d1", TriggerKind::Manual).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(h.orchestrator.progress("d1").unwrap().phase, Phase::Playing);

    h.backend.delay_ms.store(200, Ordering::SeqCst);
    let generating = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move { orchestrator.trigger("d2", TriggerKind::Manual).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.orchestrator.progress("d2").unwrap().phase, Phase::Generating);

    assert!(h.orchestrator.cancel("d2"));
    assert_eq!(generating.await.unwrap().unwrap(), AnnounceOutcome::Cancelled);
    assert_eq!(playing.await.unwrap().unwrap(), AnnounceOutcome::Completed);

    // Every d1 clip started exactly once: nothing was cut off and replayed.
    assert_eq!(h.sink.started.lock().unwrap().len(), 3);
    assert_eq!(played(&h), vec!["english", "khmer", "chinese"]);
}

#[tokio::test]
async fn cached_audio_skips_synthesis() {
    let h = harness(operator(1)).await;

    h.orchestrator.trigger("d1", TriggerKind::Manual).await.unwrap();
    h.orchestrator.trigger("d1", TriggerKind::Manual).await.unwrap();

    assert_eq!(h.backend.calls.load(Ordering::SeqCst), 3);
    assert_eq!(played(&h).len(), 6);
}

#[tokio::test]
async fn settings_change_clears_both_tiers() {
    let h = harness(operator(1)).await;
    h.orchestrator.trigger("d1", TriggerKind::Manual).await.unwrap();
    assert_eq!(h.remote.len(), 3);

    let removed = h.orchestrator.settings_changed("larryta").await;
    assert_eq!(removed, 6);
    assert!(h.remote.is_empty());
    assert_eq!(std::fs::read_dir(&h.local.dir).unwrap().count(), 0);

    h.orchestrator.trigger("d1", TriggerKind::Manual).await.unwrap();
    assert_eq!(h.backend.calls.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn unknown_departure_is_an_error() {
    let h = harness(operator(1)).await;
    assert!(h.orchestrator.trigger("missing", TriggerKind::Manual).await.is_err());
    assert!(!h.orchestrator.is_active("missing"));
}
