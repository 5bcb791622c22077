// Integration tests for timeline properties
//
// Normalization, compression and scheduling driven directly, without a
// generation step: narration is attached by hand.

use castline_core::{
    memory::InMemoryCacheFactory, CacheOrigin, ClusterCompressor, CompressorConfig, DropReason,
    Event, FileCacheFactory, GenerationCache, GenerationCacheEntry, GenerationCacheFactory, Half,
    JoinSummarizer, Narration, NativeTimestamp, RawEvent, RoundTable, RoundTiming, Schedule,
    Scheduler, SchedulerConfig, SourceCategory, TimeNormalizer,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

const BOUNDARY: u32 = 13;
const TICKRATE: f64 = 64.0;

/// 24 rounds of 115 s with a 15 s gap between them on the match clock
fn full_match() -> RoundTable {
    RoundTable::new((1..=24).map(|round| RoundTiming {
        round_number: round,
        start_tick: (round as u64 - 1) * 130 * 64,
        duration_secs: 115.0,
    }))
}

fn event(category: SourceCategory, round: u32, t: NativeTimestamp, priority: i32, text: &str) -> Event {
    let mut event = Event::from_raw(
        category,
        RawEvent::new(format!("e_{}_{:?}", round, t), round, t, priority),
    );
    event.narration = Some(Narration::uniform(text));
    event
}

fn at(mut event: Event, canonical: f64) -> Event {
    event.canonical_time = Some(canonical);
    event
}

// ============================================================================
// Time normalization
// ============================================================================

#[test]
fn test_canonical_time_monotonic_within_each_half() {
    let normalizer = TimeNormalizer::new(&full_match(), BOUNDARY, TICKRATE);
    let mut events = Vec::new();
    for round in 1..=24 {
        for t in [0.0, 12.5, 60.0, 114.9] {
            events.push(event(SourceCategory::Kill, round, NativeTimestamp::Seconds(t), 6, "k"));
        }
    }
    normalizer.normalize(&mut events);

    for half in [Half::Upper, Half::Lower] {
        let times: Vec<f64> = events
            .iter()
            .filter(|e| e.half(BOUNDARY) == half)
            .map(|e| e.canonical_time.unwrap())
            .collect();
        assert_eq!(times.len(), 48);
        assert!(times.windows(2).all(|w| w[0] <= w[1]), "{:?} not monotonic", half);
    }
}

#[test]
fn test_tick_encoded_source_monotonic_across_missing_rounds() {
    // Rounds 5 and 17 were never recorded
    let table = RoundTable::new(full_match().iter().copied().filter(|r| r.round_number % 12 != 5));
    let normalizer = TimeNormalizer::new(&table, BOUNDARY, TICKRATE);

    let mut events = Vec::new();
    for round in 1..=24u64 {
        let round_start = (round - 1) * 130;
        for offset in [3, 40, 110] {
            let tick = (round_start + offset) * 64;
            events.push(event(SourceCategory::Utility, round as u32, NativeTimestamp::Ticks(tick), 4, "u"));
        }
    }
    normalizer.normalize(&mut events);

    for half in [Half::Upper, Half::Lower] {
        let times: Vec<f64> = events
            .iter()
            .filter(|e| e.half(BOUNDARY) == half)
            .map(|e| e.canonical_time.unwrap())
            .collect();
        assert_eq!(times.len(), 36);
        assert!(times.windows(2).all(|w| w[0] <= w[1]), "{:?} not monotonic: {:?}", half, times);
    }
}

#[test]
fn test_half_boundary_restarts_clock() {
    let normalizer = TimeNormalizer::new(&full_match(), BOUNDARY, TICKRATE);

    let late_upper = event(SourceCategory::Kill, 12, NativeTimestamp::Seconds(50.0), 6, "k");
    let early_lower = event(SourceCategory::Kill, 13, NativeTimestamp::Seconds(5.0), 6, "k");

    assert_eq!(normalizer.canonical_time(&late_upper), 11.0 * 115.0 + 50.0);
    assert_eq!(normalizer.canonical_time(&early_lower), 5.0);
}

#[test]
fn test_absolute_and_relative_encodings_agree() {
    let normalizer = TimeNormalizer::new(&full_match(), BOUNDARY, TICKRATE);

    // Round 3 starts 260 s into the match
    let kill = event(SourceCategory::Kill, 3, NativeTimestamp::Seconds(20.0), 6, "k");
    let economy = event(
        SourceCategory::Economy,
        3,
        NativeTimestamp::Ticks(280 * 64),
        6,
        "e",
    );
    assert_eq!(normalizer.canonical_time(&kill), normalizer.canonical_time(&economy));
}

// ============================================================================
// Cluster compression
// ============================================================================

#[tokio::test]
async fn test_cluster_size_is_capped() {
    let config = CompressorConfig::default();
    let summarizer = JoinSummarizer::new(&config);
    let compressor = ClusterCompressor::new(config, BOUNDARY);

    let events: Vec<Event> = [0.0, 1.0, 2.0, 3.0]
        .into_iter()
        .map(|t| {
            at(
                event(SourceCategory::Kill, 4, NativeTimestamp::Seconds(t), 6, &format!("kill at {}", t)),
                t,
            )
        })
        .collect();

    let compressed = compressor.compress(events, &summarizer).await;
    assert_eq!(compressed.len(), 2);
    assert_eq!(compressed[0].attribute("cluster_size"), Some("3"));
    assert_eq!(compressed[0].span_secs, 2.0);
    assert_eq!(compressed[1].canonical_time, Some(3.0));
    assert!(compressed[1].attribute("cluster_size").is_none());
}

#[tokio::test]
async fn test_clusters_stay_within_category() {
    let config = CompressorConfig::default();
    let summarizer = JoinSummarizer::new(&config);
    let compressor = ClusterCompressor::new(config, BOUNDARY);

    let events = vec![
        at(event(SourceCategory::Kill, 4, NativeTimestamp::Seconds(10.0), 6, "a"), 10.0),
        at(event(SourceCategory::Utility, 4, NativeTimestamp::Ticks(100), 4, "b"), 10.5),
        at(event(SourceCategory::Utility, 4, NativeTimestamp::Ticks(164), 4, "c"), 11.0),
    ];

    // Utility is not eligible by default and a single kill has nobody to merge with
    let compressed = compressor.compress(events.clone(), &summarizer).await;
    assert_eq!(compressed, events);
}

// ============================================================================
// Scheduling
// ============================================================================

#[test]
fn test_slots_never_overlap() {
    let mut rng = StdRng::seed_from_u64(7);
    let categories = [
        SourceCategory::Kill,
        SourceCategory::Utility,
        SourceCategory::Economy,
        SourceCategory::RoundSummary,
        SourceCategory::Tactical,
    ];

    let events: Vec<Event> = (0..300)
        .map(|i| {
            let category = categories[i % categories.len()];
            let round = rng.gen_range(1..=24);
            let t: f64 = rng.gen_range(0.0..1500.0);
            let text = "x".repeat(rng.gen_range(5..80));
            at(
                event(category, round, NativeTimestamp::Seconds(i as f64), rng.gen_range(0..10), &text),
                t,
            )
        })
        .collect();

    let scheduler = Scheduler::new(SchedulerConfig::default(), BOUNDARY);
    let schedule = scheduler.schedule(&events);

    schedule.validate().unwrap();
    for half in [&schedule.upper, &schedule.lower] {
        assert!(half.windows(2).all(|w| w[0].end_time <= w[1].start_time));
        assert!(half.iter().all(|slot| slot.end_time > slot.start_time));
    }
    assert_eq!(schedule.slot_count() + schedule.dropped.len(), events.len());
}

#[test]
fn test_high_priority_wins_contention() {
    let high = at(
        event(
            SourceCategory::Kill,
            2,
            NativeTimestamp::Seconds(1.0),
            8,
            "ZywOo opens the round with a deagle headshot",
        ),
        10.0,
    );
    let low = at(
        event(SourceCategory::Utility, 2, NativeTimestamp::Ticks(640), 3, "a smoke lands on B site"),
        10.0,
    );

    let scheduler = Scheduler::new(SchedulerConfig::default(), BOUNDARY);
    let schedule = scheduler.schedule(&[low.clone(), high.clone()]);

    assert_eq!(schedule.upper.len(), 1);
    assert_eq!(schedule.upper[0].fingerprint, high.fingerprint);
    assert_eq!(schedule.dropped.len(), 1);
    assert_eq!(schedule.dropped[0].fingerprint, low.fingerprint);
    assert_eq!(schedule.dropped[0].reason, DropReason::Contended);
}

#[test]
fn test_halves_are_scheduled_independently() {
    let upper = at(event(SourceCategory::Kill, 12, NativeTimestamp::Seconds(1.0), 6, "late first half kill"), 1300.0);
    let lower = at(event(SourceCategory::Kill, 13, NativeTimestamp::Seconds(1.0), 6, "pistol round kill"), 1.0);

    let schedule: Schedule = Scheduler::new(SchedulerConfig::default(), BOUNDARY).schedule(&[upper, lower]);
    assert_eq!(schedule.upper.len(), 1);
    assert_eq!(schedule.lower.len(), 1);
    assert_eq!(schedule.lower[0].start_time, 1.0);
}

// ============================================================================
// Cache factories
// ============================================================================

#[tokio::test]
async fn test_file_cache_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let narrated = event(SourceCategory::Kill, 5, NativeTimestamp::Seconds(3.0), 6, "ZywOo kills s1mple");

    {
        let cache = FileCacheFactory::new(dir.path()).open(SourceCategory::Kill).await.unwrap();
        let entry = GenerationCacheEntry::new(
            &narrated,
            narrated.narration.clone().unwrap(),
            CacheOrigin::Generated,
        );
        cache.append(entry).await.unwrap();
    }

    let reopened = FileCacheFactory::new(dir.path()).open(SourceCategory::Kill).await.unwrap();
    let entry = reopened.lookup(&narrated.fingerprint).await.unwrap();
    assert_eq!(entry.medium_text, "ZywOo kills s1mple");
}

#[tokio::test]
async fn test_memory_factory_shares_cache_per_category() {
    let factory = InMemoryCacheFactory::new();
    let narrated = event(SourceCategory::Utility, 2, NativeTimestamp::Ticks(900), 5, "smoke on A");

    let first = factory.open(SourceCategory::Utility).await.unwrap();
    first
        .append(GenerationCacheEntry::new(
            &narrated,
            narrated.narration.clone().unwrap(),
            CacheOrigin::Generated,
        ))
        .await
        .unwrap();

    let second = factory.open(SourceCategory::Utility).await.unwrap();
    assert!(second.lookup(&narrated.fingerprint).await.is_some());
    assert!(factory
        .open(SourceCategory::Kill)
        .await
        .unwrap()
        .lookup(&narrated.fingerprint)
        .await
        .is_none());
}
