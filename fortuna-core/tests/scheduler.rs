// SPDX-License-Identifier: MIT
//
// Fortuna Pool: Continuously Reseeded Entropy Accumulator
// Copyright (c) 2025 Fortuna Pool Contributors

//! End-to-end behavior of the pooled generator

use fortuna_core::{
    EntropySource, Error, GeneratorConfig, GeneratorState, MemoryStateStore, PersistentEventType,
    PooledEntropyGenerator, Priority, Result, StateCodec,
};
use futures::future::{self, BoxFuture};
use rand::RngCore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(10);

struct RandomSource {
    name: &'static str,
    bytes: usize,
}

impl EntropySource for RandomSource {
    fn name(&self) -> &str {
        self.name
    }

    fn get_entropy(&self, _priority: Priority) -> BoxFuture<'_, Result<Option<Vec<u8>>>> {
        let mut data = vec![0u8; self.bytes];
        rand::rngs::OsRng.fill_bytes(&mut data);
        Box::pin(future::ready(Ok(Some(data))))
    }
}

/// Never has anything to offer
struct NullSource;

impl EntropySource for NullSource {
    fn name(&self) -> &str {
        "Null"
    }

    fn get_entropy(&self, _priority: Priority) -> BoxFuture<'_, Result<Option<Vec<u8>>>> {
        Box::pin(future::ready(Ok(None)))
    }
}

struct FailingSource {
    calls: AtomicU64,
}

impl EntropySource for FailingSource {
    fn name(&self) -> &str {
        "Failing"
    }

    fn get_entropy(&self, _priority: Priority) -> BoxFuture<'_, Result<Option<Vec<u8>>>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Box::pin(future::ready(Err(Error::Source {
            source_name: "Failing".to_string(),
            message: "device unplugged".to_string(),
        })))
    }
}

/// Takes far longer than any poll budget
struct StuckSource;

impl EntropySource for StuckSource {
    fn name(&self) -> &str {
        "Stuck"
    }

    fn get_entropy(&self, _priority: Priority) -> BoxFuture<'_, Result<Option<Vec<u8>>>> {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Some(vec![1, 2, 3]))
        })
    }
}

fn random(name: &'static str, bytes: usize) -> Arc<dyn EntropySource> {
    Arc::new(RandomSource { name, bytes })
}

fn fast_config() -> GeneratorConfig {
    GeneratorConfig {
        linear_pool_count: 4,
        random_pool_count: 4,
        minimum_time_between_reseeds_ms: 10,
        poll_interval_high_ms: 5,
        poll_interval_normal_ms: 5,
        poll_interval_low_ms: 5,
        reseed_interval_high_ms: 20,
        reseed_interval_normal_ms: 20,
        reseed_interval_low_ms: 20,
        checkpoint_interval_ms: 0,
        ..GeneratorConfig::default()
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_null_source_does_not_stall_reseeding() {
    let generator = PooledEntropyGenerator::builder()
        .config(fast_config())
        .source(Arc::new(NullSource))
        .source(random("Good", 32))
        .build()
        .unwrap();

    tokio::time::timeout(WAIT, generator.start_and_wait_for_seed())
        .await
        .unwrap()
        .unwrap();

    wait_until(|| generator.reseed_count() >= 3).await;
    assert!(generator.metrics().snapshot().polls_empty > 0);
    generator.stop().await.unwrap();
}

#[tokio::test]
async fn test_failing_source_never_halts_scheduler() {
    let failing = Arc::new(FailingSource {
        calls: AtomicU64::new(0),
    });
    let generator = PooledEntropyGenerator::builder()
        .config(fast_config())
        .source(failing.clone())
        .source(random("Good", 32))
        .build()
        .unwrap();

    tokio::time::timeout(WAIT, generator.start_and_wait_for_seed())
        .await
        .unwrap()
        .unwrap();
    wait_until(|| failing.calls.load(Ordering::Relaxed) >= 5).await;

    assert!(generator.metrics().source_failures() >= 5);
    assert!(matches!(generator.state(), GeneratorState::Running(_)));
    assert_eq!(generator.random_bytes(64).unwrap().len(), 64);
    generator.stop().await.unwrap();
}

#[tokio::test]
async fn test_stuck_source_times_out_and_stop_is_prompt() {
    let config = GeneratorConfig {
        source_timeout_ms: 50,
        ..fast_config()
    };
    let generator = PooledEntropyGenerator::builder()
        .config(config)
        .source(Arc::new(StuckSource))
        .source(random("Good", 32))
        .build()
        .unwrap();

    tokio::time::timeout(WAIT, generator.start_and_wait_for_seed())
        .await
        .unwrap()
        .unwrap();
    wait_until(|| generator.metrics().source_failures() >= 1).await;

    tokio::time::timeout(Duration::from_secs(2), generator.stop())
        .await
        .expect("stop must cancel in-flight polls")
        .unwrap();
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let generator = Arc::new(
        PooledEntropyGenerator::builder()
            .config(fast_config())
            .source(random("Good", 32))
            .build()
            .unwrap(),
    );

    // Never started
    generator.stop().await.unwrap();

    generator.start_and_wait_for_seed().await.unwrap();
    let a = {
        let generator = Arc::clone(&generator);
        tokio::spawn(async move { generator.stop().await })
    };
    let b = {
        let generator = Arc::clone(&generator);
        tokio::spawn(async move { generator.stop().await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();
    generator.stop().await.unwrap();

    assert_eq!(generator.state(), GeneratorState::Stopped);
}

#[tokio::test]
async fn test_checkpoints_carry_event_tags() {
    let store = Arc::new(MemoryStateStore::new());
    let config = GeneratorConfig {
        checkpoint_interval_ms: 20,
        ..fast_config()
    };
    let generator = PooledEntropyGenerator::builder()
        .config(config)
        .source(random("Good", 32))
        .state_store(Arc::clone(&store))
        .build()
        .unwrap();

    generator.start_and_wait_for_seed().await.unwrap();
    wait_until(|| store.events().contains(&PersistentEventType::Periodic)).await;
    generator.stop().await.unwrap();

    let events = store.events();
    assert!(events.contains(&PersistentEventType::Reseed));
    assert_eq!(store.last_event(), Some(PersistentEventType::Stopping));
    assert!(generator.metrics().checkpoints_written() as usize >= events.len());

    let items = StateCodec::new().decode(&store.data()).unwrap();
    let namespaces: Vec<&str> = items.namespaces().collect();
    assert!(namespaces.contains(&"PooledGenerator"));
    assert!(namespaces.contains(&"EntropyAccumulator"));
    assert_eq!(
        items.get_text("PooledGenerator", "GeneratorId").unwrap(),
        Some(generator.id().to_string())
    );
}

#[tokio::test]
async fn test_restart_restores_accumulator_counters() {
    let store = Arc::new(MemoryStateStore::new());
    let first = PooledEntropyGenerator::builder()
        .config(fast_config())
        .source(random("Good", 32))
        .state_store(Arc::clone(&store))
        .build()
        .unwrap();
    first.start_and_wait_for_seed().await.unwrap();
    wait_until(|| first.reseed_count() >= 3).await;
    first.stop().await.unwrap();

    let saved = StateCodec::new().decode(&store.data()).unwrap();
    let persisted = saved
        .get_u64("EntropyAccumulator", "ReseedCount")
        .unwrap()
        .unwrap();
    assert!(persisted >= 3);

    let restored_store = Arc::new(MemoryStateStore::with_data(store.data()));
    let second = PooledEntropyGenerator::builder()
        .config(fast_config())
        .source(random("Good", 32))
        .state_store(restored_store)
        .build()
        .unwrap();
    second.start().await.unwrap();
    assert!(second.accumulator_stats().reseed_count >= persisted);
    second.wait_for_seed().await.unwrap();
    second.stop().await.unwrap();
}

#[tokio::test]
async fn test_corrupt_checkpoint_does_not_block_start() {
    let store = Arc::new(MemoryStateStore::with_data(
        b"FRTNPOOL\t1\tnot-a-checksum\t1\ngarbage\n".to_vec(),
    ));
    let generator = PooledEntropyGenerator::builder()
        .config(fast_config())
        .source(random("Good", 32))
        .state_store(store)
        .build()
        .unwrap();

    tokio::time::timeout(WAIT, generator.start_and_wait_for_seed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(generator.accumulator_stats().linear_pool_count, 4);
    generator.stop().await.unwrap();
}

#[tokio::test]
async fn test_priority_demotes_to_low_after_reseeds() {
    let config = GeneratorConfig {
        reseed_count_before_switch_to_low_priority: 2,
        ..fast_config()
    };
    let generator = PooledEntropyGenerator::builder()
        .config(config)
        .source(random("Good", 32))
        .build()
        .unwrap();

    generator.start_and_wait_for_seed().await.unwrap();
    wait_until(|| generator.priority() == Priority::Low).await;
    assert_eq!(generator.state(), GeneratorState::Running(Priority::Low));

    generator.request_reseed();
    assert_eq!(generator.priority(), Priority::High);
    let before = generator.reseed_count();
    wait_until(|| generator.reseed_count() > before).await;
    generator.stop().await.unwrap();
}

#[tokio::test]
async fn test_idle_time_demotes_to_low() {
    let config = GeneratorConfig {
        time_before_switch_to_low_priority_ms: 50,
        ..fast_config()
    };
    let generator = PooledEntropyGenerator::builder()
        .config(config)
        .source(Arc::new(NullSource))
        .build()
        .unwrap();

    generator.start().await.unwrap();
    assert_eq!(generator.priority(), Priority::Normal);
    wait_until(|| generator.priority() == Priority::Low).await;
    assert!(!generator.is_seeded());
    generator.stop().await.unwrap();
}

#[tokio::test]
async fn test_output_volume_forces_reseed() {
    let hour = 60 * 60 * 1000;
    let config = GeneratorConfig {
        maximum_bytes_generated_before_reseed: 4096,
        entropy_to_reseed_normal: u64::MAX,
        entropy_to_reseed_low: u64::MAX,
        reseed_interval_normal_ms: hour,
        reseed_interval_low_ms: hour,
        ..fast_config()
    };
    let generator = PooledEntropyGenerator::builder()
        .config(config)
        .source(random("Good", 32))
        .build()
        .unwrap();

    generator.start_and_wait_for_seed().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = generator.reseed_count();

    let mut sink = vec![0u8; 8192];
    generator.fill_bytes(&mut sink).unwrap();
    wait_until(|| generator.reseed_count() > settled).await;
    generator.stop().await.unwrap();
}

#[tokio::test]
async fn test_sources_added_while_running_are_polled() {
    let generator = PooledEntropyGenerator::builder()
        .config(fast_config())
        .source(Arc::new(NullSource))
        .build()
        .unwrap();
    generator.start().await.unwrap();
    assert!(!generator.is_seeded());

    generator.add_source(random("Late", 32)).unwrap();
    tokio::time::timeout(WAIT, generator.wait_for_seed())
        .await
        .unwrap()
        .unwrap();
    generator.stop().await.unwrap();
}

#[tokio::test]
async fn test_flooding_source_is_held_to_reseed_floor() {
    let floor_ms = 50;
    let config = GeneratorConfig {
        minimum_time_between_reseeds_ms: floor_ms,
        poll_interval_high_ms: 1,
        poll_interval_normal_ms: 1,
        poll_interval_low_ms: 1,
        reseed_interval_high_ms: floor_ms,
        reseed_interval_normal_ms: floor_ms,
        reseed_interval_low_ms: floor_ms,
        entropy_to_reseed_high: 1,
        entropy_to_reseed_normal: 1,
        entropy_to_reseed_low: 1,
        ..fast_config()
    };
    let generator = PooledEntropyGenerator::builder()
        .config(config)
        .source(random("Flood", 8192))
        .build()
        .unwrap();

    let begin = Instant::now();
    generator.start_and_wait_for_seed().await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    let count = generator.reseed_count();
    let elapsed_ms = begin.elapsed().as_millis() as u64;
    generator.stop().await.unwrap();

    assert!(count >= 3, "only {} reseeds", count);
    assert!(
        count <= elapsed_ms / floor_ms + 1,
        "{} reseeds in {} ms exceeds one per {} ms",
        count,
        elapsed_ms,
        floor_ms
    );
}
