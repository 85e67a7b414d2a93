// SPDX-License-Identifier: MIT
//
// Fortuna Pool: Continuously Reseeded Entropy Accumulator
// Copyright (c) 2025 Fortuna Pool Contributors

//! Pooled entropy generator
//!
//! Owns the accumulator and the block generator, and runs one background task
//! that polls sources, reseeds, adjusts priority and writes checkpoints.
//!
//! ```text
//!            poll (priority-dependent interval)
//! ┌─────────┐ ─────────────> ┌─────────────┐  next_seed  ┌─────────────────┐
//! │ Sources │                │ Accumulator │ ──────────> │ Block generator │ ──> callers
//! └─────────┘                └─────────────┘             └─────────────────┘
//!                                   │ checkpoint (reseed / periodic / stopping)
//!                                   v
//!                            ┌─────────────┐
//!                            │ State store │
//!                            └─────────────┘
//! ```
//!
//! State machine: `Stopped -> Starting -> Running(priority) -> Stopping -> Stopped`.
//! A stopped generator has zeroed its key material and cannot be restarted.

use crate::accumulator::{AccumulatorStats, EntropyAccumulator, EntropyEvent};
use crate::config::GeneratorConfig;
use crate::generator::BlockGenerator;
use crate::metrics::GeneratorMetrics;
use crate::persist::{
    PersistentEventType, PersistentItemCollection, PersistentStateReader, PersistentStateWriter,
    ValueEncoding,
};
use crate::source::{EntropySource, Priority};
use crate::{Error, Result};
use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Persistent namespace for generator-level state
pub const NAMESPACE: &str = "PooledGenerator";

const CHILD_SEED_BYTES: usize = 64;

/// Externally visible lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    Stopped,
    Starting,
    Running(Priority),
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone)]
enum SeedStatus {
    Pending,
    Seeded,
    Stopped(String),
    Halted(Arc<Error>),
}

struct Control {
    phase: Phase,
    priority: Priority,
    priority_since: Instant,
    reseeds_at_priority: u64,
}

struct SourceSlot {
    source: Arc<dyn EntropySource>,
    last_polled: Mutex<Option<Instant>>,
}

impl SourceSlot {
    fn is_due(&self, priority: Priority, now: Instant) -> bool {
        match *self.last_polled.lock() {
            None => true,
            Some(last) => now.duration_since(last) >= self.source.min_interval(priority),
        }
    }
}

struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    id: Uuid,
    config: GeneratorConfig,
    sources: parking_lot::RwLock<Vec<Arc<SourceSlot>>>,
    accumulator: Mutex<EntropyAccumulator>,
    generator: Mutex<BlockGenerator>,
    control: Mutex<Control>,
    seed_status: watch::Sender<SeedStatus>,
    wake: Notify,
    reader: Option<Arc<dyn PersistentStateReader>>,
    writer: Option<Arc<dyn PersistentStateWriter>>,
    metrics: GeneratorMetrics,
    run: tokio::sync::Mutex<Option<RunHandle>>,
}

/// Builder for [`PooledEntropyGenerator`]
#[derive(Default)]
pub struct PooledGeneratorBuilder {
    config: GeneratorConfig,
    sources: Vec<Arc<dyn EntropySource>>,
    reader: Option<Arc<dyn PersistentStateReader>>,
    writer: Option<Arc<dyn PersistentStateWriter>>,
}

impl PooledGeneratorBuilder {
    pub fn config(mut self, config: GeneratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn source(mut self, source: Arc<dyn EntropySource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn sources(mut self, sources: impl IntoIterator<Item = Arc<dyn EntropySource>>) -> Self {
        self.sources.extend(sources);
        self
    }

    pub fn state_reader(mut self, reader: Arc<dyn PersistentStateReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn state_writer(mut self, writer: Arc<dyn PersistentStateWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Use one store for both restore and checkpoints
    pub fn state_store<S>(self, store: Arc<S>) -> Self
    where
        S: PersistentStateReader + PersistentStateWriter + 'static,
    {
        let reader: Arc<dyn PersistentStateReader> = store.clone();
        let writer: Arc<dyn PersistentStateWriter> = store;
        self.state_reader(reader).state_writer(writer)
    }

    pub fn build(self) -> Result<PooledEntropyGenerator> {
        self.config.validate()?;

        let mut slots: Vec<Arc<SourceSlot>> = Vec::with_capacity(self.sources.len());
        for source in self.sources {
            check_source_name(&slots, source.name())?;
            slots.push(Arc::new(SourceSlot {
                source,
                last_polled: Mutex::new(None),
            }));
        }

        let accumulator = EntropyAccumulator::with_system_rng(self.config.accumulator_config())?;
        let generator =
            BlockGenerator::new(self.config.primitive.build(), self.config.output_buffer_bytes)?;
        let (seed_status, _) = watch::channel(SeedStatus::Pending);

        Ok(PooledEntropyGenerator {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                sources: parking_lot::RwLock::new(slots),
                accumulator: Mutex::new(accumulator),
                generator: Mutex::new(generator),
                control: Mutex::new(Control {
                    phase: Phase::Stopped,
                    priority: Priority::Normal,
                    priority_since: Instant::now(),
                    reseeds_at_priority: 0,
                }),
                seed_status,
                wake: Notify::new(),
                reader: self.reader,
                writer: self.writer,
                metrics: GeneratorMetrics::new(),
                run: tokio::sync::Mutex::new(None),
                config: self.config,
            }),
        })
    }
}

fn check_source_name(slots: &[Arc<SourceSlot>], name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Config("Entropy source name must not be empty".to_string()));
    }
    if name == NAMESPACE || name == crate::accumulator::NAMESPACE {
        return Err(Error::Config(format!("Entropy source name '{}' is reserved", name)));
    }
    if slots.iter().any(|slot| slot.source.name() == name) {
        return Err(Error::Config(format!("Duplicate entropy source '{}'", name)));
    }
    Ok(())
}

/// Continuously reseeded generator fed by entropy sources
pub struct PooledEntropyGenerator {
    inner: Arc<Inner>,
}

impl PooledEntropyGenerator {
    pub fn builder() -> PooledGeneratorBuilder {
        PooledGeneratorBuilder::default()
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.inner.config
    }

    pub fn state(&self) -> GeneratorState {
        let control = self.inner.control.lock();
        match control.phase {
            Phase::Stopped => GeneratorState::Stopped,
            Phase::Starting => GeneratorState::Starting,
            Phase::Running => GeneratorState::Running(control.priority),
            Phase::Stopping => GeneratorState::Stopping,
        }
    }

    pub fn priority(&self) -> Priority {
        self.inner.control.lock().priority
    }

    pub fn is_seeded(&self) -> bool {
        matches!(*self.inner.seed_status.borrow(), SeedStatus::Seeded)
    }

    pub fn reseed_count(&self) -> u64 {
        self.inner.generator.lock().reseed_count()
    }

    pub fn metrics(&self) -> &GeneratorMetrics {
        &self.inner.metrics
    }

    pub fn accumulator_stats(&self) -> AccumulatorStats {
        self.inner.accumulator.lock().stats()
    }

    pub fn source_names(&self) -> Vec<String> {
        self.inner
            .sources
            .read()
            .iter()
            .map(|slot| slot.source.name().to_string())
            .collect()
    }

    /// Start polling at Normal priority; returns without waiting for a seed
    pub async fn start(&self) -> Result<()> {
        self.launch(Priority::Normal).await
    }

    /// Start polling at High priority and wait until the first reseed
    pub async fn start_and_wait_for_seed(&self) -> Result<()> {
        self.launch(Priority::High).await?;
        self.wait_for_seed().await
    }

    /// Resolve once the generator has been seeded, or with the fatal error
    pub async fn wait_for_seed(&self) -> Result<()> {
        let mut rx = self.inner.seed_status.subscribe();
        loop {
            let status = rx.borrow_and_update().clone();
            match status {
                SeedStatus::Seeded => return Ok(()),
                SeedStatus::Stopped(reason) => return Err(Error::Stopped(reason)),
                SeedStatus::Halted(cause) => return Err(Error::Halted(cause)),
                SeedStatus::Pending => {}
            }
            if rx.changed().await.is_err() {
                return Err(Error::Stopped("generator dropped".to_string()));
            }
        }
    }

    async fn launch(&self, priority: Priority) -> Result<()> {
        let mut run = self.inner.run.lock().await;
        if run.is_some() {
            debug!("Generator already started");
            return Ok(());
        }
        if self.inner.generator.lock().is_disposed() {
            return Err(Error::Disposed("PooledEntropyGenerator"));
        }
        if self.inner.sources.read().is_empty() {
            return Err(Error::Config("No entropy sources configured".to_string()));
        }

        self.inner.set_phase(Phase::Starting);
        self.inner.switch_priority(priority, "start");
        info!(
            generator = %self.inner.id,
            sources = ?self.source_names(),
            %priority,
            "Starting pooled generator"
        );

        self.inner.restore().await;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&self.inner).run(cancel.clone()));
        *run = Some(RunHandle { cancel, task });
        Ok(())
    }

    /// Stop polling, write a final checkpoint and zero all key material
    ///
    /// Safe to call any number of times; later calls return immediately.
    pub async fn stop(&self) -> Result<()> {
        let mut run = self.inner.run.lock().await;
        let Some(handle) = run.take() else {
            return Ok(());
        };

        self.inner.set_phase(Phase::Stopping);
        info!(generator = %self.inner.id, "Stopping pooled generator");

        handle.cancel.cancel();
        if let Err(e) = handle.task.await {
            warn!("Generator task ended abnormally: {}", e);
        }

        if let Err(e) = self.inner.checkpoint(PersistentEventType::Stopping).await {
            warn!("Final checkpoint failed: {}", e);
        }

        self.inner.seed_status.send_if_modified(|status| {
            if matches!(status, SeedStatus::Pending) {
                *status = SeedStatus::Stopped("stopped before first seed".to_string());
                true
            } else {
                false
            }
        });

        self.inner.accumulator.lock().dispose();
        self.inner.generator.lock().dispose();
        self.inner.set_phase(Phase::Stopped);
        info!(generator = %self.inner.id, "Pooled generator stopped");
        Ok(())
    }

    /// Fill `dest` from the current key; never waits on sources
    pub fn fill_bytes(&self, dest: &mut [u8]) -> Result<()> {
        let over_limit = {
            let mut generator = self.inner.generator.lock();
            generator.try_fill(dest)?;
            generator.bytes_since_reseed() >= self.inner.config.maximum_bytes_generated_before_reseed
        };
        self.inner.metrics.record_bytes_generated(dest.len());
        if over_limit {
            self.inner.wake.notify_one();
        }
        Ok(())
    }

    pub fn random_bytes(&self, count: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; count];
        self.fill_bytes(&mut out)?;
        Ok(out)
    }

    /// Independent generator keyed from this one's output
    pub fn create_child_generator(&self) -> Result<BlockGenerator> {
        let seed = zeroize::Zeroizing::new(self.random_bytes(CHILD_SEED_BYTES)?);
        let mut child = BlockGenerator::new(
            self.inner.config.primitive.build(),
            self.inner.config.output_buffer_bytes,
        )?;
        child.reseed(&seed)?;
        Ok(child)
    }

    /// Switch to High priority and wake the loop; a reseed follows once enough entropy arrives
    pub fn request_reseed(&self) {
        self.inner.switch_priority(Priority::High, "reseed requested");
        self.inner.wake.notify_one();
    }

    pub fn set_priority(&self, priority: Priority) {
        self.inner.switch_priority(priority, "caller request");
        self.inner.wake.notify_one();
    }

    /// Register another source; it is polled from the next cycle
    pub fn add_source(&self, source: Arc<dyn EntropySource>) -> Result<()> {
        let mut sources = self.inner.sources.write();
        check_source_name(&sources, source.name())?;
        info!(source = source.name(), "Entropy source added");
        sources.push(Arc::new(SourceSlot {
            source,
            last_polled: Mutex::new(None),
        }));
        drop(sources);
        self.inner.wake.notify_one();
        Ok(())
    }

    /// Write a checkpoint now, tagged as a manual event
    pub async fn checkpoint_now(&self) -> Result<()> {
        self.inner.checkpoint(PersistentEventType::Manual).await
    }
}

impl Drop for PooledEntropyGenerator {
    fn drop(&mut self) {
        if let Ok(run) = self.inner.run.try_lock() {
            if let Some(handle) = run.as_ref() {
                handle.cancel.cancel();
            }
        }
    }
}

impl std::fmt::Debug for PooledEntropyGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledEntropyGenerator")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("sources", &self.source_names())
            .finish()
    }
}

impl Inner {
    fn set_phase(&self, phase: Phase) {
        self.control.lock().phase = phase;
    }

    fn switch_priority(&self, priority: Priority, reason: &str) {
        let mut control = self.control.lock();
        if control.priority != priority {
            info!(from = %control.priority, to = %priority, reason, "Priority changed");
        }
        control.priority = priority;
        control.priority_since = Instant::now();
        control.reseeds_at_priority = 0;
    }

    /// Main run loop
    #[instrument(skip_all, fields(generator = %self.id))]
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let started = Instant::now();
        let mut last_reseed: Option<Instant> = None;
        let mut next_checkpoint = self.config.checkpoint_interval().map(|d| started + d);

        loop {
            let priority = self.control.lock().priority;
            let profile = self.config.profile(priority);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.poll_sources(priority) => {}
            }

            let now = Instant::now();
            if self.reseed_due(priority, started, last_reseed, now) {
                match self.reseed() {
                    Ok(()) => {
                        last_reseed = Some(now);
                        self.after_reseed();
                        if let Err(e) = self.checkpoint(PersistentEventType::Reseed).await {
                            warn!("Checkpoint after reseed failed: {}", e);
                        }
                    }
                    Err(e) => {
                        self.halt(e);
                        return;
                    }
                }
            }

            self.demote_if_idle(now);

            if let Some(due) = next_checkpoint {
                if now >= due {
                    if let Err(e) = self.checkpoint(PersistentEventType::Periodic).await {
                        warn!("Periodic checkpoint failed: {}", e);
                    }
                    next_checkpoint = self.config.checkpoint_interval().map(|d| now + d);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(profile.poll_interval) => {}
            }
        }

        debug!("Generator loop exited");
    }

    /// Poll every due source concurrently and feed the results to the accumulator
    #[instrument(skip(self))]
    async fn poll_sources(&self, priority: Priority) {
        let now = Instant::now();
        let due: Vec<Arc<SourceSlot>> = self
            .sources
            .read()
            .iter()
            .filter(|slot| slot.is_due(priority, now))
            .cloned()
            .collect();
        if due.is_empty() {
            return;
        }

        let limit = self.config.source_timeout();
        let polls = due.iter().map(|slot| async move {
            *slot.last_polled.lock() = Some(Instant::now());
            let result = match timeout(limit, slot.source.get_entropy(priority)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout),
            };
            (slot, result)
        });

        for (slot, result) in join_all(polls).await {
            let name = slot.source.name();
            match result {
                Ok(Some(data)) if !data.is_empty() => {
                    let len = data.len();
                    if let Err(e) = self.accumulator.lock().add(&EntropyEvent::new(data, name)) {
                        warn!(source = name, "Could not add entropy: {}", e);
                        continue;
                    }
                    self.metrics.record_poll(len);
                    debug!(source = name, bytes = len, "Collected entropy");
                }
                Ok(_) => {
                    self.metrics.record_empty_poll();
                    debug!(source = name, "No entropy available");
                }
                Err(e) => {
                    self.metrics.record_source_failure();
                    warn!(source = name, "Entropy source failed: {}", e);
                }
            }
        }
    }

    fn reseed_due(
        &self,
        priority: Priority,
        started: Instant,
        last_reseed: Option<Instant>,
        now: Instant,
    ) -> bool {
        let since = now.duration_since(last_reseed.unwrap_or(started));
        if last_reseed.is_some() && since < self.config.minimum_time_between_reseeds() {
            return false;
        }

        let profile = self.config.profile(priority);
        let pool_zero = self.accumulator.lock().pool_zero_entropy_bytes();
        if pool_zero >= profile.entropy_to_reseed {
            return true;
        }
        if pool_zero > 0 && since >= profile.reseed_interval {
            return true;
        }

        let generator = self.generator.lock();
        generator.is_seeded()
            && generator.bytes_since_reseed() >= self.config.maximum_bytes_generated_before_reseed
    }

    /// Publish a fatal error to seed waiters and leave the loop stopped
    fn halt(&self, e: Error) {
        error!("Reseed failed, generator halted: {}", e);
        self.seed_status.send_replace(SeedStatus::Halted(Arc::new(e)));
        self.set_phase(Phase::Stopped);
    }

    #[instrument(skip(self))]
    fn reseed(&self) -> Result<()> {
        let started = std::time::Instant::now();
        let (seed, accumulator_reseeds) = {
            let mut accumulator = self.accumulator.lock();
            (accumulator.next_seed()?, accumulator.reseed_count())
        };

        let generator_reseeds = {
            let mut generator = self.generator.lock();
            generator.reseed(&seed)?;
            generator.reseed_count()
        };

        self.metrics
            .record_reseed(started.elapsed().as_micros() as u64);
        info!(
            reseed_count = generator_reseeds,
            accumulator_reseed_count = accumulator_reseeds,
            seed_bytes = seed.len(),
            "Generator reseeded"
        );

        let first = self.seed_status.send_if_modified(|status| {
            if matches!(status, SeedStatus::Pending) {
                *status = SeedStatus::Seeded;
                true
            } else {
                false
            }
        });
        if first {
            self.set_phase(Phase::Running);
            info!("Generator seeded and running");
        }
        Ok(())
    }

    fn after_reseed(&self) {
        let (priority, reseeds) = {
            let mut control = self.control.lock();
            control.reseeds_at_priority += 1;
            (control.priority, control.reseeds_at_priority)
        };
        match priority {
            Priority::High => self.switch_priority(Priority::Normal, "reseed complete"),
            Priority::Normal
                if reseeds >= self.config.reseed_count_before_switch_to_low_priority =>
            {
                self.switch_priority(Priority::Low, "reseed count reached")
            }
            _ => {}
        }
    }

    fn demote_if_idle(&self, now: Instant) {
        let idle = {
            let control = self.control.lock();
            control.priority == Priority::Normal
                && now.duration_since(control.priority_since)
                    >= self.config.time_before_switch_to_low_priority()
        };
        if idle {
            self.switch_priority(Priority::Low, "idle timeout");
        }
    }

    fn capture_state(&self) -> Result<PersistentItemCollection> {
        let mut items = PersistentItemCollection::new();

        {
            let generator = self.generator.lock();
            items.set_text(NAMESPACE, "GeneratorId", &self.id.to_string())?;
            items.set_u64(NAMESPACE, "ReseedCount", generator.reseed_count())?;
            items.set(NAMESPACE, "Counter", ValueEncoding::Base64, generator.counter_bytes())?;
        }
        items.set_text(NAMESPACE, "CheckpointUtc", &Utc::now().to_rfc3339())?;

        self.accumulator.lock().write_state(&mut items)?;

        for slot in self.sources.read().iter() {
            let name = slot.source.name();
            if let Err(e) = slot.source.write_state(name, &mut items) {
                warn!(source = name, "Could not export source state: {}", e);
            }
        }
        Ok(items)
    }

    /// Best-effort checkpoint; a missing writer is not an error
    async fn checkpoint(&self, event: PersistentEventType) -> Result<()> {
        let Some(writer) = &self.writer else {
            return Ok(());
        };
        let items = self.capture_state()?;
        match writer.write(&items, event).await {
            Ok(()) => {
                self.metrics.record_checkpoint();
                debug!(%event, items = items.len(), "Checkpoint written");
                Ok(())
            }
            Err(e) => {
                self.metrics.record_checkpoint_failure();
                Err(e)
            }
        }
    }

    /// Import the last checkpoint, then discard pool zero's pending entropy
    async fn restore(&self) {
        if let Some(reader) = &self.reader {
            match reader.read().await {
                Ok(items) if items.is_empty() => debug!("No checkpoint to restore"),
                Ok(items) => self.apply_state(&items),
                Err(e) if e.is_corruption() => {
                    warn!("Checkpoint is corrupt, starting with fresh state: {}", e)
                }
                Err(e) => warn!("Could not read checkpoint, starting with fresh state: {}", e),
            }
        }

        if let Err(e) = self.accumulator.lock().reset_pool_zero() {
            warn!("Could not reset pool zero: {}", e);
        }
    }

    fn apply_state(&self, items: &PersistentItemCollection) {
        if let Ok(Some(previous)) = items.get_text(NAMESPACE, "GeneratorId") {
            info!(previous_generator = %previous, items = items.len(), "Restoring checkpoint");
        }

        match EntropyAccumulator::with_system_rng(self.config.accumulator_config()) {
            Ok(mut candidate) => match candidate.read_state(items) {
                Ok(pools_restored) => {
                    debug!(pools_restored, "Accumulator state restored");
                    *self.accumulator.lock() = candidate;
                }
                Err(e) => warn!("Accumulator state rejected: {}", e),
            },
            Err(e) => warn!("Could not prepare accumulator for restore: {}", e),
        }

        if let Some(counter) = items.get(NAMESPACE, "Counter") {
            if let Err(e) = self.generator.lock().restore_counter(&counter.value) {
                warn!("Counter state rejected: {}", e);
            }
        }

        for slot in self.sources.read().iter() {
            let name = slot.source.name();
            if let Err(e) = slot.source.read_state(name, items) {
                warn!(source = name, "Source state rejected: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryStateStore;
    use crate::source::AsyncHint;
    use futures::future::{self, BoxFuture};
    use std::time::Duration;

    struct FixedSource {
        name: &'static str,
        bytes: usize,
    }

    impl EntropySource for FixedSource {
        fn name(&self) -> &str {
            self.name
        }

        fn async_hint(&self) -> AsyncHint {
            AsyncHint::Never
        }

        fn get_entropy(&self, _priority: Priority) -> BoxFuture<'_, Result<Option<Vec<u8>>>> {
            let mut data = vec![0u8; self.bytes];
            rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut data);
            Box::pin(future::ready(Ok(Some(data))))
        }
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

    fn fixed(name: &'static str, bytes: usize) -> Arc<dyn EntropySource> {
        Arc::new(FixedSource { name, bytes })
    }

    #[test]
    fn test_duplicate_and_reserved_names_rejected() {
        let dup = PooledEntropyGenerator::builder()
            .source(fixed("A", 8))
            .source(fixed("A", 8))
            .build();
        assert!(matches!(dup, Err(Error::Config(_))));

        let reserved = PooledEntropyGenerator::builder()
            .source(fixed("EntropyAccumulator", 8))
            .build();
        assert!(matches!(reserved, Err(Error::Config(_))));
    }

    #[test]
    fn test_bytes_before_seed_fail() {
        let generator = PooledEntropyGenerator::builder()
            .source(fixed("A", 8))
            .build()
            .unwrap();
        assert_eq!(generator.state(), GeneratorState::Stopped);
        assert!(matches!(generator.random_bytes(4), Err(Error::NotSeeded)));
    }

    #[tokio::test]
    async fn test_start_without_sources_fails() {
        let generator = PooledEntropyGenerator::builder().build().unwrap();
        assert!(matches!(generator.start().await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_seed_then_serve() {
        let generator = PooledEntropyGenerator::builder()
            .config(fast_config())
            .source(fixed("A", 64))
            .build()
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), generator.start_and_wait_for_seed())
            .await
            .unwrap()
            .unwrap();
        assert!(generator.is_seeded());
        assert!(matches!(generator.state(), GeneratorState::Running(_)));

        let a = generator.random_bytes(32).unwrap();
        let b = generator.random_bytes(32).unwrap();
        assert_ne!(a, b);
        assert_eq!(generator.metrics().bytes_generated(), 64);

        let mut child = generator.create_child_generator().unwrap();
        assert!(child.is_seeded());
        assert_eq!(child.random_bytes(16).unwrap().len(), 16);

        generator.stop().await.unwrap();
        assert_eq!(generator.state(), GeneratorState::Stopped);
        assert!(matches!(generator.random_bytes(1), Err(Error::Disposed(_))));
        assert!(matches!(generator.start().await, Err(Error::Disposed(_))));
    }

    #[tokio::test]
    async fn test_stop_before_seed_fails_waiters() {
        let generator = Arc::new(
            PooledEntropyGenerator::builder()
                .config(fast_config())
                .source(fixed("Empty", 0))
                .build()
                .unwrap(),
        );
        generator.start().await.unwrap();

        let waiter = {
            let generator = Arc::clone(&generator);
            tokio::spawn(async move { generator.wait_for_seed().await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        generator.stop().await.unwrap();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(Error::Stopped(_))));
    }

    #[tokio::test]
    async fn test_manual_checkpoint_tagged() {
        let store = Arc::new(MemoryStateStore::new());
        let generator = PooledEntropyGenerator::builder()
            .config(fast_config())
            .source(fixed("A", 64))
            .state_store(Arc::clone(&store))
            .build()
            .unwrap();
        generator.start_and_wait_for_seed().await.unwrap();
        generator.checkpoint_now().await.unwrap();
        generator.stop().await.unwrap();

        let events = store.events();
        assert!(events.contains(&PersistentEventType::Manual));
        assert_eq!(store.last_event(), Some(PersistentEventType::Stopping));
    }

    #[test]
    fn test_add_source_checks_names() {
        let generator = PooledEntropyGenerator::builder()
            .source(fixed("A", 8))
            .build()
            .unwrap();
        generator.add_source(fixed("B", 8)).unwrap();
        assert!(generator.add_source(fixed("B", 8)).is_err());
        assert_eq!(generator.source_names(), vec!["A", "B"]);
    }

    fn idle(config: GeneratorConfig) -> PooledEntropyGenerator {
        PooledEntropyGenerator::builder()
            .config(config)
            .source(fixed("A", 8))
            .build()
            .unwrap()
    }

    /// Add `per_pool` bytes to every pool, starting at pool zero
    fn feed(generator: &PooledEntropyGenerator, per_pool: usize) {
        let stats = generator.accumulator_stats();
        let pools = stats.linear_pool_count + stats.random_pool_count;
        let data = vec![0x5Au8; pools * per_pool];
        generator
            .inner
            .accumulator
            .lock()
            .add(&EntropyEvent::new(data, "A"))
            .unwrap();
    }

    #[test]
    fn test_elapsed_time_alone_does_not_reseed() {
        let generator = idle(fast_config());
        let started = Instant::now();
        let hour_later = started + Duration::from_secs(3600);

        assert!(!generator.inner.reseed_due(Priority::Normal, started, None, hour_later));
        assert!(!generator
            .inner
            .reseed_due(Priority::Normal, started, Some(started), hour_later));

        // Below the threshold, but non-empty once the interval has passed
        feed(&generator, 16);
        assert!(!generator.inner.reseed_due(
            Priority::Normal,
            started,
            Some(started),
            started + Duration::from_millis(15)
        ));
        assert!(generator
            .inner
            .reseed_due(Priority::Normal, started, Some(started), hour_later));
    }

    #[test]
    fn test_threshold_waits_for_floor() {
        let generator = idle(fast_config());
        feed(&generator, 256);
        let started = Instant::now();

        // The first seed is never held back
        assert!(generator.inner.reseed_due(Priority::Normal, started, None, started));
        assert!(!generator.inner.reseed_due(
            Priority::Normal,
            started,
            Some(started),
            started + Duration::from_millis(5)
        ));
        assert!(generator.inner.reseed_due(
            Priority::Normal,
            started,
            Some(started),
            started + Duration::from_millis(10)
        ));
    }

    #[test]
    fn test_output_volume_waits_for_floor() {
        let config = GeneratorConfig {
            maximum_bytes_generated_before_reseed: 1024,
            ..fast_config()
        };
        let generator = idle(config);
        generator.inner.generator.lock().reseed(&[7u8; 32]).unwrap();
        generator.random_bytes(2048).unwrap();
        let started = Instant::now();

        assert_eq!(generator.inner.accumulator.lock().pool_zero_entropy_bytes(), 0);
        assert!(!generator.inner.reseed_due(
            Priority::Normal,
            started,
            Some(started),
            started + Duration::from_millis(5)
        ));
        assert!(generator.inner.reseed_due(
            Priority::Normal,
            started,
            Some(started),
            started + Duration::from_millis(10)
        ));
    }

    #[tokio::test]
    async fn test_fatal_reseed_error_reaches_waiters() {
        let generator = Arc::new(idle(fast_config()));
        let waiter = {
            let generator = Arc::clone(&generator);
            tokio::spawn(async move { generator.wait_for_seed().await })
        };

        generator.inner.accumulator.lock().dispose();
        let err = generator.inner.reseed().unwrap_err();
        assert!(matches!(err, Error::Disposed("EntropyAccumulator")));
        generator.inner.halt(err);

        match waiter.await.unwrap() {
            Err(Error::Halted(cause)) => {
                assert!(matches!(*cause, Error::Disposed("EntropyAccumulator")))
            }
            other => panic!("expected a halt, got {:?}", other),
        }
        assert_eq!(generator.state(), GeneratorState::Stopped);
        assert!(!generator.is_seeded());
        let again = generator.wait_for_seed().await.unwrap_err();
        assert!(matches!(again.halt_cause(), Some(Error::Disposed(_))));
    }

    #[test]
    fn test_set_priority() {
        let generator = PooledEntropyGenerator::builder()
            .source(fixed("A", 8))
            .build()
            .unwrap();
        generator.set_priority(Priority::Low);
        assert_eq!(generator.priority(), Priority::Low);
        generator.request_reseed();
        assert_eq!(generator.priority(), Priority::High);
    }
}
