//! Extraction cache with request coalescing
//!
//! One slot per `(video, timestamp, mode)`. The first caller for a key spawns
//! the extraction on its own task and every caller, first included, waits on
//! a `watch` channel for the outcome. Later callers for the same key join the
//! existing channel instead of starting another extraction, and a caller that
//! gives up does not cancel the task.
//!
//! The map lock is only taken to look up or update a slot, never across an
//! extraction, so unrelated keys run in parallel.
//!
//! Successful results stay until their video is invalidated or, with a
//! capacity configured, until they are the least recently used. Without a
//! capacity the cache grows with every distinct key requested for the
//! current videos.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::error::FrameError;
use crate::extractor::{ExtractMode, FramePath};
use crate::metrics::Metrics;
use crate::timestamp::Timestamp;
use crate::workspace::VideoId;

pub type Frames = Arc<Vec<FramePath>>;
pub type Outcome = Result<Frames, FrameError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameKey {
    pub video: VideoId,
    pub timestamp: Timestamp,
    pub mode: ExtractMode,
}

enum Slot {
    InFlight {
        ticket: u64,
        rx: watch::Receiver<Option<Outcome>>,
    },
    Ready {
        frames: Frames,
        last_used: u64,
    },
}

#[derive(Default)]
struct Slots {
    map: HashMap<FrameKey, Slot>,
    /// Monotonic counter for LRU ordering and in-flight tickets.
    clock: u64,
}

impl Slots {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_over(&mut self, capacity: usize) -> usize {
        let mut evicted = 0;
        loop {
            let ready = self.map.values().filter(|s| matches!(s, Slot::Ready { .. })).count();
            if ready <= capacity {
                return evicted;
            }
            let oldest = self
                .map
                .iter()
                .filter_map(|(key, slot)| match slot {
                    Slot::Ready { last_used, .. } => Some((*last_used, *key)),
                    Slot::InFlight { .. } => None,
                })
                .min_by_key(|(last_used, _)| *last_used)
                .map(|(_, key)| key);
            match oldest {
                Some(key) => {
                    self.map.remove(&key);
                    evicted += 1;
                }
                None => return evicted,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub ready: usize,
    pub in_flight: usize,
}

#[derive(Clone)]
pub struct FrameCache {
    slots: Arc<Mutex<Slots>>,
    capacity: Option<usize>,
    metrics: Arc<Metrics>,
}

impl FrameCache {
    pub fn new(capacity: Option<usize>, metrics: Arc<Metrics>) -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots::default())),
            capacity,
            metrics,
        }
    }

    /// Return the frames for `key`, running `extract` only if no result is
    /// cached and none is in flight.
    ///
    /// `extract` is dropped unpolled when the key is already served.
    pub async fn get_or_extract<F>(&self, key: FrameKey, extract: F) -> Outcome
    where
        F: Future<Output = Result<Vec<FramePath>, FrameError>> + Send + 'static,
    {
        let mut rx = {
            let mut slots = self.slots.lock().await;
            let now = slots.tick();
            match slots.map.get_mut(&key) {
                Some(Slot::Ready { frames, last_used }) => {
                    *last_used = now;
                    self.metrics.record_cache_hit();
                    debug!(video = %key.video, timestamp = %key.timestamp, mode = ?key.mode, "Cache hit");
                    return Ok(Arc::clone(frames));
                }
                Some(Slot::InFlight { rx, .. }) => {
                    self.metrics.record_coalesced();
                    debug!(video = %key.video, timestamp = %key.timestamp, mode = ?key.mode, "Joining in-flight extraction");
                    rx.clone()
                }
                None => {
                    self.metrics.record_cache_miss();
                    let (tx, rx) = watch::channel(None);
                    slots.map.insert(key, Slot::InFlight { ticket: now, rx: rx.clone() });
                    self.spawn(key, now, tx, extract);
                    rx
                }
            }
        };

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            Err(FrameError::ExtractionFailed(
                "extraction task ended without a result".to_string(),
            ))
        })
    }

    fn spawn<F>(&self, key: FrameKey, ticket: u64, tx: watch::Sender<Option<Outcome>>, extract: F)
    where
        F: Future<Output = Result<Vec<FramePath>, FrameError>> + Send + 'static,
    {
        let slots = Arc::clone(&self.slots);
        let capacity = self.capacity;

        tokio::spawn(async move {
            let outcome: Outcome = extract.await.map(Arc::new);

            {
                let mut slots = slots.lock().await;
                let still_ours = matches!(
                    slots.map.get(&key),
                    Some(Slot::InFlight { ticket: t, .. }) if *t == ticket
                );
                if still_ours {
                    match &outcome {
                        Ok(frames) => {
                            let now = slots.tick();
                            slots.map.insert(
                                key,
                                Slot::Ready {
                                    frames: Arc::clone(frames),
                                    last_used: now,
                                },
                            );
                            if let Some(capacity) = capacity {
                                let evicted = slots.evict_over(capacity);
                                if evicted > 0 {
                                    debug!(evicted, capacity, "Evicted least recently used frames");
                                }
                            }
                        }
                        Err(e) => {
                            // failures are not cached; a retry extracts again
                            slots.map.remove(&key);
                            warn!(video = %key.video, timestamp = %key.timestamp, error = %e, "Extraction failed");
                        }
                    }
                }
            }

            // Nobody listening is fine; the result is cached for the next caller.
            let _ = tx.send(Some(outcome));
        });
    }

    /// Completed frames for `key`, without extracting or waiting.
    pub async fn peek(&self, key: &FrameKey) -> Option<Frames> {
        let slots = self.slots.lock().await;
        match slots.map.get(key) {
            Some(Slot::Ready { frames, .. }) => Some(Arc::clone(frames)),
            _ => None,
        }
    }

    /// Forget every entry for `video`. In-flight extractions still deliver to
    /// their waiters but are not cached.
    pub async fn invalidate_video(&self, video: VideoId) -> usize {
        let mut slots = self.slots.lock().await;
        let before = slots.map.len();
        slots.map.retain(|key, _| key.video != video);
        before - slots.map.len()
    }

    pub async fn stats(&self) -> CacheStats {
        let slots = self.slots.lock().await;
        let in_flight = slots
            .map
            .values()
            .filter(|s| matches!(s, Slot::InFlight { .. }))
            .count();
        CacheStats {
            ready: slots.map.len() - in_flight,
            in_flight,
        }
    }
}
