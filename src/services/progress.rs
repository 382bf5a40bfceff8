//! Progress notification channel.
//!
//! `ProgressPublisher` is the capability the orchestrators are handed:
//! `NatsProgressPublisher` in production, `LogProgressPublisher` when no
//! transport is wanted, `FakeProgressPublisher` in tests.
//!
//! Delivery is fire-and-forget. Use [`notify`] from business code so a
//! failed publish is logged and never reaches the caller.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::types::{ProgressEvent, ProgressKind};

// =============================================================================
// Core trait
// =============================================================================

#[async_trait]
pub trait ProgressPublisher: Send + Sync {
    async fn publish(&self, uid: &str, kind: ProgressKind, progress: u8) -> Result<()>;
}

/// Publish and swallow delivery errors
pub async fn notify(publisher: &dyn ProgressPublisher, uid: &str, kind: ProgressKind, progress: u8) {
    if let Err(e) = publisher.publish(uid, kind, progress).await {
        warn!(uid, event = kind.event_name(), progress, "Failed to publish progress: {}", e);
    }
}

/// `floor(done / total * 100)`
pub fn floor_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}

/// `round(done / total * 100)`
pub fn round_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) as f64 / total as f64) * 100.0).round() as u8
}

/// Subject for a user's progress channel. Characters NATS treats as token
/// separators or wildcards are replaced.
pub fn progress_subject(prefix: &str, uid: &str, kind: ProgressKind) -> String {
    let topic: String = uid
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' | ' ' => '_',
            c => c,
        })
        .collect();
    format!("{}.{}.{}", prefix, topic, kind.event_name())
}

// =============================================================================
// NatsProgressPublisher
// =============================================================================

pub struct NatsProgressPublisher {
    client: async_nats::Client,
    prefix: String,
}

impl NatsProgressPublisher {
    pub fn new(client: async_nats::Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl ProgressPublisher for NatsProgressPublisher {
    async fn publish(&self, uid: &str, kind: ProgressKind, progress: u8) -> Result<()> {
        let subject = progress_subject(&self.prefix, uid, kind);
        let event = ProgressEvent {
            uid: uid.to_string(),
            progress,
        };
        self.client
            .publish(subject, serde_json::to_vec(&event)?.into())
            .await?;
        Ok(())
    }
}

// =============================================================================
// LogProgressPublisher
// =============================================================================

pub struct LogProgressPublisher;

#[async_trait]
impl ProgressPublisher for LogProgressPublisher {
    async fn publish(&self, uid: &str, kind: ProgressKind, progress: u8) -> Result<()> {
        debug!(uid, event = kind.event_name(), progress, "[LogProgressPublisher] progress");
        Ok(())
    }
}

// =============================================================================
// FakeProgressPublisher
// =============================================================================

/// Records published events for assertions in tests
#[derive(Default)]
pub struct FakeProgressPublisher {
    events: Mutex<Vec<(String, ProgressKind, u8)>>,
    fail: bool,
}

impl FakeProgressPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records nothing and fails every publish
    pub fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn events(&self) -> Vec<(String, ProgressKind, u8)> {
        self.events.lock().clone()
    }

    /// Progress values in publish order
    pub fn values(&self) -> Vec<u8> {
        self.events.lock().iter().map(|(_, _, p)| *p).collect()
    }
}

#[async_trait]
impl ProgressPublisher for FakeProgressPublisher {
    async fn publish(&self, uid: &str, kind: ProgressKind, progress: u8) -> Result<()> {
        if self.fail {
            anyhow::bail!("progress transport unavailable");
        }
        self.events.lock().push((uid.to_string(), kind, progress));
        Ok(())
    }
}
