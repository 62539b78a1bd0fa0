// src/stream/mod.rs
// Resumable outward streams. A turn's producer appends merged events under a
// stream id; any number of consumers attach with a cursor, replay buffered
// frames, and then follow live. When resumability is disabled the registry
// degrades to a pass-through channel with a single consumer and no replay.
// The producer and merger never branch on which registry is active.

use async_trait::async_trait;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify, RwLock};
use tokio_stream::wrappers::ReceiverStream;

use crate::chat::types::ChatEvent;

pub type EventStream = Pin<Box<dyn Stream<Item = ChatEvent> + Send>>;

/// Write side of one stream. Held only by the turn's producer.
#[async_trait]
pub trait StreamSink: Send + Sync {
    async fn append(&self, event: ChatEvent);
}

/// Stream registry: producers open, consumers attach.
#[async_trait]
pub trait StreamRegistry: Send + Sync {
    /// Create the log for a new stream id and return its write handle
    async fn open(&self, stream_id: &str) -> Arc<dyn StreamSink>;

    /// Attach a consumer at a frame cursor. Returns None if the stream id is
    /// unknown (expired, never existed, or already consumed where the
    /// backing mode only supports one consumer).
    async fn attach(&self, stream_id: &str, cursor: usize) -> Option<EventStream>;
}

// ============================================================================
// In-memory resumable registry
// ============================================================================

struct StreamEntry {
    frames: RwLock<Vec<ChatEvent>>,
    terminal: AtomicBool,
    notify: Notify,
    last_touch: RwLock<Instant>,
}

impl StreamEntry {
    fn new() -> Self {
        Self {
            frames: RwLock::new(Vec::new()),
            terminal: AtomicBool::new(false),
            notify: Notify::new(),
            last_touch: RwLock::new(Instant::now()),
        }
    }
}

struct EntrySink {
    entry: Arc<StreamEntry>,
}

#[async_trait]
impl StreamSink for EntrySink {
    async fn append(&self, event: ChatEvent) {
        let terminal = event.is_terminal();
        {
            let mut frames = self.entry.frames.write().await;
            frames.push(event);
        }
        *self.entry.last_touch.write().await = Instant::now();
        if terminal {
            self.entry.terminal.store(true, Ordering::SeqCst);
        }
        self.entry.notify.notify_waiters();
    }
}

/// Frame-log registry keeping every live stream in process memory.
///
/// Entries are swept once terminal and idle past the configured timeout, so
/// a client has that window to reconnect and replay.
pub struct InMemoryStreamRegistry {
    entries: RwLock<HashMap<String, Arc<StreamEntry>>>,
    idle_timeout: Duration,
}

impl InMemoryStreamRegistry {
    pub fn new(idle_timeout_secs: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            idle_timeout: Duration::from_secs(idle_timeout_secs),
        }
    }

    /// Remove entries that reached a terminal state and have been idle past
    /// the timeout. Returns the number removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();
        {
            let entries = self.entries.read().await;
            for (id, entry) in entries.iter() {
                if !entry.terminal.load(Ordering::SeqCst) {
                    continue;
                }
                let touched = *entry.last_touch.read().await;
                if now.duration_since(touched) >= self.idle_timeout {
                    expired.push(id.clone());
                }
            }
        }

        if expired.is_empty() {
            return 0;
        }

        let mut entries = self.entries.write().await;
        for id in &expired {
            entries.remove(id);
        }
        tracing::debug!(removed = expired.len(), "Swept expired streams");
        expired.len()
    }

    /// Spawn the periodic sweeper for this registry
    pub fn spawn_sweeper(self: &Arc<Self>) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                registry.sweep().await;
            }
        });
    }
}

#[async_trait]
impl StreamRegistry for InMemoryStreamRegistry {
    async fn open(&self, stream_id: &str) -> Arc<dyn StreamSink> {
        let entry = Arc::new(StreamEntry::new());
        self.entries
            .write()
            .await
            .insert(stream_id.to_string(), entry.clone());
        Arc::new(EntrySink { entry })
    }

    async fn attach(&self, stream_id: &str, cursor: usize) -> Option<EventStream> {
        let entry = self.entries.read().await.get(stream_id).cloned()?;

        let stream = async_stream::stream! {
            let mut next = cursor;
            loop {
                // Arm the notification before reading so an append between
                // the read and the await is not missed
                let notified = entry.notify.notified();

                let (batch, terminal) = {
                    let frames = entry.frames.read().await;
                    let batch: Vec<ChatEvent> = frames.get(next..).unwrap_or(&[]).to_vec();
                    (batch, entry.terminal.load(Ordering::SeqCst))
                };

                next += batch.len();
                for event in batch {
                    yield event;
                }

                if terminal {
                    // A cursor at or past the end of the log is drained;
                    // overshooting cursors must still terminate
                    let drained = entry.frames.read().await.len() <= next;
                    if drained {
                        break;
                    }
                    continue;
                }

                notified.await;
            }
        };

        Some(Box::pin(stream))
    }
}

// ============================================================================
// Pass-through registry
// ============================================================================

struct ChannelSink {
    tx: mpsc::Sender<ChatEvent>,
}

#[async_trait]
impl StreamSink for ChannelSink {
    async fn append(&self, event: ChatEvent) {
        // With the single consumer gone there is nowhere to deliver; the
        // producer keeps running and the frames are dropped
        let _ = self.tx.send(event).await;
    }
}

/// Non-resumable degradation: one consumer, no replay. Attaching removes the
/// receive side, so a second attach for the same id returns None.
pub struct PassthroughRegistry {
    pending: RwLock<HashMap<String, mpsc::Receiver<ChatEvent>>>,
}

impl PassthroughRegistry {
    pub fn new() -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for PassthroughRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamRegistry for PassthroughRegistry {
    async fn open(&self, stream_id: &str) -> Arc<dyn StreamSink> {
        let (tx, rx) = mpsc::channel(256);
        self.pending
            .write()
            .await
            .insert(stream_id.to_string(), rx);
        Arc::new(ChannelSink { tx })
    }

    async fn attach(&self, stream_id: &str, cursor: usize) -> Option<EventStream> {
        if cursor != 0 {
            tracing::warn!(stream_id, cursor, "Pass-through streams cannot replay from a cursor");
            return None;
        }
        let rx = self.pending.write().await.remove(stream_id)?;
        Some(Box::pin(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn delta(s: &str) -> ChatEvent {
        ChatEvent::TextDelta { delta: s.into() }
    }

    #[tokio::test]
    async fn test_replay_then_live() {
        let registry = InMemoryStreamRegistry::new(300);
        let sink = registry.open("s1").await;

        sink.append(delta("a")).await;
        sink.append(delta("b")).await;

        let mut stream = registry.attach("s1", 0).await.unwrap();
        assert_eq!(stream.next().await, Some(delta("a")));
        assert_eq!(stream.next().await, Some(delta("b")));

        // Live continuation after replay
        sink.append(delta("c")).await;
        sink.append(ChatEvent::Done).await;
        assert_eq!(stream.next().await, Some(delta("c")));
        assert_eq!(stream.next().await, Some(ChatEvent::Done));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_attach_from_cursor_skips_replayed_frames() {
        let registry = InMemoryStreamRegistry::new(300);
        let sink = registry.open("s1").await;

        sink.append(delta("a")).await;
        sink.append(delta("b")).await;
        sink.append(ChatEvent::Done).await;

        let frames: Vec<ChatEvent> = registry.attach("s1", 2).await.unwrap().collect().await;
        assert_eq!(frames, vec![ChatEvent::Done]);
    }

    #[tokio::test]
    async fn test_reattach_concatenation_matches_uninterrupted() {
        let registry = InMemoryStreamRegistry::new(300);
        let sink = registry.open("s1").await;

        for s in ["a", "b", "c"] {
            sink.append(delta(s)).await;
        }

        // First attachment drops after two frames
        let mut first = registry.attach("s1", 0).await.unwrap();
        let mut observed = vec![first.next().await.unwrap(), first.next().await.unwrap()];
        drop(first);

        sink.append(delta("d")).await;
        sink.append(ChatEvent::Done).await;

        let rest: Vec<ChatEvent> = registry.attach("s1", observed.len()).await.unwrap().collect().await;
        observed.extend(rest);

        let uninterrupted: Vec<ChatEvent> = registry.attach("s1", 0).await.unwrap().collect().await;
        assert_eq!(observed, uninterrupted);
    }

    #[tokio::test]
    async fn test_attach_past_end_of_terminal_stream_ends() {
        let registry = InMemoryStreamRegistry::new(300);
        let sink = registry.open("s1").await;
        sink.append(delta("a")).await;
        sink.append(ChatEvent::Done).await;

        // Cursor beyond the log (stale client state): the attachment must
        // end instead of spinning
        let frames = tokio::time::timeout(
            Duration::from_secs(1),
            registry.attach("s1", 5).await.unwrap().collect::<Vec<_>>(),
        )
        .await
        .expect("attachment must terminate");
        assert!(frames.is_empty());
    }

    #[tokio::test]
    async fn test_attach_unknown_stream() {
        let registry = InMemoryStreamRegistry::new(300);
        assert!(registry.attach("missing", 0).await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_removes_idle_terminal_entries() {
        let registry = InMemoryStreamRegistry::new(0);
        let sink = registry.open("done").await;
        sink.append(ChatEvent::Done).await;
        let live_sink = registry.open("live").await;
        live_sink.append(delta("x")).await;

        // Zero idle timeout makes the terminal entry immediately sweepable
        assert_eq!(registry.sweep().await, 1);
        assert!(registry.attach("done", 0).await.is_none());
        assert!(registry.attach("live", 0).await.is_some());
    }

    #[tokio::test]
    async fn test_passthrough_single_consumer() {
        let registry = PassthroughRegistry::new();
        let sink = registry.open("s1").await;

        sink.append(delta("a")).await;
        sink.append(ChatEvent::Done).await;

        let mut stream = registry.attach("s1", 0).await.unwrap();
        assert_eq!(stream.next().await, Some(delta("a")));
        assert_eq!(stream.next().await, Some(ChatEvent::Done));

        // One consumer only
        assert!(registry.attach("s1", 0).await.is_none());
        // And no cursor replay
        let sink2 = registry.open("s2").await;
        drop(sink2);
        assert!(registry.attach("s2", 3).await.is_none());
    }
}
