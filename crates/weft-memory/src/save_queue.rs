//! Debounced, per-conversation serialized writes
//!
//! Every conversation key owns a chain of writes: a new write starts only
//! after the previous one for the same key has finished, successfully or
//! not. Different keys write concurrently.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::{sync::oneshot, task::AbortHandle};
use tracing::{debug, error, warn};

use crate::{
    error::{Error, Result},
    message_list::MessageList,
    store::{ConversationKey, MessageStore, StorageFormat},
};

/// A message list shared between a session and the scheduler
pub type SharedMessageList = Arc<Mutex<MessageList>>;

/// Scheduling knobs
#[derive(Debug, Clone)]
pub struct SaveConfig {
    /// Quiet period before a batched write fires
    pub debounce: Duration,
    /// Unsaved turns older than this are written without waiting
    pub max_staleness: Duration,
    pub format: StorageFormat,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(100),
            max_staleness: Duration::from_millis(1000),
            format: StorageFormat::Canonical,
        }
    }
}

type ChainTail = Shared<BoxFuture<'static, ()>>;

struct Inner {
    store: Arc<dyn MessageStore>,
    config: SaveConfig,
    chains: Mutex<HashMap<ConversationKey, ChainTail>>,
    /// Pending debounce timer per key, tagged with a generation
    timers: Mutex<HashMap<ConversationKey, (u64, AbortHandle)>>,
    generation: AtomicU64,
}

/// Persists message lists with bounded latency and one writer per key.
///
/// Cloning is cheap; clones share timers and chains.
#[derive(Clone)]
pub struct SaveScheduler {
    inner: Arc<Inner>,
}

impl SaveScheduler {
    pub fn new(store: Arc<dyn MessageStore>, config: SaveConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                chains: Mutex::new(HashMap::new()),
                timers: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &SaveConfig {
        &self.inner.config
    }

    /// Schedule a write for `key`.
    ///
    /// If the oldest unsaved turn is past the staleness ceiling the write
    /// happens now and its outcome is returned. Otherwise the debounce timer
    /// is (re)started and this returns immediately.
    pub async fn batch_messages(&self, list: &SharedMessageList, key: &ConversationKey) -> Result<()> {
        let Some(earliest) = list.lock().earliest_unsaved_timestamp() else {
            return Ok(());
        };

        let age = (Utc::now() - earliest).to_std().unwrap_or_default();
        if age > self.inner.config.max_staleness {
            debug!(key = %key, age_ms = age.as_millis() as u64, "Unsaved turns are stale, writing now");
            self.flush_messages(list, key).await?;
            return Ok(());
        }

        self.restart_debounce(list, key);
        Ok(())
    }

    /// Cancel any pending timer for `key` and write now.
    ///
    /// Returns the number of turns written; zero when nothing was unsaved.
    pub async fn flush_messages(&self, list: &SharedMessageList, key: &ConversationKey) -> Result<usize> {
        self.clear_debounce(key);
        self.enqueue(Arc::clone(list), key.clone()).await
    }

    /// Cancel the pending timer for `key`. Writes already queued still run.
    pub fn clear_debounce(&self, key: &ConversationKey) {
        if let Some((_, timer)) = self.inner.timers.lock().remove(key) {
            timer.abort();
        }
    }

    fn restart_debounce(&self, list: &SharedMessageList, key: &ConversationKey) {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let delay = self.inner.config.debounce;
        let scheduler = self.clone();
        let list = Arc::clone(list);
        let timer_key = key.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.release_timer(&timer_key, generation);
            if let Err(e) = scheduler.enqueue(list, timer_key.clone()).await {
                error!(key = %timer_key, error = %e, "Debounced write failed");
            }
        });

        let previous = self
            .inner
            .timers
            .lock()
            .insert(key.clone(), (generation, task.abort_handle()));
        if let Some((_, previous)) = previous {
            previous.abort();
        }
    }

    /// Forget a timer that has fired, unless a newer one replaced it
    fn release_timer(&self, key: &ConversationKey, generation: u64) {
        let mut timers = self.inner.timers.lock();
        if timers.get(key).is_some_and(|(g, _)| *g == generation) {
            timers.remove(key);
        }
    }

    /// Append a write to the key's chain and wait for its outcome.
    ///
    /// The write is spawned, so it runs even if the caller stops waiting.
    async fn enqueue(&self, list: SharedMessageList, key: ConversationKey) -> Result<usize> {
        let (tx, rx) = oneshot::channel();

        let tail = {
            let mut chains = self.inner.chains.lock();
            let previous = chains.get(&key).cloned();
            let inner = Arc::clone(&self.inner);
            let write_key = key.clone();

            let write = tokio::spawn(async move {
                if let Some(previous) = previous {
                    previous.await;
                }
                let outcome = inner.write(&list, &write_key).await;
                if tx.send(outcome).is_err() {
                    debug!(key = %write_key, "Write finished after its caller went away");
                }
            });

            let tail: ChainTail = async move {
                if let Err(e) = write.await {
                    warn!(error = %e, "Write task did not complete");
                }
            }
            .boxed()
            .shared();
            chains.insert(key.clone(), tail.clone());
            tail
        };

        let outcome = rx.await.map_err(|_| Error::WriteDropped);

        let mut chains = self.inner.chains.lock();
        if chains.get(&key).is_some_and(|t| t.ptr_eq(&tail)) {
            chains.remove(&key);
        }
        outcome?
    }
}

impl Inner {
    /// Drain then write; an empty drain writes nothing
    async fn write(&self, list: &SharedMessageList, key: &ConversationKey) -> Result<usize> {
        let turns = list.lock().drain_unsaved();
        if turns.is_empty() {
            debug!(key = %key, "Nothing to save");
            return Ok(0);
        }

        debug!(key = %key, count = turns.len(), "Saving turns");
        match self
            .store
            .save_messages(&turns, key, self.config.format)
            .await
        {
            Ok(()) => Ok(turns.len()),
            Err(e) => {
                warn!(key = %key, error = %e, "Write failed, keeping turns unsaved");
                list.lock()
                    .restore_unsaved(turns.iter().map(|t| t.id.as_str()));
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_list::MessageSource;
    use crate::store::{StoreError, Thread};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use weft_message::{MessageInput, Part, Role, Turn};

    /// Records every write; can be told to fail or to take time
    #[derive(Default)]
    struct RecordingStore {
        writes: Mutex<Vec<(ConversationKey, Vec<String>)>>,
        fail: AtomicBool,
        delay: Option<Duration>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl RecordingStore {
        fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Default::default()
            }
        }

        fn writes(&self) -> Vec<(ConversationKey, Vec<String>)> {
            self.writes.lock().clone()
        }
    }

    #[async_trait]
    impl MessageStore for RecordingStore {
        async fn save_messages(
            &self,
            turns: &[Turn],
            key: &ConversationKey,
            _format: StorageFormat,
        ) -> std::result::Result<(), StoreError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("disk full".into()));
            }
            self.writes.lock().push((
                key.clone(),
                turns.iter().map(|t| t.id.clone()).collect(),
            ));
            Ok(())
        }

        async fn load_messages(
            &self,
            _key: &ConversationKey,
        ) -> std::result::Result<Vec<MessageInput>, StoreError> {
            Ok(vec![])
        }

        async fn get_thread(&self, _thread_id: &str) -> std::result::Result<Option<Thread>, StoreError> {
            Ok(None)
        }

        async fn save_thread(&self, thread: Thread) -> std::result::Result<Thread, StoreError> {
            Ok(thread)
        }
    }

    fn setup(store: RecordingStore) -> (Arc<RecordingStore>, SaveScheduler) {
        let store = Arc::new(store);
        let scheduler = SaveScheduler::new(store.clone(), SaveConfig::default());
        (store, scheduler)
    }

    fn shared_list() -> SharedMessageList {
        Arc::new(Mutex::new(MessageList::new()))
    }

    fn add_user(list: &SharedMessageList, text: &str) {
        list.lock().add([text], MessageSource::User).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_batches_into_one_write() {
        let (store, scheduler) = setup(RecordingStore::default());
        let list = shared_list();
        let key = ConversationKey::new("t1", "r1");

        add_user(&list, "one");
        scheduler.batch_messages(&list, &key).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        add_user(&list, "two");
        scheduler.batch_messages(&list, &key).await.unwrap();
        assert!(store.writes().is_empty());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let writes = store.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1.len(), 2);
        assert!(!list.lock().has_unsaved());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_turns_write_immediately() {
        let (store, scheduler) = setup(RecordingStore::default());
        let list = shared_list();
        let key = ConversationKey::new("t1", "r1");

        let old = Turn::new(
            "old",
            Role::User,
            Utc::now() - chrono::Duration::seconds(5),
            vec![Part::text("waiting")],
        );
        list.lock().add([old], MessageSource::User).unwrap();

        scheduler.batch_messages(&list, &key).await.unwrap();
        assert_eq!(store.writes().len(), 1);
        assert_eq!(store.writes()[0].1, vec!["old".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_reports_count_and_skips_empty() {
        let (store, scheduler) = setup(RecordingStore::default());
        let list = shared_list();
        let key = ConversationKey::new("t1", "r1");

        add_user(&list, "one");
        add_user(&list, "two");
        assert_eq!(scheduler.flush_messages(&list, &key).await.unwrap(), 2);
        assert_eq!(scheduler.flush_messages(&list, &key).await.unwrap(), 0);
        assert_eq!(store.writes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_cancels_pending_timer() {
        let (store, scheduler) = setup(RecordingStore::default());
        let list = shared_list();
        let key = ConversationKey::new("t1", "r1");

        add_user(&list, "one");
        scheduler.batch_messages(&list, &key).await.unwrap();
        scheduler.flush_messages(&list, &key).await.unwrap();
        add_user(&list, "two");

        tokio::time::sleep(Duration::from_millis(500)).await;
        // The timer did not fire a second write for "two"
        assert_eq!(store.writes().len(), 1);
        assert!(list.lock().has_unsaved());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_debounce_drops_timer() {
        let (store, scheduler) = setup(RecordingStore::default());
        let list = shared_list();
        let key = ConversationKey::new("t1", "r1");

        add_user(&list, "one");
        scheduler.batch_messages(&list, &key).await.unwrap();
        scheduler.clear_debounce(&key);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(store.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_keeps_turns_and_chain_alive() {
        let (store, scheduler) = setup(RecordingStore::default());
        let list = shared_list();
        let key = ConversationKey::new("t1", "r1");

        add_user(&list, "one");
        store.fail.store(true, Ordering::SeqCst);
        let err = scheduler.flush_messages(&list, &key).await.unwrap_err();
        assert!(err.is_store());
        assert!(list.lock().has_unsaved());

        store.fail.store(false, Ordering::SeqCst);
        assert_eq!(scheduler.flush_messages(&list, &key).await.unwrap(), 1);
        assert!(!list.lock().has_unsaved());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_key_writes_never_overlap() {
        let (store, scheduler) = setup(RecordingStore::slow(Duration::from_millis(50)));
        let key = ConversationKey::new("t1", "r1");
        let a = shared_list();
        let b = shared_list();
        add_user(&a, "from a");
        add_user(&b, "from b");

        let (ra, rb) = tokio::join!(
            scheduler.flush_messages(&a, &key),
            scheduler.flush_messages(&b, &key)
        );
        assert_eq!(ra.unwrap(), 1);
        assert_eq!(rb.unwrap(), 1);
        assert_eq!(store.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(store.writes().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_keys_write_concurrently() {
        let (store, scheduler) = setup(RecordingStore::slow(Duration::from_millis(50)));
        let a = shared_list();
        let b = shared_list();
        add_user(&a, "from a");
        add_user(&b, "from b");

        let key_a = ConversationKey::new("t1", "r1");
        let key_b = ConversationKey::new("t2", "r1");
        let (ra, rb) = tokio::join!(
            scheduler.flush_messages(&a, &key_a),
            scheduler.flush_messages(&b, &key_b)
        );
        ra.unwrap();
        rb.unwrap();
        assert_eq!(store.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_entry_is_released() {
        let (_store, scheduler) = setup(RecordingStore::default());
        let list = shared_list();
        let key = ConversationKey::new("t1", "r1");
        add_user(&list, "one");
        scheduler.flush_messages(&list, &key).await.unwrap();
        assert!(scheduler.inner.chains.lock().is_empty());
    }
}
