//! Ordering Engine (spec.md §4.2).
//!
//! Tracks the circular 8-bit `seq` counter per `(group_id, edge_node_id)`,
//! buffers out-of-order arrivals, and flushes or requests rebirth when a gap
//! outlives the reorder timeout. Each key gets its own `Arc<Mutex<KeyState>>`
//! housed in an outer `RwLock<HashMap<..>>` — a get-or-create registry shape,
//! generalized so a slow key never blocks progress on another.
//!
//! `process` hands its synchronous results back to the caller as a return
//! value; only the asynchronous, timer-driven flush has no caller to
//! return to, so that path alone goes through the injected callbacks. This
//! keeps the Engine from holding a back-pointer to whatever drives it.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use sparkplug_host_protocol::Message;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::OrderingError;

type Key = (String, String);

/// Invoked when the reorder timeout fires with the gap still unfilled
/// (spec.md §4.2 "reorder timeout firing", step 3).
pub type RebirthCallback = Arc<dyn Fn(String, String) + Send + Sync>;

/// Invoked with the messages a timeout-driven drain released, in circular
/// delivery order (spec.md §4.2 "reorder timeout firing", step 2).
pub type FlushCallback = Arc<dyn Fn(Vec<Message>) + Send + Sync>;

/// Tuning knobs for the Ordering Engine (spec.md §6).
#[derive(Debug, Clone)]
pub struct OrderingEngineConfig {
    pub reorder_timeout: Duration,
    /// If set, [`OrderingEngine::sweep_expired`] resets keys idle longer
    /// than this (spec.md §4.4 periodic sweep, supplementing §4.2's
    /// per-message bookkeeping).
    pub cache_expiration: Option<Duration>,
    pub send_rebirth_when_timeout: bool,
}

impl Default for OrderingEngineConfig {
    fn default() -> Self {
        Self {
            reorder_timeout: Duration::from_secs(5),
            cache_expiration: None,
            send_rebirth_when_timeout: true,
        }
    }
}

/// Circular comparison of two 8-bit rolling sequence numbers (spec.md §4.2
/// `circCompare`). Neither `PartialOrd` nor `Ord` can express this — it is
/// not transitive over the whole `u8` range — so it stays a free function.
pub fn circ_cmp(x: u8, y: u8) -> CmpOrdering {
    if x < 32 && y > 223 {
        CmpOrdering::Greater
    } else if x > 223 && y < 32 {
        CmpOrdering::Less
    } else {
        x.cmp(&y)
    }
}

fn next_seq(seq: u8) -> u8 {
    seq.wrapping_add(1)
}

struct KeyState {
    /// `-1` before the first message is accepted (spec.md §3 `lastSeq`).
    last_seq: i32,
    pending: BTreeMap<u8, Message>,
    timer_generation: u64,
    timer_handle: Option<JoinHandle<()>>,
    last_activity: Instant,
}

impl KeyState {
    fn new() -> Self {
        Self {
            last_seq: -1,
            pending: BTreeMap::new(),
            timer_generation: 0,
            timer_handle: None,
            last_activity: Instant::now(),
        }
    }

    fn abort_timer(&mut self) {
        if let Some(handle) = self.timer_handle.take() {
            handle.abort();
        }
    }

    /// The pending key that would be delivered next, by circular order —
    /// the minimum under [`circ_cmp`], not numeric order (spec.md §4.2
    /// "reorder timeout firing" step 1: "lowest in circular order").
    fn lowest_pending_key(&self) -> Option<u8> {
        self.pending.keys().copied().fold(None, |acc, k| match acc {
            None => Some(k),
            Some(cur) if circ_cmp(k, cur) == CmpOrdering::Less => Some(k),
            Some(cur) => Some(cur),
        })
    }
}

/// Tracks per-edge sequence state and arbitrates gap buffering and
/// reorder timeouts (spec.md §4.2).
pub struct OrderingEngine {
    config: OrderingEngineConfig,
    keys: RwLock<HashMap<Key, Arc<Mutex<KeyState>>>>,
    on_flush: FlushCallback,
    on_rebirth: RebirthCallback,
}

impl OrderingEngine {
    pub fn new(config: OrderingEngineConfig, on_flush: FlushCallback, on_rebirth: RebirthCallback) -> Self {
        Self {
            config,
            keys: RwLock::new(HashMap::new()),
            on_flush,
            on_rebirth,
        }
    }

    async fn get_or_create(&self, key: &Key) -> Arc<Mutex<KeyState>> {
        if let Some(state) = self.keys.read().await.get(key) {
            return Arc::clone(state);
        }
        let mut keys = self.keys.write().await;
        Arc::clone(
            keys.entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(KeyState::new()))),
        )
    }

    /// Process one sequenced message for its `(group_id, edge_node_id)` key
    /// (spec.md §4.2 `process`). Returns the messages now releasable in
    /// delivery order.
    ///
    /// Fails only if `message.message_type` is not one of the four types
    /// the Ordering Engine accepts ([`sparkplug_host_protocol::MessageType::is_sequenced`]);
    /// an `NBIRTH` or `NDEATH` is not a tracking failure, it simply isn't
    /// this engine's concern and the caller is expected to have already
    /// routed it to the Liveness Tracker instead.
    pub async fn process(&self, message: Message) -> Result<Vec<Message>, OrderingError> {
        if !message.message_type.is_sequenced() {
            return Err(OrderingError::InvalidMessageType(message.message_type));
        }

        // Validity check: an out-of-range seq is handed straight back
        // without touching any state (spec.md §4.2 "Validity check").
        if !message.payload.has_valid_seq() {
            warn!(seq = message.payload.seq, "message carries an out-of-range seq");
            let mut message = message;
            message.is_seq_consecutive = false;
            message.is_cached = false;
            return Ok(vec![message]);
        }

        let key = message.edge_key();
        let state_arc = self.get_or_create(&key).await;
        let seq = message.payload.seq as u8;
        let mut released = Vec::new();
        let mut now_lowest_gap: Option<u8> = None;

        {
            let mut state = state_arc.lock().await;
            state.last_activity = Instant::now();

            let is_first = state.last_seq < 0;
            let expected = if is_first { seq } else { next_seq(state.last_seq as u8) };

            if is_first || seq == expected {
                let mut message = message;
                message.is_seq_consecutive = true;
                message.is_cached = false;
                state.last_seq = i32::from(seq);
                released.push(message);

                let mut cursor = next_seq(seq);
                while let Some(mut buffered) = state.pending.remove(&cursor) {
                    buffered.is_seq_consecutive = true;
                    buffered.is_cached = true;
                    state.last_seq = i32::from(cursor);
                    released.push(buffered);
                    cursor = next_seq(cursor);
                }

                if state.pending.is_empty() {
                    state.abort_timer();
                } else {
                    now_lowest_gap = state.lowest_pending_key();
                }
            } else {
                // Gap: buffer the message, replacing (and returning) any
                // entry already occupying that seq (spec.md §4.2 step 3,
                // P4 "replace-on-duplicate").
                let mut message = message;
                message.is_seq_consecutive = false;
                message.is_cached = true;
                let was_lowest = state
                    .lowest_pending_key()
                    .map(|cur| circ_cmp(seq, cur) == CmpOrdering::Less)
                    .unwrap_or(true);
                if let Some(displaced) = state.pending.insert(seq, message) {
                    trace!(group_id = %key.0, edge_node_id = %key.1, seq, "replacing duplicate buffered message");
                    released.push(displaced);
                } else {
                    debug!(group_id = %key.0, edge_node_id = %key.1, seq, expected, "buffering out-of-order message");
                }

                if state.timer_handle.is_none() || was_lowest {
                    now_lowest_gap = Some(seq);
                }
            }
        }

        if now_lowest_gap.is_some() {
            self.arm_timer(key.clone(), &state_arc).await;
        }

        Ok(released)
    }

    async fn arm_timer(&self, key: Key, state_arc: &Arc<Mutex<KeyState>>) {
        let generation = {
            let mut state = state_arc.lock().await;
            state.abort_timer();
            state.timer_generation += 1;
            state.timer_generation
        };

        let state_arc = Arc::clone(state_arc);
        let timeout = self.config.reorder_timeout;
        let on_flush = Arc::clone(&self.on_flush);
        let on_rebirth = Arc::clone(&self.on_rebirth);
        let send_rebirth = self.config.send_rebirth_when_timeout;
        let (group_id, edge_node_id) = key;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;

            let drained = {
                let mut state = state_arc.lock().await;
                if state.timer_generation != generation || state.pending.is_empty() {
                    return;
                }
                let mut entries: Vec<(u8, Message)> = state.pending.drain().collect();
                entries.sort_by(|(a, _), (b, _)| circ_cmp(*a, *b));

                let mut expected = if state.last_seq < 0 { None } else { Some(next_seq(state.last_seq as u8)) };
                let mut gap_seen = false;
                for (seq, message) in &mut entries {
                    let consecutive = !gap_seen && expected == Some(*seq);
                    message.is_seq_consecutive = consecutive;
                    if !consecutive {
                        gap_seen = true;
                    }
                    expected = Some(next_seq(*seq));
                    state.last_seq = i32::from(*seq);
                }
                state.timer_handle = None;
                entries.into_iter().map(|(_, m)| m).collect::<Vec<_>>()
            };

            if drained.is_empty() {
                return;
            }
            warn!(%group_id, %edge_node_id, count = drained.len(), "reorder timeout fired, flushing pending gap");
            on_flush(drained);
            if send_rebirth {
                on_rebirth(group_id, edge_node_id);
            }
        });

        let mut state = state_arc.lock().await;
        if state.timer_generation == generation {
            state.timer_handle = Some(handle);
        } else {
            handle.abort();
        }
    }

    /// Discard all ordering state for a key, treating its next message as
    /// the first ever seen (spec.md §4.2 `reset`; used on NDEATH and by
    /// P7).
    pub async fn reset(&self, group_id: &str, edge_node_id: &str) {
        let key = (group_id.to_owned(), edge_node_id.to_owned());
        let removed = self.keys.write().await.remove(&key);
        if let Some(state_arc) = removed {
            state_arc.lock().await.abort_timer();
        }
    }

    /// Discard ordering state for a key and seed `lastSeq` from an NBIRTH's
    /// own `seq` (spec.md §4.4 dispatch table: "`reset` the Ordering Engine
    /// for that key with `lastSeq := payload.seq`"). Unlike [`Self::reset`],
    /// the very next message is expected to continue from `seq`, not be
    /// accepted unconditionally.
    pub async fn reset_with_seq(&self, group_id: &str, edge_node_id: &str, seq: u8) {
        let key = (group_id.to_owned(), edge_node_id.to_owned());
        let removed = self.keys.write().await.remove(&key);
        if let Some(state_arc) = removed {
            state_arc.lock().await.abort_timer();
        }
        let state_arc = self.get_or_create(&key).await;
        let mut state = state_arc.lock().await;
        state.last_seq = i32::from(seq);
        state.last_activity = Instant::now();
    }

    /// Discard all ordering state for every key (spec.md §4.2 `clearAll`;
    /// used on Host disconnect/shutdown per spec.md §4.4).
    pub async fn clear_all(&self) {
        let mut keys = self.keys.write().await;
        for state_arc in keys.values() {
            state_arc.lock().await.abort_timer();
        }
        keys.clear();
    }

    /// Reset keys that have seen no traffic for longer than
    /// `cache_expiration` (spec.md §4.4 periodic sweep supplement). A no-op
    /// when `cache_expiration` is unset.
    pub async fn sweep_expired(&self) {
        let Some(expiration) = self.config.cache_expiration else {
            return;
        };
        let now = Instant::now();
        let mut stale = Vec::new();
        {
            let keys = self.keys.read().await;
            for (key, state_arc) in keys.iter() {
                let state = state_arc.lock().await;
                if now.duration_since(state.last_activity) > expiration {
                    stale.push(key.clone());
                }
            }
        }
        for (group_id, edge_node_id) in stale {
            debug!(%group_id, %edge_node_id, "sweeping expired ordering state");
            self.reset(&group_id, &edge_node_id).await;
        }
    }
}
