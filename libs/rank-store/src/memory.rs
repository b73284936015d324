//! In-process store
//!
//! Every call takes the same lock, so each procedure is atomic with respect
//! to every other call, matching what Lua scripts give on Redis. Equal scores
//! are ordered by member bytes, and descending ranges are the exact reverse
//! of ascending ones, as in Redis.

use crate::keys::{pointer_key, strip_prefix};
use crate::window::around_window;
use crate::{
    IndexSlot, Order, PipelineOp, RankedPath, ScoreTable, ScriptExecutor, SortedSetStore,
    StoreResult,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, f64>,
    ordered: BTreeSet<(Score, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: f64) {
        if let Some(previous) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(Score(previous), member.to_string()));
        }
        self.ordered.insert((Score(score), member.to_string()));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&(Score(score), member.to_string()));
                true
            }
            None => false,
        }
    }

    fn score(&self, member: &str) -> Option<f64> {
        self.scores.get(member).copied()
    }

    fn len(&self) -> u64 {
        self.ordered.len() as u64
    }

    fn rank(&self, member: &str, order: Order) -> Option<u64> {
        let score = self.score(member)?;
        let below = self
            .ordered
            .range(..(Score(score), member.to_string()))
            .count() as u64;
        Some(match order {
            Order::Ascending => below,
            Order::Descending => self.len() - 1 - below,
        })
    }

    fn range(&self, start: u64, stop: u64, order: Order) -> Vec<(String, f64)> {
        if stop < start {
            return Vec::new();
        }
        let skip = usize::try_from(start).unwrap_or(usize::MAX);
        let take = usize::try_from(stop - start)
            .unwrap_or(usize::MAX)
            .saturating_add(1);
        let entry = |(score, member): &(Score, String)| (member.clone(), score.0);
        match order {
            Order::Ascending => self.ordered.iter().skip(skip).take(take).map(entry).collect(),
            Order::Descending => self
                .ordered
                .iter()
                .rev()
                .skip(skip)
                .take(take)
                .map(entry)
                .collect(),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    sets: HashMap<String, SortedSet>,
    values: HashMap<String, String>,
}

impl MemoryState {
    fn zadd(&mut self, key: &str, member: &str, score: f64) {
        self.sets.entry(key.to_string()).or_default().insert(member, score);
    }

    fn zrem(&mut self, key: &str, member: &str) -> bool {
        let Some(set) = self.sets.get_mut(key) else {
            return false;
        };
        let removed = set.remove(member);
        if set.len() == 0 {
            self.sets.remove(key);
        }
        removed
    }

    fn zscore(&self, key: &str, member: &str) -> Option<f64> {
        self.sets.get(key).and_then(|set| set.score(member))
    }

    fn zcard(&self, key: &str) -> u64 {
        self.sets.get(key).map(SortedSet::len).unwrap_or(0)
    }

    fn zrange(&self, key: &str, start: u64, stop: u64, order: Order) -> Vec<(String, f64)> {
        self.sets
            .get(key)
            .map(|set| set.range(start, stop, order))
            .unwrap_or_default()
    }

    fn del(&mut self, key: &str) -> bool {
        let had_set = self.sets.remove(key).is_some();
        let had_value = self.values.remove(key).is_some();
        had_set || had_value
    }

    fn apply(&mut self, op: PipelineOp) {
        match op {
            PipelineOp::ZAdd { key, member, score } => self.zadd(&key, &member, score),
            PipelineOp::ZRem { key, member } => {
                self.zrem(&key, &member);
            }
            PipelineOp::Set { key, value } => {
                self.values.insert(key, value);
            }
            PipelineOp::Del { key } => {
                self.del(&key);
            }
        }
    }

    /// Retire the entity's current member and install `member` with `score`.
    fn replace(&mut self, slot: &IndexSlot, member: &str, score: f64) {
        if let Some(previous) = self.values.insert(slot.pointer.clone(), member.to_string()) {
            self.zrem(&slot.path, &previous);
        }
        self.zadd(&slot.path, member, score);
    }

    fn current(&self, slot: &IndexSlot) -> Option<(String, Option<f64>)> {
        let member = self.values.get(&slot.pointer)?.clone();
        let score = self.zscore(&slot.path, &member);
        Some((member, score))
    }

    fn entity_score(&self, path: &str, id: &str) -> Option<f64> {
        let member = self.values.get(&pointer_key(path, id))?;
        self.zscore(path, member)
    }

    fn table(&self, ranked: &RankedPath, score_paths: &[String], start: u64, stop: u64) -> ScoreTable {
        let ids: Vec<String> = self
            .zrange(&ranked.path, start, stop, ranked.order)
            .into_iter()
            .map(|(member, _)| {
                strip_prefix(&member, ranked.prefix_len)
                    .unwrap_or_default()
                    .to_string()
            })
            .collect();
        let columns = score_paths
            .iter()
            .map(|path| ids.iter().map(|id| self.entity_score(path, id)).collect())
            .collect();
        ScoreTable::from_columns(start, ids, columns)
    }
}

/// Sorted-set store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys (sorted sets and plain values) currently stored
    pub fn key_count(&self) -> usize {
        let state = self.state.lock();
        state.sets.len() + state.values.len()
    }
}

#[async_trait]
impl SortedSetStore for MemoryStore {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        self.state.lock().zadd(key, member, score);
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self.state.lock().zrem(key, member))
    }

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        Ok(self.state.lock().zscore(key, member))
    }

    async fn zrank(&self, key: &str, member: &str, order: Order) -> StoreResult<Option<u64>> {
        Ok(self
            .state
            .lock()
            .sets
            .get(key)
            .and_then(|set| set.rank(member, order)))
    }

    async fn zrange(
        &self,
        key: &str,
        start: u64,
        stop: u64,
        order: Order,
    ) -> StoreResult<Vec<(String, f64)>> {
        Ok(self.state.lock().zrange(key, start, stop, order))
    }

    async fn zmembers(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .state
            .lock()
            .zrange(key, 0, u64::MAX, Order::Ascending)
            .into_iter()
            .map(|(member, _)| member)
            .collect())
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        Ok(self.state.lock().zcard(key))
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.state.lock().values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.state
            .lock()
            .values
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn getset(&self, key: &str, value: &str) -> StoreResult<Option<String>> {
        Ok(self
            .state
            .lock()
            .values
            .insert(key.to_string(), value.to_string()))
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        let mut state = self.state.lock();
        Ok(keys.iter().filter(|key| state.del(key)).count() as u64)
    }

    async fn pipeline(&self, ops: Vec<PipelineOp>) -> StoreResult<()> {
        let mut state = self.state.lock();
        for op in ops {
            state.apply(op);
        }
        Ok(())
    }
}

#[async_trait]
impl ScriptExecutor for MemoryStore {
    async fn recency_add(&self, slot: &IndexSlot, member: &str, score: f64) -> StoreResult<()> {
        self.state.lock().replace(slot, member, score);
        Ok(())
    }

    async fn recency_improve(
        &self,
        slot: &IndexSlot,
        member: &str,
        score: f64,
        order: Order,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock();
        if let Some((_, Some(current))) = state.current(slot) {
            if !order.improves(score, current) {
                return Ok(false);
            }
        }
        state.replace(slot, member, score);
        Ok(true)
    }

    async fn recency_incr(&self, slot: &IndexSlot, member: &str, delta: f64) -> StoreResult<f64> {
        let mut state = self.state.lock();
        let current = state.current(slot).and_then(|(_, score)| score).unwrap_or(0.0);
        let score = current + delta;
        state.replace(slot, member, score);
        Ok(score)
    }

    async fn recency_remove(&self, slot: &IndexSlot) -> StoreResult<bool> {
        let mut state = self.state.lock();
        match state.values.remove(&slot.pointer) {
            Some(previous) => {
                state.zrem(&slot.path, &previous);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn clear_indexed(&self, path: &str, prefix_len: usize) -> StoreResult<u64> {
        let mut state = self.state.lock();
        let members: Vec<String> = state
            .zrange(path, 0, u64::MAX, Order::Ascending)
            .into_iter()
            .map(|(member, _)| member)
            .collect();
        for member in &members {
            let id = strip_prefix(member, prefix_len).unwrap_or_default();
            state.values.remove(&pointer_key(path, id));
        }
        state.sets.remove(path);
        Ok(members.len() as u64)
    }

    async fn replace_if_lower(&self, slot: &IndexSlot, member: &str) -> StoreResult<bool> {
        let mut state = self.state.lock();
        if let Some(previous) = state.values.get(&slot.pointer) {
            if member >= previous.as_str() {
                return Ok(false);
            }
        }
        state.replace(slot, member, 0.0);
        Ok(true)
    }

    async fn retrieve_entity(&self, paths: &[String], id: &str) -> StoreResult<Vec<Option<f64>>> {
        let state = self.state.lock();
        Ok(paths.iter().map(|path| state.entity_score(path, id)).collect())
    }

    async fn retrieve_range(
        &self,
        ranked: &RankedPath,
        score_paths: &[String],
        start: u64,
        stop: u64,
    ) -> StoreResult<ScoreTable> {
        Ok(self.state.lock().table(ranked, score_paths, start, stop))
    }

    async fn retrieve_around(
        &self,
        ranked: &RankedPath,
        id: &str,
        distance: u64,
        fill_borders: bool,
        score_paths: &[String],
    ) -> StoreResult<Option<ScoreTable>> {
        let state = self.state.lock();
        let Some(member) = state.values.get(&pointer_key(&ranked.path, id)) else {
            return Ok(None);
        };
        let Some(rank) = state
            .sets
            .get(&ranked.path)
            .and_then(|set| set.rank(member, ranked.order))
        else {
            return Ok(None);
        };
        let count = state.zcard(&ranked.path);
        Ok(around_window(rank, count, distance, fill_borders)
            .map(|(low, high)| state.table(ranked, score_paths, low, high)))
    }
}
