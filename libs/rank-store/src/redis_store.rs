//! Redis-backed store: sorted sets for ordering, plain keys for pointer
//! records, Lua scripts for the atomic procedures.

use crate::scripts::{
    CLEAR_INDEXED_SCRIPT, RECENCY_ADD_SCRIPT, RECENCY_IMPROVE_SCRIPT, RECENCY_INCR_SCRIPT,
    RECENCY_REMOVE_SCRIPT, REPLACE_IF_LOWER_SCRIPT, RETRIEVE_AROUND_SCRIPT,
    RETRIEVE_ENTITY_SCRIPT, RETRIEVE_RANGE_SCRIPT,
};
use crate::{
    IndexSlot, Order, PipelineOp, RankedPath, RedisPool, ScoreTable, ScriptExecutor,
    SortedSetStore, StoreConfig, StoreError, StoreResult,
};
use async_trait::async_trait;
use redis::{AsyncCommands, RedisResult};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Raw reply of the retrieval scripts: start, ids, score columns
type TableReply = (i64, Vec<String>, Vec<Vec<Option<f64>>>);

#[derive(Clone)]
pub struct RedisStore {
    pool: Arc<RedisPool>,
}

impl RedisStore {
    pub fn new(pool: RedisPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(config: &StoreConfig) -> anyhow::Result<Self> {
        Ok(Self::new(RedisPool::connect(config).await?))
    }

    pub fn pool(&self) -> &RedisPool {
        &self.pool
    }

    async fn timed<T>(&self, fut: impl Future<Output = RedisResult<T>>) -> StoreResult<T> {
        let budget = self.pool.command_timeout();
        match tokio::time::timeout(budget, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => {
                warn!(timeout_ms = budget.as_millis() as u64, "Redis command timed out");
                Err(StoreError::Timeout(budget))
            }
        }
    }
}

fn redis_index(index: u64) -> isize {
    isize::try_from(index).unwrap_or(isize::MAX)
}

/// Largest index handed to a script. Lua prints numbers of 15 or more
/// digits in exponent notation, which `ZRANGE` rejects.
const SCRIPT_INDEX_MAX: u64 = 99_999_999_999_999;

fn script_index(index: u64) -> u64 {
    index.min(SCRIPT_INDEX_MAX)
}

fn flag(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn table_from_reply(reply: TableReply) -> StoreResult<Option<ScoreTable>> {
    let (start, ids, columns) = reply;
    if start < 0 {
        return Ok(None);
    }
    let start = u64::try_from(start)
        .map_err(|_| StoreError::InvalidReply(format!("window start {} out of range", start)))?;
    Ok(Some(ScoreTable::from_columns(start, ids, columns)))
}

#[async_trait]
impl SortedSetStore for RedisStore {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        let mut conn = self.pool.connection().await;
        self.timed(conn.zadd::<_, _, _, ()>(key, member, score)).await
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.pool.connection().await;
        let removed: i64 = self.timed(conn.zrem(key, member)).await?;
        Ok(removed > 0)
    }

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        let mut conn = self.pool.connection().await;
        self.timed(conn.zscore(key, member)).await
    }

    async fn zrank(&self, key: &str, member: &str, order: Order) -> StoreResult<Option<u64>> {
        let mut conn = self.pool.connection().await;
        if order.is_ascending() {
            self.timed(conn.zrank(key, member)).await
        } else {
            self.timed(conn.zrevrank(key, member)).await
        }
    }

    async fn zrange(
        &self,
        key: &str,
        start: u64,
        stop: u64,
        order: Order,
    ) -> StoreResult<Vec<(String, f64)>> {
        let mut conn = self.pool.connection().await;
        let (start, stop) = (redis_index(start), redis_index(stop));
        if order.is_ascending() {
            self.timed(conn.zrange_withscores(key, start, stop)).await
        } else {
            self.timed(conn.zrevrange_withscores(key, start, stop))
                .await
        }
    }

    async fn zmembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.pool.connection().await;
        self.timed(conn.zrange(key, 0, -1)).await
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.pool.connection().await;
        self.timed(conn.zcard(key)).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.pool.connection().await;
        self.timed(conn.get(key)).await
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.pool.connection().await;
        self.timed(conn.set::<_, _, ()>(key, value)).await
    }

    async fn getset(&self, key: &str, value: &str) -> StoreResult<Option<String>> {
        let mut conn = self.pool.connection().await;
        self.timed(conn.getset(key, value)).await
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.connection().await;
        self.timed(conn.del(keys.to_vec())).await
    }

    async fn pipeline(&self, ops: Vec<PipelineOp>) -> StoreResult<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for op in &ops {
            match op {
                PipelineOp::ZAdd { key, member, score } => {
                    pipe.zadd(key, member, *score).ignore();
                }
                PipelineOp::ZRem { key, member } => {
                    pipe.zrem(key, member).ignore();
                }
                PipelineOp::Set { key, value } => {
                    pipe.set(key, value).ignore();
                }
                PipelineOp::Del { key } => {
                    pipe.del(key).ignore();
                }
            }
        }

        let mut conn = self.pool.connection().await;
        self.timed(pipe.query_async::<_, ()>(&mut conn)).await?;

        debug!(count = ops.len(), "Redis pipeline executed");
        Ok(())
    }
}

#[async_trait]
impl ScriptExecutor for RedisStore {
    async fn recency_add(&self, slot: &IndexSlot, member: &str, score: f64) -> StoreResult<()> {
        let mut conn = self.pool.connection().await;
        self.timed(
            RECENCY_ADD_SCRIPT
                .key(&slot.path)
                .key(&slot.pointer)
                .arg(member)
                .arg(score)
                .invoke_async::<_, ()>(&mut conn),
        )
        .await
    }

    async fn recency_improve(
        &self,
        slot: &IndexSlot,
        member: &str,
        score: f64,
        order: Order,
    ) -> StoreResult<bool> {
        let mut conn = self.pool.connection().await;
        let updated: i64 = self
            .timed(
                RECENCY_IMPROVE_SCRIPT
                    .key(&slot.path)
                    .key(&slot.pointer)
                    .arg(member)
                    .arg(score)
                    .arg(flag(order.is_ascending()))
                    .invoke_async(&mut conn),
            )
            .await?;
        Ok(updated == 1)
    }

    async fn recency_incr(&self, slot: &IndexSlot, member: &str, delta: f64) -> StoreResult<f64> {
        let mut conn = self.pool.connection().await;
        self.timed(
            RECENCY_INCR_SCRIPT
                .key(&slot.path)
                .key(&slot.pointer)
                .arg(member)
                .arg(delta)
                .invoke_async(&mut conn),
        )
        .await
    }

    async fn recency_remove(&self, slot: &IndexSlot) -> StoreResult<bool> {
        let mut conn = self.pool.connection().await;
        let removed: i64 = self
            .timed(
                RECENCY_REMOVE_SCRIPT
                    .key(&slot.path)
                    .key(&slot.pointer)
                    .invoke_async(&mut conn),
            )
            .await?;
        Ok(removed == 1)
    }

    async fn clear_indexed(&self, path: &str, prefix_len: usize) -> StoreResult<u64> {
        let mut conn = self.pool.connection().await;
        self.timed(
            CLEAR_INDEXED_SCRIPT
                .key(path)
                .arg(prefix_len)
                .invoke_async(&mut conn),
        )
        .await
    }

    async fn replace_if_lower(&self, slot: &IndexSlot, member: &str) -> StoreResult<bool> {
        let mut conn = self.pool.connection().await;
        let replaced: i64 = self
            .timed(
                REPLACE_IF_LOWER_SCRIPT
                    .key(&slot.path)
                    .key(&slot.pointer)
                    .arg(member)
                    .invoke_async(&mut conn),
            )
            .await?;
        Ok(replaced == 1)
    }

    async fn retrieve_entity(&self, paths: &[String], id: &str) -> StoreResult<Vec<Option<f64>>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let mut invocation = RETRIEVE_ENTITY_SCRIPT.prepare_invoke();
        for path in paths {
            invocation.key(path);
        }
        invocation.arg(id);

        let mut conn = self.pool.connection().await;
        self.timed(invocation.invoke_async(&mut conn)).await
    }

    async fn retrieve_range(
        &self,
        ranked: &RankedPath,
        score_paths: &[String],
        start: u64,
        stop: u64,
    ) -> StoreResult<ScoreTable> {
        let mut invocation = RETRIEVE_RANGE_SCRIPT.prepare_invoke();
        invocation.key(&ranked.path);
        for path in score_paths {
            invocation.key(path);
        }
        invocation
            .arg(flag(ranked.order.is_ascending()))
            .arg(ranked.prefix_len)
            .arg(script_index(start))
            .arg(script_index(stop));

        let mut conn = self.pool.connection().await;
        let reply: TableReply = self.timed(invocation.invoke_async(&mut conn)).await?;
        Ok(table_from_reply(reply)?.unwrap_or_default())
    }

    async fn retrieve_around(
        &self,
        ranked: &RankedPath,
        id: &str,
        distance: u64,
        fill_borders: bool,
        score_paths: &[String],
    ) -> StoreResult<Option<ScoreTable>> {
        let mut invocation = RETRIEVE_AROUND_SCRIPT.prepare_invoke();
        invocation.key(&ranked.path);
        for path in score_paths {
            invocation.key(path);
        }
        invocation
            .arg(flag(ranked.order.is_ascending()))
            .arg(ranked.prefix_len)
            .arg(id)
            .arg(script_index(distance))
            .arg(flag(fill_borders));

        let mut conn = self.pool.connection().await;
        let reply: TableReply = self.timed(invocation.invoke_async(&mut conn)).await?;
        table_from_reply(reply)
    }
}
