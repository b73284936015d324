//! Ordered index plus id → member map
//!
//! The sorted set at `path` holds encoded members; `path/ids/<id>` holds the
//! member currently standing for `<id>`. Reads resolve ids through the
//! pointer and strip the encoding from members on the way out.

use crate::{Entry, LeaderboardResult};
use rank_store::{IndexSlot, Order, RankStore, RankedPath};
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct MemberIndex {
    store: Arc<dyn RankStore>,
    path: String,
    order: Order,
    prefix_len: usize,
}

impl MemberIndex {
    pub(crate) fn new(
        store: Arc<dyn RankStore>,
        path: String,
        order: Order,
        prefix_len: usize,
    ) -> Self {
        Self {
            store,
            path,
            order,
            prefix_len,
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn RankStore> {
        &self.store
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn order(&self) -> Order {
        self.order
    }

    pub(crate) fn slot(&self, id: &str) -> IndexSlot {
        IndexSlot::new(&self.path, id)
    }

    pub(crate) fn ranked(&self) -> RankedPath {
        RankedPath {
            path: self.path.clone(),
            order: self.order,
            prefix_len: self.prefix_len,
        }
    }

    /// Member currently standing for `id`
    pub(crate) async fn member(&self, id: &str) -> LeaderboardResult<Option<String>> {
        Ok(self.store.get(&self.slot(id).pointer).await?)
    }

    pub(crate) async fn peek(&self, id: &str) -> LeaderboardResult<Option<Entry>> {
        let Some(member) = self.member(id).await? else {
            return Ok(None);
        };
        let score = self.store.zscore(&self.path, &member).await?;
        let rank = self.store.zrank(&self.path, &member, self.order).await?;
        Ok(score.zip(rank).map(|(score, rank)| Entry {
            id: id.to_string(),
            score,
            rank: rank + 1,
        }))
    }

    pub(crate) async fn score(&self, id: &str) -> LeaderboardResult<Option<f64>> {
        match self.member(id).await? {
            Some(member) => Ok(self.store.zscore(&self.path, &member).await?),
            None => Ok(None),
        }
    }

    pub(crate) async fn rank(&self, id: &str) -> LeaderboardResult<Option<u64>> {
        match self.member(id).await? {
            Some(member) => Ok(self
                .store
                .zrank(&self.path, &member, self.order)
                .await?
                .map(|rank| rank + 1)),
            None => Ok(None),
        }
    }

    pub(crate) async fn list(&self, low: u64, high: u64) -> LeaderboardResult<Vec<Entry>> {
        let low = low.max(1);
        if high < low {
            return Ok(Vec::new());
        }

        let members = self
            .store
            .zrange(&self.path, low - 1, high - 1, self.order)
            .await?;
        Ok(members
            .into_iter()
            .zip(low..)
            .map(|((member, score), rank)| Entry {
                id: self.id_of(&member),
                score,
                rank,
            })
            .collect())
    }

    /// One procedure call: window bounds and rows come from the same snapshot.
    pub(crate) async fn around(
        &self,
        id: &str,
        distance: u64,
        fill_borders: bool,
    ) -> LeaderboardResult<Vec<Entry>> {
        let table = self
            .store
            .retrieve_around(
                &self.ranked(),
                id,
                distance,
                fill_borders,
                std::slice::from_ref(&self.path),
            )
            .await?;

        let Some(table) = table else {
            return Ok(Vec::new());
        };
        Ok(table
            .rows
            .into_iter()
            .zip(table.start + 1..)
            .map(|(row, rank)| Entry {
                id: row.id,
                score: row.scores.first().copied().flatten().unwrap_or_default(),
                rank,
            })
            .collect())
    }

    pub(crate) async fn count(&self) -> LeaderboardResult<u64> {
        Ok(self.store.zcard(&self.path).await?)
    }

    pub(crate) async fn clear(&self) -> LeaderboardResult<u64> {
        Ok(self.store.clear_indexed(&self.path, self.prefix_len).await?)
    }

    fn id_of(&self, member: &str) -> String {
        rank_store::keys::strip_prefix(member, self.prefix_len)
            .unwrap_or_default()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rank_store::{MemoryStore, ScriptExecutor};

    async fn seeded() -> MemberIndex {
        let store = Arc::new(MemoryStore::new());
        for (i, (id, score)) in [("a", 10.0), ("b", 30.0), ("c", 20.0)].iter().enumerate() {
            let member = format!("{}:{}", i, id);
            store
                .recency_add(&IndexSlot::new("idx", id), &member, *score)
                .await
                .unwrap();
        }
        MemberIndex::new(store, "idx".to_string(), Order::Descending, 2)
    }

    #[tokio::test]
    async fn test_reads_resolve_through_pointer() {
        let index = seeded().await;

        let entry = index.peek("c").await.unwrap().unwrap();
        assert_eq!(entry, Entry { id: "c".to_string(), score: 20.0, rank: 2 });
        assert_eq!(index.score("b").await.unwrap(), Some(30.0));
        assert_eq!(index.rank("a").await.unwrap(), Some(3));
        assert_eq!(index.peek("zz").await.unwrap(), None);
        assert_eq!(index.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_list_is_one_based() {
        let index = seeded().await;

        let entries = index.list(1, 2).await.unwrap();
        let ids: Vec<_> = entries.iter().map(|e| (e.id.as_str(), e.rank)).collect();
        assert_eq!(ids, vec![("b", 1), ("c", 2)]);

        assert_eq!(index.list(0, 1).await.unwrap().len(), 1);
        assert!(index.list(3, 2).await.unwrap().is_empty());
        assert!(index.list(10, 20).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_around_ranks_and_scores() {
        let index = seeded().await;

        let entries = index.around("a", 1, false).await.unwrap();
        let ids: Vec<_> = entries.iter().map(|e| (e.id.as_str(), e.rank, e.score)).collect();
        assert_eq!(ids, vec![("c", 2, 20.0), ("a", 3, 10.0)]);

        let filled = index.around("a", 1, true).await.unwrap();
        assert_eq!(filled.len(), 3);
        assert_eq!(filled[0].rank, 1);

        assert!(index.around("zz", 1, true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let index = seeded().await;
        assert_eq!(index.clear().await.unwrap(), 3);
        assert_eq!(index.count().await.unwrap(), 0);
        assert_eq!(index.member("a").await.unwrap(), None);
    }
}
