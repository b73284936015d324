//! Order-preserving member encoding
//!
//! ```text
//! r1-r2-...-rk-<recency>:<id>
//! ```
//!
//! Every rank is zero-padded to the same width and the recency field is
//! always 13 digits, so byte order on the encoded member equals the derived
//! order of [`CompositeKey`]. With no rank components the layout reduces to
//! `<recency>:<id>`.

use crate::{LeaderboardError, LeaderboardResult};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

const RECENCY_DIGITS: usize = 13;
const RECENCY_SPAN: u64 = 10_000_000_000_000;

/// Which of two equal entries sorts first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecencyOrder {
    EarlierWins,
    LaterWins,
}

impl RecencyOrder {
    pub fn from_earlier_wins(earlier_wins: bool) -> Self {
        if earlier_wins {
            RecencyOrder::EarlierWins
        } else {
            RecencyOrder::LaterWins
        }
    }

    pub fn reversed(self) -> Self {
        match self {
            RecencyOrder::EarlierWins => RecencyOrder::LaterWins,
            RecencyOrder::LaterWins => RecencyOrder::EarlierWins,
        }
    }

    /// Recency field for a timestamp: the winning side gets the smaller value.
    pub fn field(self, millis: i64) -> u64 {
        let t = u64::try_from(millis).unwrap_or(0).clamp(1, RECENCY_SPAN - 1);
        match self {
            RecencyOrder::EarlierWins => t,
            RecencyOrder::LaterWins => RECENCY_SPAN - t,
        }
    }
}

/// Decimal digits needed for ranks below `max_users`: `ceil(log10(max_users))`
pub fn digits_for(max_users: u64) -> usize {
    let mut digits = 0;
    let mut span: u64 = 1;
    while span < max_users {
        span = span.saturating_mul(10);
        digits += 1;
    }
    digits
}

/// Decoded form of a member. Derived ordering matches the byte order of the
/// encoding produced by [`CompositeKeyFormat::encode`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompositeKey {
    pub ranks: Vec<u64>,
    pub recency: u64,
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeKeyFormat {
    ranks: usize,
    width: usize,
    recency: RecencyOrder,
}

impl CompositeKeyFormat {
    pub fn new(ranks: usize, max_users: u64, recency: RecencyOrder) -> LeaderboardResult<Self> {
        if ranks == 0 {
            return Err(LeaderboardError::Configuration(
                "a composite key needs at least one rank component".to_string(),
            ));
        }
        if max_users < 2 {
            return Err(LeaderboardError::Configuration(format!(
                "max_users must be at least 2, got {}",
                max_users
            )));
        }

        Ok(Self {
            ranks,
            width: digits_for(max_users),
            recency,
        })
    }

    /// `<recency>:<id>` members
    pub fn recency_only(recency: RecencyOrder) -> Self {
        Self {
            ranks: 0,
            width: 0,
            recency,
        }
    }

    pub fn ranks(&self) -> usize {
        self.ranks
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn recency(&self) -> RecencyOrder {
        self.recency
    }

    /// Characters in front of the id
    pub fn prefix_len(&self) -> usize {
        self.ranks * (self.width + 1) + RECENCY_DIGITS + 1
    }

    /// Largest rank that fits the width
    pub fn max_rank(&self) -> u64 {
        10u64
            .checked_pow(self.width as u32)
            .map(|limit| limit - 1)
            .unwrap_or(u64::MAX)
    }

    pub fn compose(&self, ranks: Vec<u64>, millis: i64, id: &str) -> CompositeKey {
        CompositeKey {
            ranks,
            recency: self.recency.field(millis),
            id: id.to_string(),
        }
    }

    pub fn encode(&self, key: &CompositeKey) -> LeaderboardResult<String> {
        if key.ranks.len() != self.ranks {
            return Err(LeaderboardError::Configuration(format!(
                "expected {} rank components, got {}",
                self.ranks,
                key.ranks.len()
            )));
        }
        if let Some(rank) = key.ranks.iter().find(|rank| **rank > self.max_rank()) {
            return Err(LeaderboardError::Configuration(format!(
                "rank {} does not fit in {} digits; raise max_users",
                rank, self.width
            )));
        }
        if key.recency >= RECENCY_SPAN {
            return Err(LeaderboardError::Configuration(format!(
                "recency {} does not fit in {} digits",
                key.recency, RECENCY_DIGITS
            )));
        }

        let mut member = String::with_capacity(self.prefix_len() + key.id.len());
        for rank in &key.ranks {
            let _ = write!(member, "{:0width$}-", rank, width = self.width);
        }
        let _ = write!(
            member,
            "{:0width$}:{}",
            key.recency,
            key.id,
            width = RECENCY_DIGITS
        );
        Ok(member)
    }

    pub fn decode_id<'a>(&self, member: &'a str) -> Option<&'a str> {
        rank_store::keys::strip_prefix(member, self.prefix_len())
    }

    pub fn decode(&self, member: &str) -> Option<CompositeKey> {
        let id = self.decode_id(member)?;
        let mut ranks = Vec::with_capacity(self.ranks);
        let mut offset = 0;
        for _ in 0..self.ranks {
            let digits = member.get(offset..offset + self.width)?;
            if member.get(offset + self.width..offset + self.width + 1)? != "-" {
                return None;
            }
            ranks.push(parse_digits(digits)?);
            offset += self.width + 1;
        }
        let recency = parse_digits(member.get(offset..offset + RECENCY_DIGITS)?)?;
        if member.get(offset + RECENCY_DIGITS..offset + RECENCY_DIGITS + 1)? != ":" {
            return None;
        }

        Some(CompositeKey {
            ranks,
            recency,
            id: id.to_string(),
        })
    }
}

fn parse_digits(digits: &str) -> Option<u64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
