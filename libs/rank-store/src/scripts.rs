//! Lua procedures behind [`crate::ScriptExecutor`] for Redis
//!
//! Recency procedures take `KEYS[1]` = sorted set, `KEYS[2]` = pointer record.
//! Retrieval procedures take the ranked structure first, then the structures
//! to read scores from; pointer keys are derived as `<path>/ids/<id>`.

use once_cell::sync::Lazy;
use redis::Script;

const HELPERS: &str = r#"
local function pointer(path, id)
  return path .. '/ids/' .. id
end

local function members_in(path, ascending, start, stop)
  if ascending then
    return redis.call('ZRANGE', path, start, stop)
  end
  return redis.call('ZREVRANGE', path, start, stop)
end

local function rank_of(path, ascending, member)
  if ascending then
    return redis.call('ZRANK', path, member)
  end
  return redis.call('ZREVRANK', path, member)
end

local function strip_ids(members, prefix_len)
  local ids = {}
  for i, member in ipairs(members) do
    ids[i] = string.sub(member, prefix_len + 1)
  end
  return ids
end

local function score_columns(paths, first, ids)
  local columns = {}
  for i = first, #paths do
    local column = {}
    for j, id in ipairs(ids) do
      local member = redis.call('GET', pointer(paths[i], id))
      if member then
        column[j] = redis.call('ZSCORE', paths[i], member)
      else
        column[j] = false
      end
    end
    columns[#columns + 1] = column
  end
  return columns
end

local function around_window(rank, count, distance, fill)
  local last = count - 1
  local low = math.max(0, rank - distance)
  local high = math.min(last, rank + distance)
  if fill then
    if rank < distance then
      high = math.min(last, low + 2 * distance)
    end
    if rank + distance > last then
      low = math.max(0, high - 2 * distance)
    end
  end
  return low, high
end
"#;

// ARGV: member, score
const RECENCY_ADD: &str = r#"
local previous = redis.call('GETSET', KEYS[2], ARGV[1])
if previous then
  redis.call('ZREM', KEYS[1], previous)
end
redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])
return 1
"#;

// ARGV: member, score, ascending
const RECENCY_IMPROVE: &str = r#"
local previous = redis.call('GET', KEYS[2])
local score = tonumber(ARGV[2])
if previous then
  local current = redis.call('ZSCORE', KEYS[1], previous)
  if current then
    current = tonumber(current)
    local better
    if ARGV[3] == 'true' then
      better = score < current
    else
      better = score > current
    end
    if not better then
      return 0
    end
  end
  redis.call('ZREM', KEYS[1], previous)
end
redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])
redis.call('SET', KEYS[2], ARGV[1])
return 1
"#;

// ARGV: member, delta
// Scores stay as Redis strings; Lua numbers would lose precision.
const RECENCY_INCR: &str = r#"
local previous = redis.call('GET', KEYS[2])
local current = false
if previous then
  current = redis.call('ZSCORE', KEYS[1], previous)
  redis.call('ZREM', KEYS[1], previous)
end
redis.call('ZADD', KEYS[1], current or 0, ARGV[1])
local score = redis.call('ZINCRBY', KEYS[1], ARGV[2], ARGV[1])
redis.call('SET', KEYS[2], ARGV[1])
return score
"#;

const RECENCY_REMOVE: &str = r#"
local previous = redis.call('GET', KEYS[2])
if not previous then
  return 0
end
redis.call('ZREM', KEYS[1], previous)
redis.call('DEL', KEYS[2])
return 1
"#;

// ARGV: prefix length
const CLEAR_INDEXED: &str = r#"
local members = redis.call('ZRANGE', KEYS[1], 0, -1)
local prefix_len = tonumber(ARGV[1])
for _, member in ipairs(members) do
  redis.call('DEL', KEYS[1] .. '/ids/' .. string.sub(member, prefix_len + 1))
end
redis.call('DEL', KEYS[1])
return #members
"#;

// ARGV: member. Byte-wise comparison, independent of the server locale.
const REPLACE_IF_LOWER: &str = r#"
local function lex_less(a, b)
  local n = math.min(#a, #b)
  for i = 1, n do
    local x, y = string.byte(a, i), string.byte(b, i)
    if x ~= y then
      return x < y
    end
  end
  return #a < #b
end

local previous = redis.call('GET', KEYS[2])
if previous then
  if not lex_less(ARGV[1], previous) then
    return 0
  end
  redis.call('ZREM', KEYS[1], previous)
end
redis.call('ZADD', KEYS[1], 0, ARGV[1])
redis.call('SET', KEYS[2], ARGV[1])
return 1
"#;

// KEYS: score paths. ARGV: id
const RETRIEVE_ENTITY: &str = r#"
local scores = {}
for i, path in ipairs(KEYS) do
  local member = redis.call('GET', pointer(path, ARGV[1]))
  if member then
    scores[i] = redis.call('ZSCORE', path, member)
  else
    scores[i] = false
  end
end
return scores
"#;

// KEYS: ranked path, score paths... ARGV: ascending, prefix length, start, stop
const RETRIEVE_RANGE: &str = r#"
local ascending = ARGV[1] == 'true'
local start = tonumber(ARGV[3])
local members = members_in(KEYS[1], ascending, start, tonumber(ARGV[4]))
local ids = strip_ids(members, tonumber(ARGV[2]))
return { start, ids, score_columns(KEYS, 2, ids) }
"#;

// KEYS: ranked path, score paths... ARGV: ascending, prefix length, id, distance, fill
const RETRIEVE_AROUND: &str = r#"
local ascending = ARGV[1] == 'true'
local member = redis.call('GET', pointer(KEYS[1], ARGV[3]))
if not member then
  return { -1, {}, {} }
end
local rank = rank_of(KEYS[1], ascending, member)
if not rank then
  return { -1, {}, {} }
end
local count = redis.call('ZCARD', KEYS[1])
local low, high = around_window(rank, count, tonumber(ARGV[4]), ARGV[5] == 'true')
local ids = strip_ids(members_in(KEYS[1], ascending, low, high), tonumber(ARGV[2]))
return { low, ids, score_columns(KEYS, 2, ids) }
"#;

fn with_helpers(body: &str) -> Script {
    Script::new(&format!("{}{}", HELPERS, body))
}

pub(crate) static RECENCY_ADD_SCRIPT: Lazy<Script> = Lazy::new(|| Script::new(RECENCY_ADD));
pub(crate) static RECENCY_IMPROVE_SCRIPT: Lazy<Script> =
    Lazy::new(|| Script::new(RECENCY_IMPROVE));
pub(crate) static RECENCY_INCR_SCRIPT: Lazy<Script> = Lazy::new(|| Script::new(RECENCY_INCR));
pub(crate) static RECENCY_REMOVE_SCRIPT: Lazy<Script> = Lazy::new(|| Script::new(RECENCY_REMOVE));
pub(crate) static CLEAR_INDEXED_SCRIPT: Lazy<Script> = Lazy::new(|| Script::new(CLEAR_INDEXED));
pub(crate) static REPLACE_IF_LOWER_SCRIPT: Lazy<Script> =
    Lazy::new(|| Script::new(REPLACE_IF_LOWER));
pub(crate) static RETRIEVE_ENTITY_SCRIPT: Lazy<Script> =
    Lazy::new(|| with_helpers(RETRIEVE_ENTITY));
pub(crate) static RETRIEVE_RANGE_SCRIPT: Lazy<Script> = Lazy::new(|| with_helpers(RETRIEVE_RANGE));
pub(crate) static RETRIEVE_AROUND_SCRIPT: Lazy<Script> =
    Lazy::new(|| with_helpers(RETRIEVE_AROUND));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripts_have_distinct_hashes() {
        let hashes = [
            RECENCY_ADD_SCRIPT.get_hash(),
            RECENCY_IMPROVE_SCRIPT.get_hash(),
            RECENCY_INCR_SCRIPT.get_hash(),
            RECENCY_REMOVE_SCRIPT.get_hash(),
            CLEAR_INDEXED_SCRIPT.get_hash(),
            REPLACE_IF_LOWER_SCRIPT.get_hash(),
            RETRIEVE_ENTITY_SCRIPT.get_hash(),
            RETRIEVE_RANGE_SCRIPT.get_hash(),
            RETRIEVE_AROUND_SCRIPT.get_hash(),
        ];
        let unique: std::collections::HashSet<_> = hashes.iter().collect();
        assert_eq!(unique.len(), hashes.len());
    }

    #[test]
    fn test_pointer_convention_matches_keys_module() {
        assert!(HELPERS.contains("'/ids/'"));
        assert!(CLEAR_INDEXED.contains("'/ids/'"));
        assert_eq!(crate::keys::POINTER_SEGMENT, "/ids/");
    }
}
