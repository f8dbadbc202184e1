use super::{Admission, ClaimedMember, FailureRecord, SharedStore};
use crate::frontier::FrontierResult;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use tracing::debug;

/// Admits every (host, member) pair in ARGV[4..] that is not yet scheduled.
/// Host keys are derived from the prefix inside the script so one call covers
/// the whole batch.
const ADMIT_BULK_LUA: &str = r#"
local key = KEYS[1]
local prefix = ARGV[1]
local now = tonumber(ARGV[2])
local halflife = tonumber(ARGV[3])
local added = 0
for i = 4, #ARGV, 2 do
  local host = ARGV[i]
  local member = ARGV[i + 1]
  if redis.call('zscore', key, member) == false then
    local delayKey = prefix .. 'hostdelay:' .. host
    local updateKey = prefix .. 'hostlastupdate:' .. host
    local current = 0
    local last = now
    local stored = redis.call('get', delayKey)
    if stored ~= false then
      current = tonumber(stored)
      last = tonumber(redis.call('get', updateKey)) or now
    end
    local delay = current * math.exp(math.log(0.5) / halflife * (now - last)) + 1
    redis.call('set', delayKey, tostring(delay))
    redis.call('set', updateKey, tostring(now))
    redis.call('zadd', key, tostring(now + delay), member)
    added = added + 1
  end
end
return added
"#;

const CLAIM_LUA: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local lock = tonumber(ARGV[2])
local prefix = ARGV[3]
local found = redis.call('zrangebyscore', key, '-inf', now, 'LIMIT', 0, 1)
local member = found[1]
if member == nil then
  return {}
end
redis.call('zadd', key, tostring(now + lock), member)
local details = redis.call('hmget', prefix .. 'error:' .. member, 'statusCode', 'errorCode', 'errorMessage')
return {member, details[1], details[2], details[3]}
"#;

const RECORD_SUCCESS_LUA: &str = r#"
if redis.call('del', KEYS[3]) ~= 0 then
  redis.call('srem', KEYS[2], KEYS[3])
end
return redis.call('zadd', KEYS[1], ARGV[1], ARGV[2])
"#;

const RECORD_FAILURE_LUA: &str = r#"
local numErrors = redis.call('hincrby', KEYS[3], 'numErrors', 1)
if ARGV[4] ~= '' then
  redis.call('hset', KEYS[3], 'statusCode', ARGV[4])
else
  redis.call('hdel', KEYS[3], 'statusCode')
end
redis.call('hset', KEYS[3], 'errorCode', ARGV[5])
redis.call('hset', KEYS[3], 'errorMessage', ARGV[6])
redis.call('sadd', KEYS[2], KEYS[3])
local crawlTime = tonumber(ARGV[1]) + tonumber(ARGV[3]) * 2 ^ (numErrors - 1)
redis.call('zadd', KEYS[1], tostring(crawlTime), ARGV[2])
return numErrors
"#;

/// [`SharedStore`] on a Redis server
///
/// Keys, all under the configured prefix:
/// - `scheduledcrawls`: sorted set of URLs scored by eligibility time
/// - `hostdelay:<host>` / `hostlastupdate:<host>`: per-host admission delay
/// - `errors`: set of error hash keys
/// - `error:<url>`: hash with `numErrors`, `statusCode`, `errorCode`, `errorMessage`
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
    admit_script: Script,
    claim_script: Script,
    success_script: Script,
    failure_script: Script,
}

impl RedisStore {
    /// Connects to `redis_url` (e.g. `redis://127.0.0.1:6379`)
    pub async fn connect(redis_url: &str, prefix: &str) -> FrontierResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        debug!("Connected to Redis at {}", redis_url);

        Ok(Self {
            conn,
            prefix: prefix.to_string(),
            admit_script: Script::new(ADMIT_BULK_LUA),
            claim_script: Script::new(CLAIM_LUA),
            success_script: Script::new(RECORD_SUCCESS_LUA),
            failure_script: Script::new(RECORD_FAILURE_LUA),
        })
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn schedule_key(&self) -> String {
        self.key("scheduledcrawls")
    }

    fn errors_key(&self) -> String {
        self.key("errors")
    }

    fn error_key(&self, member: &str) -> String {
        self.key(&format!("error:{}", member))
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn admit_bulk(
        &self,
        admissions: &[Admission],
        now_ms: i64,
        half_life_ms: i64,
    ) -> FrontierResult<()> {
        let mut invocation = self.admit_script.key(self.schedule_key());
        invocation
            .arg(&self.prefix)
            .arg(now_ms)
            .arg(half_life_ms.max(1));
        for admission in admissions {
            invocation.arg(&admission.host).arg(&admission.member);
        }

        let mut conn = self.conn.clone();
        let added: i64 = invocation.invoke_async(&mut conn).await?;
        debug!("Admitted {} of {} urls", added, admissions.len());
        Ok(())
    }

    async fn claim(&self, now_ms: i64, lock_ms: i64) -> FrontierResult<Option<ClaimedMember>> {
        let mut conn = self.conn.clone();
        let reply: Vec<Option<String>> = self
            .claim_script
            .key(self.schedule_key())
            .arg(now_ms)
            .arg(lock_ms)
            .arg(&self.prefix)
            .invoke_async(&mut conn)
            .await?;

        let mut fields = reply.into_iter();
        let member = match fields.next().flatten() {
            Some(member) => member,
            None => return Ok(None),
        };

        Ok(Some(ClaimedMember {
            member,
            status_code: fields.next().flatten().and_then(|s| s.parse().ok()),
            error_code: fields.next().flatten(),
            error_message: fields.next().flatten(),
        }))
    }

    async fn record_success(&self, member: &str, next_ms: i64) -> FrontierResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .success_script
            .key(self.schedule_key())
            .key(self.errors_key())
            .key(self.error_key(member))
            .arg(next_ms)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn record_failure(
        &self,
        member: &str,
        now_ms: i64,
        initial_retry_ms: i64,
        failure: FailureRecord<'_>,
    ) -> FrontierResult<u32> {
        let mut conn = self.conn.clone();
        let status = failure
            .status_code
            .map(|s| s.to_string())
            .unwrap_or_default();
        let num_errors: u32 = self
            .failure_script
            .key(self.schedule_key())
            .key(self.errors_key())
            .key(self.error_key(member))
            .arg(now_ms)
            .arg(member)
            .arg(initial_retry_ms)
            .arg(status)
            .arg(failure.error_code)
            .arg(failure.error_message)
            .invoke_async(&mut conn)
            .await?;
        Ok(num_errors)
    }

    async fn soonest_score(&self) -> FrontierResult<Option<i64>> {
        let mut conn = self.conn.clone();
        let lowest: Vec<(String, f64)> = redis::cmd("ZRANGE")
            .arg(self.schedule_key())
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;
        Ok(lowest.first().map(|(_, score)| score.ceil() as i64))
    }
}
