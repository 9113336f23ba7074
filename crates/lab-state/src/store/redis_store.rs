//! Redis-backed lab state store.
//!
//! Instance records live in the `lab_instances` hash and the monitor queue in
//! the `labs_monitor` list. Every mutation that touches more than one command
//! runs as a Lua script so that the version check, the record write and the
//! monitor upsert are applied atomically.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    archive_key, LabStore, INIT_SENTINEL, LABS_MONITOR_KEY, LAB_INSTANCES_KEY, MAX_WRITE_ATTEMPTS,
};
use crate::derive::monitor_entry_for;
use crate::error::{Result, StoreError};
use crate::types::{LabInstance, MonitoringEntry, ProgressEntry};

/// Environment variable holding the Redis connection URI.
pub const ENV_REDIS_URI: &str = "REDIS_URI";

// KEYS: instances, monitor. ARGV: labId, expected version, expected createdAt,
// new record, monitor entry ("" for none).
const WRITE_INSTANCE_LUA: &str = r"
local current = redis.call('HGET', KEYS[1], ARGV[1])
if not current then
  return -1
end
local ok, decoded = pcall(cjson.decode, current)
if not ok or type(decoded) ~= 'table' then
  return 0
end
local version = tonumber(decoded.version) or 0
local created = tonumber(decoded.createdAt) or -1
if version ~= tonumber(ARGV[2]) or created ~= tonumber(ARGV[3]) then
  return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[4])
if ARGV[5] ~= '' then
  redis.call('LREM', KEYS[2], 0, 'init')
  local entries = redis.call('LRANGE', KEYS[2], 0, -1)
  for _, raw in ipairs(entries) do
    local parsed, entry = pcall(cjson.decode, raw)
    if parsed and type(entry) == 'table' and entry.labId == ARGV[1] then
      redis.call('LREM', KEYS[2], 0, raw)
    end
  end
  redis.call('LPUSH', KEYS[2], ARGV[5])
end
return 1
";

// KEYS: instances, lab archive. ARGV: labId, new record.
// Archive fields are `{createdAt}:{sequence}`; the sequence keeps restarts
// within the same second apart.
const CREATE_INSTANCE_LUA: &str = r"
local prior = redis.call('HGET', KEYS[1], ARGV[1])
if prior then
  local created = 'unknown'
  local ok, decoded = pcall(cjson.decode, prior)
  if ok and type(decoded) == 'table' and decoded.createdAt then
    created = tostring(decoded.createdAt)
  end
  local sequence = redis.call('HLEN', KEYS[2]) + 1
  redis.call('HSET', KEYS[2], created .. ':' .. sequence, prior)
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
if prior then
  return 1
end
return 0
";

// KEYS: instances, monitor, lab archive. ARGV: labId.
const REMOVE_LAB_LUA: &str = r"
redis.call('HDEL', KEYS[1], ARGV[1])
redis.call('DEL', KEYS[3])
local removed = 0
local entries = redis.call('LRANGE', KEYS[2], 0, -1)
for _, raw in ipairs(entries) do
  local ok, entry = pcall(cjson.decode, raw)
  if ok and type(entry) == 'table' and entry.labId == ARGV[1] then
    removed = removed + redis.call('LREM', KEYS[2], 0, raw)
  end
end
return removed
";

// KEYS: monitor. ARGV: labId, now.
const TOUCH_MONITOR_LUA: &str = r"
local entries = redis.call('LRANGE', KEYS[1], 0, -1)
for i, raw in ipairs(entries) do
  local ok, entry = pcall(cjson.decode, raw)
  if ok and type(entry) == 'table' and entry.labId == ARGV[1] then
    entry.lastUpdatedAt = tonumber(ARGV[2])
    entry.status = 'active'
    redis.call('LSET', KEYS[1], i - 1, cjson.encode(entry))
    return 1
  end
end
return 0
";

/// [`LabStore`] over a multiplexed Redis connection.
pub struct RedisLabStore {
    conn: ConnectionManager,
    write_instance_script: Script,
    create_instance_script: Script,
    remove_lab_script: Script,
    touch_monitor_script: Script,
}

impl RedisLabStore {
    /// Connect to the Redis server at `uri`.
    pub async fn connect(uri: &str) -> Result<Self> {
        let client = redis::Client::open(uri)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to Redis lab state store");
        Ok(Self::with_connection(conn))
    }

    /// Connect using the `REDIS_URI` environment variable.
    pub async fn from_env() -> Result<Self> {
        let uri = std::env::var(ENV_REDIS_URI)
            .map_err(|_| StoreError::Config(format!("{ENV_REDIS_URI} is not set")))?;
        Self::connect(&uri).await
    }

    #[must_use]
    pub fn with_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            write_instance_script: Script::new(WRITE_INSTANCE_LUA),
            create_instance_script: Script::new(CREATE_INSTANCE_LUA),
            remove_lab_script: Script::new(REMOVE_LAB_LUA),
            touch_monitor_script: Script::new(TOUCH_MONITOR_LUA),
        }
    }

    async fn read_instance(&self, lab_id: &str) -> Result<Option<LabInstance>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(LAB_INSTANCES_KEY, lab_id).await?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(StoreError::from))
            .transpose()
    }

    /// Optimistic read-modify-write of one instance record.
    ///
    /// `mutate` may return a monitor entry, which is upserted in the same
    /// atomic step as the record write.
    async fn update_instance<F>(&self, lab_id: &str, mut mutate: F) -> Result<LabInstance>
    where
        F: FnMut(&mut LabInstance) -> Option<MonitoringEntry> + Send,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let mut instance = self
                .read_instance(lab_id)
                .await?
                .ok_or_else(|| StoreError::NotFound(lab_id.to_string()))?;

            let expected_version = instance.version;
            let expected_created_at = instance.created_at;
            let monitor = mutate(&mut instance);
            instance.version = expected_version + 1;

            let payload = serde_json::to_string(&instance)?;
            let monitor_payload = match &monitor {
                Some(entry) => serde_json::to_string(entry)?,
                None => String::new(),
            };

            let mut conn = self.conn.clone();
            let outcome: i64 = self
                .write_instance_script
                .key(LAB_INSTANCES_KEY)
                .key(LABS_MONITOR_KEY)
                .arg(lab_id)
                .arg(expected_version)
                .arg(expected_created_at)
                .arg(payload)
                .arg(monitor_payload)
                .invoke_async(&mut conn)
                .await?;

            match outcome {
                1 => {
                    if monitor.is_some() {
                        info!(lab_id = %lab_id, "✅ Lab is now monitored");
                    }
                    return Ok(instance);
                }
                -1 => return Err(StoreError::NotFound(lab_id.to_string())),
                _ => {
                    debug!(lab_id = %lab_id, attempt, "Instance write lost a race, retrying");
                    tokio::time::sleep(Duration::from_millis(5 * u64::from(attempt))).await;
                }
            }
        }

        warn!(lab_id = %lab_id, "Giving up on instance write after repeated conflicts");
        Err(StoreError::Conflict {
            lab_id: lab_id.to_string(),
            attempts: MAX_WRITE_ATTEMPTS,
        })
    }
}

#[async_trait]
impl LabStore for RedisLabStore {
    async fn initialize(&self) -> Result<()> {
        let mut conn = self.conn.clone();

        let monitor_exists: bool = conn.exists(LABS_MONITOR_KEY).await?;
        if !monitor_exists {
            let _: () = conn.lpush(LABS_MONITOR_KEY, INIT_SENTINEL).await?;
            let _: () = conn.lrem(LABS_MONITOR_KEY, 1, INIT_SENTINEL).await?;
        }

        let instances_exist: bool = conn.exists(LAB_INSTANCES_KEY).await?;
        if !instances_exist {
            let _: () = conn
                .hset(LAB_INSTANCES_KEY, INIT_SENTINEL, INIT_SENTINEL)
                .await?;
            let _: () = conn.hdel(LAB_INSTANCES_KEY, INIT_SENTINEL).await?;
        }

        info!("Redis lab queues and hash maps initialized");
        Ok(())
    }

    async fn create_instance(&self, instance: LabInstance) -> Result<()> {
        let payload = serde_json::to_string(&instance)?;
        let mut conn = self.conn.clone();
        let replaced: i64 = self
            .create_instance_script
            .key(LAB_INSTANCES_KEY)
            .key(archive_key(&instance.lab_id))
            .arg(&instance.lab_id)
            .arg(payload)
            .invoke_async(&mut conn)
            .await?;

        if replaced == 1 {
            info!(lab_id = %instance.lab_id, "Archived previous lab instance record");
        }
        info!(lab_id = %instance.lab_id, "Lab instance created");
        Ok(())
    }

    async fn get_instance(&self, lab_id: &str) -> Result<Option<LabInstance>> {
        self.read_instance(lab_id).await
    }

    async fn archived_instances(&self, lab_id: &str) -> Result<Vec<LabInstance>> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn.hgetall(archive_key(lab_id)).await?;
        let mut archived = raw
            .into_iter()
            .map(|(field, record)| {
                let sequence = field
                    .rsplit(':')
                    .next()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or_default();
                serde_json::from_str::<LabInstance>(&record).map(|instance| (sequence, instance))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        archived.sort_by_key(|(sequence, _)| *sequence);
        Ok(archived.into_iter().map(|(_, instance)| instance).collect())
    }

    async fn append_progress(&self, lab_id: &str, entry: ProgressEntry) -> Result<LabInstance> {
        self.update_instance(lab_id, |instance| {
            instance.append(entry.clone());
            monitor_entry_for(instance, &entry)
        })
        .await
    }

    async fn record_dirty_read(&self, lab_id: &str, path: &str) -> Result<()> {
        self.update_instance(lab_id, |instance| {
            instance.mark_dirty_read(path);
            None
        })
        .await
        .map(|_| ())
    }

    async fn remove_lab(&self, lab_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .remove_lab_script
            .key(LAB_INSTANCES_KEY)
            .key(LABS_MONITOR_KEY)
            .key(archive_key(lab_id))
            .arg(lab_id)
            .invoke_async(&mut conn)
            .await?;
        info!(lab_id = %lab_id, monitor_entries_removed = removed, "Lab removed from state store");
        Ok(())
    }

    async fn active_lab_count(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(LABS_MONITOR_KEY).await?;
        Ok(len)
    }

    async fn monitor_entries(&self) -> Result<Vec<MonitoringEntry>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(LABS_MONITOR_KEY, 0, -1).await?;
        Ok(raw
            .iter()
            .filter(|value| value.as_str() != INIT_SENTINEL)
            .filter_map(|value| match serde_json::from_str(value) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed monitor entry");
                    None
                }
            })
            .collect())
    }

    async fn touch_monitor_entry(&self, lab_id: &str, now: i64) -> Result<bool> {
        let mut conn = self.conn.clone();
        let touched: i64 = self
            .touch_monitor_script
            .key(LABS_MONITOR_KEY)
            .arg(lab_id)
            .arg(now)
            .invoke_async(&mut conn)
            .await?;
        if touched == 0 {
            debug!(lab_id = %lab_id, "No monitor entry to refresh");
        }
        Ok(touched == 1)
    }
}
