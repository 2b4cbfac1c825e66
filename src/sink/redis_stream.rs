use async_trait::async_trait;
use chrono::SecondsFormat;
use redis::aio::ConnectionManager;
use tokio::sync::Mutex;

use super::{Ack, MetricsSink, Point};
use crate::error::WriteError;

const KEY_PREFIX: &str = "hostwatch";

/// Appends points to one Redis stream per measurement
/// (`XADD hostwatch:<measurement> MAXLEN ~ N * ...`).
///
/// `ConnectionManager` is cheaply cloneable and reconnects on its own; the
/// first connection is made on the first write, so a missing Redis at
/// startup surfaces as a `WriteError` per cycle rather than a crash.
pub struct RedisSink {
    client: redis::Client,
    conn: Mutex<Option<ConnectionManager>>,
    max_len: usize,
}

impl RedisSink {
    pub fn new(url: &str, max_len: usize) -> Result<Self, WriteError> {
        let client = redis::Client::open(url)
            .map_err(|e| WriteError::Unavailable(format!("invalid Redis URL \"{url}\": {e}")))?;

        Ok(Self {
            client,
            conn: Mutex::new(None),
            max_len: max_len.max(1),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, WriteError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = ConnectionManager::new(self.client.clone()).await?;
        tracing::info!("connected to Redis sink");
        *guard = Some(conn.clone());
        Ok(conn)
    }
}

pub fn stream_key(measurement: &str) -> String {
    format!("{KEY_PREFIX}:{measurement}")
}

/// Flat field/value list of one stream entry: `ts`, then `tag.<k>` per tag,
/// then each numeric field.
pub fn entry_fields(point: &Point) -> Vec<(String, String)> {
    let mut out = Vec::with_capacity(1 + point.tags.len() + point.fields.len());
    out.push((
        "ts".to_owned(),
        point.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
    ));
    out.extend(point.tags.iter().map(|(k, v)| (format!("tag.{k}"), v.clone())));
    out.extend(point.fields.iter().map(|(k, v)| (k.clone(), v.to_string())));
    out
}

#[async_trait]
impl MetricsSink for RedisSink {
    async fn write(&self, point: &Point) -> Result<Ack, WriteError> {
        point.validate()?;
        let mut conn = self.connection().await?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream_key(&point.measurement))
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_len)
            .arg("*");
        for (k, v) in entry_fields(point) {
            cmd.arg(k).arg(v);
        }

        let id: String = cmd.query_async(&mut conn).await?;
        Ok(Ack { id: Some(id) })
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
