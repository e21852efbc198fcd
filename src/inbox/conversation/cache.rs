//! 会话详情持久缓存
//!
//! 基于 SQLite（sqlx）的键值缓存：每个会话一条记录，键带固定命名空间前缀，
//! 值为 JSON 序列化的缓存条目（详情快照 + 落盘时间）。
//!
//! 缓存只是性能优化，不是正确性依赖：任何底层存储故障（磁盘满、表损坏等）
//! 一律捕获并记录日志，绝不向调用方抛出；所有读路径都必须容忍缓存完全为空。

use crate::inbox::types::{CacheEntry, ConversationDetail};
use anyhow::{Context, Result};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, warn};

/// 缓存键命名空间前缀
const KEY_PREFIX: &str = "conv:";

/// 条目存活时间：24 小时
pub const TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// 容量上限：插入触发清理后最多保留的条目数
pub const MAX_ENTRIES: i64 = 50;

/// 会话缓存（基于 sqlx）
pub struct ConversationCache {
    db: Pool<Sqlite>,
}

impl ConversationCache {
    /// 创建新的会话缓存
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 初始化缓存表结构
    pub async fn init_db(&self) -> Result<()> {
        Self::init_db_with_connection(&self.db).await
    }

    /// 使用共享连接初始化缓存表结构（静态方法）
    pub async fn init_db_with_connection(db: &Pool<Sqlite>) -> Result<()> {
        info!("[ConvCache/DB] 初始化会话缓存表结构");

        let sql = r#"
            CREATE TABLE IF NOT EXISTS conversation_cache (
                cache_key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                stored_at INTEGER NOT NULL
            )
        "#;
        sqlx::query(sql)
            .execute(db)
            .await
            .context("创建会话缓存表失败")?;

        Ok(())
    }

    fn cache_key(conversation_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, conversation_id)
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// 读取缓存的会话详情
    ///
    /// 无条目、条目损坏（顺带删除）、条目超过 TTL（顺带删除）都返回 None。
    /// 读取不会刷新 stored_at。
    pub async fn get(&self, conversation_id: &str) -> Option<ConversationDetail> {
        self.get_at(conversation_id, Self::now_ms()).await
    }

    /// 写入/覆盖会话详情，stored_at 取当前时间，随后执行容量与损坏清理
    pub async fn put(&self, detail: &ConversationDetail) {
        self.put_at(detail, Self::now_ms()).await
    }

    /// 按显式时间读取（测试用同一入口）
    pub(crate) async fn get_at(&self, conversation_id: &str, now: i64) -> Option<ConversationDetail> {
        match self.try_get(conversation_id, now).await {
            Ok(detail) => detail,
            Err(e) => {
                warn!("[ConvCache] 读取缓存失败，当作未命中: {}", e);
                None
            }
        }
    }

    /// 按显式时间写入（测试用同一入口）
    pub(crate) async fn put_at(&self, detail: &ConversationDetail, now: i64) {
        if let Err(e) = self.try_put(detail, now).await {
            warn!("[ConvCache] 写入缓存失败，忽略: {}", e);
        }
    }

    async fn try_get(&self, conversation_id: &str, now: i64) -> Result<Option<ConversationDetail>> {
        let key = Self::cache_key(conversation_id);
        let row = sqlx::query(
            r#"
            SELECT payload, stored_at FROM conversation_cache WHERE cache_key = ?
            "#,
        )
        .bind(&key)
        .fetch_optional(&self.db)
        .await
        .context("查询缓存条目失败")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload: String = row.get("payload");
        let entry: CacheEntry = match serde_json::from_str(&payload) {
            Ok(entry) => entry,
            Err(e) => {
                // 损坏的记录在第一次读到时就删除，不容忍留存
                warn!(
                    "[ConvCache] 缓存条目损坏，删除: conversationID={}, 错误: {}",
                    conversation_id, e
                );
                self.delete_key(&key).await?;
                return Ok(None);
            }
        };

        if now - entry.stored_at > TTL_MS {
            debug!(
                "[ConvCache] 缓存条目过期，删除: conversationID={}, storedAt={}",
                conversation_id, entry.stored_at
            );
            self.delete_key(&key).await?;
            return Ok(None);
        }

        Ok(Some(entry.data))
    }

    async fn try_put(&self, detail: &ConversationDetail, now: i64) -> Result<()> {
        let key = Self::cache_key(detail.conversation_id());
        let entry = CacheEntry {
            data: detail.clone(),
            stored_at: now,
        };
        let payload = serde_json::to_string(&entry).context("序列化缓存条目失败")?;

        sqlx::query(
            r#"
            INSERT INTO conversation_cache (cache_key, payload, stored_at)
            VALUES (?, ?, ?)
            ON CONFLICT(cache_key) DO UPDATE SET
                payload = excluded.payload,
                stored_at = excluded.stored_at
            "#,
        )
        .bind(&key)
        .bind(&payload)
        .bind(now)
        .execute(&self.db)
        .await
        .context("写入缓存条目失败")?;

        self.cleanup().await
    }

    /// 插入触发的清理：删除所有损坏条目，超容量时按 stored_at 升序淘汰最旧的
    async fn cleanup(&self) -> Result<()> {
        let rows = sqlx::query(
            r#"
            SELECT cache_key, payload, stored_at FROM conversation_cache
            WHERE cache_key LIKE ?
            "#,
        )
        .bind(format!("{}%", KEY_PREFIX))
        .fetch_all(&self.db)
        .await
        .context("枚举缓存条目失败")?;

        let mut surviving: Vec<(String, i64)> = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.get("cache_key");
            let payload: String = row.get("payload");
            let stored_at: i64 = row.get("stored_at");

            if serde_json::from_str::<CacheEntry>(&payload).is_err() {
                warn!("[ConvCache] 清理：删除损坏条目 {}", key);
                self.delete_key(&key).await?;
                continue;
            }
            surviving.push((key, stored_at));
        }

        let excess = surviving.len() as i64 - MAX_ENTRIES;
        if excess > 0 {
            surviving.sort_by_key(|(_, stored_at)| *stored_at);
            info!(
                "[ConvCache] 清理：超出容量 {} 条，淘汰最旧条目",
                excess
            );
            for (key, _) in surviving.iter().take(excess as usize) {
                self.delete_key(key).await?;
            }
        }

        Ok(())
    }

    /// 删除指定会话的缓存条目（不存在则无操作）
    pub async fn remove(&self, conversation_id: &str) {
        let key = Self::cache_key(conversation_id);
        if let Err(e) = self.delete_key(&key).await {
            warn!("[ConvCache] 删除缓存条目失败，忽略: {}", e);
        }
    }

    /// 清空命名空间下的全部条目
    pub async fn clear(&self) {
        let result = sqlx::query(
            r#"
            DELETE FROM conversation_cache WHERE cache_key LIKE ?
            "#,
        )
        .bind(format!("{}%", KEY_PREFIX))
        .execute(&self.db)
        .await;
        if let Err(e) = result {
            warn!("[ConvCache] 清空缓存失败，忽略: {}", e);
        }
    }

    async fn delete_key(&self, key: &str) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM conversation_cache WHERE cache_key = ?
            "#,
        )
        .bind(key)
        .execute(&self.db)
        .await
        .context("删除缓存条目失败")?;
        Ok(())
    }
}
