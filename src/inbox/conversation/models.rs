//! 会话同步配置

/// 会话同步配置
pub struct SyncConfig {
    /// 用户 ID
    pub user_id: String,
    /// API 基础 URL
    pub api_base_url: String,
    /// Token
    pub token: String,
    /// 本地缓存使用的 SQLite 数据库 URL，可以是：
    /// - 相对路径：如 "inbox_cache.db" 会转换为 "sqlite://inbox_cache.db?mode=rwc"
    /// - 完整 URL：如 "sqlite://inbox_cache.db?mode=rwc" 直接使用
    pub cache_db_url: String,
}

impl SyncConfig {
    /// 规范化后的数据库连接 URL
    pub fn database_url(&self) -> String {
        if self.cache_db_url.starts_with("sqlite:") {
            self.cache_db_url.clone()
        } else {
            format!("sqlite://{}?mode=rwc", self.cache_db_url)
        }
    }
}
