//! 收件箱客户端核心实现模块
//!
//! 负责 WebSocket 推送通道的建立与帧解析，并把会话存储、失效调度器、
//! 持久缓存和 HTTP 后端装配起来。

use crate::inbox::conversation::{
    api::ConversationApi,
    cache::ConversationCache,
    listener::{ConversationListener, EmptyConversationListener},
    models::SyncConfig,
    scheduler::InvalidationScheduler,
    store::ConversationStore,
};
use crate::inbox::serialization::decompress_gzip;
use crate::inbox::types::{
    ConversationDetail, ConversationSummary, Platform, PushEvent, PushEventKind,
};
use anyhow::{Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::interval;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

/// WebSocket 写入端类型别名
pub type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// WebSocket 读取端类型别名
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// 客户端配置
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// 用户 ID
    pub user_id: String,
    /// 认证 token
    pub token: String,
    /// WebSocket 推送服务器 URL
    pub ws_url: String,
    /// 压缩方式，例如 "gzip" 或空字符串表示不压缩
    pub compression: String,
    /// HTTP API 基础地址
    pub api_base_url: String,
    /// 会话详情缓存使用的本地 SQLite 数据库 URL
    ///
    /// 例如：`sqlite://inbox_cache.db?mode=rwc`
    pub cache_db_url: String,
}

impl ClientConfig {
    /// 创建默认配置
    pub fn new(user_id: String, token: String) -> Self {
        Self {
            user_id,
            token,
            ws_url: "ws://localhost:10001".to_string(),
            compression: "gzip".to_string(),
            api_base_url: "http://localhost:10002".to_string(),
            cache_db_url: "sqlite://inbox_cache.db?mode=rwc".to_string(),
        }
    }
}

/// WebSocket 连接鉴权响应
#[derive(Debug, serde::Deserialize)]
struct ConnectAck {
    #[serde(rename = "errCode")]
    err_code: i32,
    #[serde(rename = "errMsg", default)]
    err_msg: String,
}

/// 收件箱客户端
///
/// 聚合三个平台会话的统一客户端入口
#[derive(Clone)]
pub struct InboxClient {
    pub(crate) config: ClientConfig,
    writer: Option<Arc<Mutex<WsWriter>>>,
    // 会话监听器（可由调用方注册，须在 connect 前设置）
    listener: Arc<dyn ConversationListener>,
    // 会话存储（connect 成功后可用）
    pub(crate) store: Option<Arc<ConversationStore>>,
    // 推送事件注入通道（与调度器共用）
    events_tx: Option<mpsc::Sender<PushEvent>>,
}

impl InboxClient {
    /// 创建新的客户端
    /// - `config`: 客户端配置
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            writer: None,
            listener: Arc::new(EmptyConversationListener),
            store: None,
            events_tx: None,
        }
    }

    /// 注册会话监听器（在 connect 之前调用）
    pub fn set_conversation_listener(&mut self, listener: Arc<dyn ConversationListener>) {
        self.listener = listener;
    }

    /// 构建 WebSocket 连接 URL
    fn build_url(&self, operation_id: &str) -> String {
        let compression_param = if self.config.compression.is_empty() {
            String::new()
        } else {
            format!("&compression={}", self.config.compression)
        };

        format!(
            "{}/?token={}&sendID={}&operationID={}{}",
            self.config.ws_url, self.config.token, self.config.user_id, operation_id,
            compression_param
        )
    }

    /// 连接到服务器并在内部启动推送处理
    pub async fn connect(&mut self) -> Result<()> {
        let operation_id = format!("{}", chrono::Utc::now().timestamp_millis());
        let url = self.build_url(&operation_id);

        info!(
            "[Client] 🔗 连接到推送服务器 (user={})",
            self.config.user_id
        );

        let (ws_stream, response) = connect_async(&url).await?;
        info!(
            "[Client] ✅ WebSocket 连接成功, 状态: {}",
            response.status()
        );

        let (write, mut read) = ws_stream.split();
        let writer = Arc::new(Mutex::new(write));
        self.writer = Some(writer.clone());

        // 等待连接鉴权响应
        if let Some(Ok(WsMessage::Text(text))) = read.next().await {
            debug!("[Client] 📥 WebSocket 连接响应: {}", text);
            match serde_json::from_str::<ConnectAck>(&text) {
                Ok(ack) => {
                    if ack.err_code == 0 {
                        info!("[Client] ✅ 服务器连接鉴权成功");
                        let listener = self.listener.clone();
                        tokio::spawn(async move {
                            listener
                                .on_connection_status_changed(true, "连接成功".to_string())
                                .await;
                        });
                    } else {
                        error!(
                            "[Client] ❌ WebSocket 连接失败，错误码: {}, 错误信息: {}",
                            ack.err_code, ack.err_msg
                        );
                        return Err(anyhow::anyhow!(
                            "WebSocket 连接失败，错误码: {}, 错误信息: {}",
                            ack.err_code,
                            ack.err_msg
                        ));
                    }
                }
                Err(e) => {
                    error!(
                        "[Client] ❌ WebSocket 响应解析失败: {}, 原始响应: {}",
                        e, text
                    );
                    return Err(anyhow::anyhow!(
                        "WebSocket 响应解析失败: {}, 原始响应: {}",
                        e,
                        text
                    ));
                }
            }
        } else {
            error!("[Client] ❌ 未收到 WebSocket 连接响应");
            return Err(anyhow::anyhow!("未收到 WebSocket 连接响应"));
        }

        // 创建缓存数据库连接池
        let sync_cfg = SyncConfig {
            user_id: self.config.user_id.clone(),
            api_base_url: self.config.api_base_url.clone(),
            token: self.config.token.clone(),
            cache_db_url: self.config.cache_db_url.clone(),
        };
        let db_url = sync_cfg.database_url();
        info!("[Client] 🔗 创建缓存数据库连接: {}", db_url);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .context(format!("连接SQLite数据库失败: {}", db_url))?;

        info!("[Client] 📋 初始化数据库表结构");
        ConversationCache::init_db_with_connection(&pool).await?;
        let cache = ConversationCache::new(pool);

        // 创建带认证拦截器的 HTTP 客户端（token 通过 default_headers 自动添加）
        let http_client = reqwest::ClientBuilder::new()
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::HeaderName::from_static("token"),
                    reqwest::header::HeaderValue::from_str(&sync_cfg.token)
                        .context("无效的 token")?,
                );
                headers
            })
            .build()
            .context("创建 HTTP 客户端失败")?;
        let api = ConversationApi::new(http_client, sync_cfg.api_base_url, sync_cfg.user_id);

        // 装配：推送事件 -> 调度器 -> 刷新命令 -> 会话存储
        let (events_tx, events_rx) = mpsc::channel::<PushEvent>(256);
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let selected = Arc::new(RwLock::new(None));

        let scheduler = InvalidationScheduler::new(events_rx, commands_tx, selected.clone());
        tokio::spawn(scheduler.run());

        let store = Arc::new(ConversationStore::new(
            Arc::new(api),
            cache,
            self.listener.clone(),
            events_tx.clone(),
            selected,
        ));
        self.store = Some(store.clone());
        self.events_tx = Some(events_tx);

        tokio::spawn(store.clone().run_refresh_loop(commands_rx));

        // 初始全量刷新：连接成功即拉一次列表
        tokio::spawn(async move {
            info!("[Client] 🔄 启动初始会话列表刷新");
            store.refresh_list().await;
        });

        // 启动心跳
        info!("[Client] 💓 启动心跳");
        let writer_for_heartbeat = writer.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(25));
            loop {
                ticker.tick().await;
                let mut w = writer_for_heartbeat.lock().await;
                if w.send(WsMessage::Ping(vec![])).await.is_err() {
                    break;
                }
            }
        });

        // 在内部启动推送处理任务
        info!("[Client] 📥 开始监听服务器推送");
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client.handle_messages(read).await {
                error!("推送处理错误: {}", e);
            }
        });

        Ok(())
    }

    /// 处理接收推送（事件循环）
    async fn handle_messages(&self, mut read: WsReader) -> Result<()> {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(WsMessage::Text(text)) => {
                    self.handle_push_text(&text).await;
                }
                Ok(WsMessage::Binary(data)) => {
                    if let Some(text) = Self::decode_push_frame(data) {
                        self.handle_push_text(&text).await;
                    }
                }
                Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {}
                Ok(WsMessage::Close(frame)) => {
                    warn!("[Client] 👋 连接关闭: {:?}", frame);
                    self.notify_disconnected("连接关闭".to_string());
                    break;
                }
                Err(e) => {
                    error!("[Client] WebSocket 错误: {}", e);
                    self.notify_disconnected(format!("WebSocket 错误: {}", e));
                    break;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// 解码二进制推送帧：按 gzip 魔数判断是否需要解压，返回 UTF-8 文本
    fn decode_push_frame(data: Vec<u8>) -> Option<String> {
        let decompressed = if data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b {
            match decompress_gzip(&data) {
                Ok(d) => d,
                Err(e) => {
                    error!("[Client] 解压失败: {}", e);
                    return None;
                }
            }
        } else {
            data
        };

        match String::from_utf8(decompressed) {
            Ok(text) => Some(text),
            Err(e) => {
                error!("[Client] 推送帧不是合法 UTF-8: {}", e);
                None
            }
        }
    }

    /// 解析推送信封并分发
    ///
    /// 输入事件只透传回调，在线状态事件当前无消费方；其余事件
    /// 进入调度器走去抖刷新路径。未知信封静默忽略。
    async fn handle_push_text(&self, text: &str) {
        let Some(event) = PushEvent::parse(text) else {
            return;
        };

        match event.kind {
            PushEventKind::TypingStatus => {
                if let (Some(store), Some(conversation_id)) = (&self.store, event.conversation_id)
                {
                    store.notify_typing(conversation_id);
                }
            }
            PushEventKind::PresenceChanged => {
                debug!("[Client] 在线状态变更事件，忽略");
            }
            _ => {
                if let Some(events_tx) = &self.events_tx {
                    if events_tx.send(event).await.is_err() {
                        error!("[Client] 事件通道已关闭，推送事件丢失");
                    }
                }
            }
        }
    }

    fn notify_disconnected(&self, message: String) {
        let listener = self.listener.clone();
        tokio::spawn(async move {
            listener.on_connection_status_changed(false, message).await;
        });
    }

    fn store(&self) -> Result<&Arc<ConversationStore>> {
        self.store.as_ref().ok_or_else(|| anyhow::anyhow!("未连接"))
    }

    /// 选中会话（None 表示取消选中）
    pub async fn select_conversation(&self, conversation_id: Option<String>) -> Result<()> {
        self.store()?.select_conversation(conversation_id).await;
        Ok(())
    }

    /// 设置平台过滤条件（None 表示全部平台）
    pub async fn set_platform_filter(&self, filter: Option<Platform>) -> Result<()> {
        self.store()?.set_platform_filter(filter).await;
        Ok(())
    }

    /// 手动触发列表硬重置
    pub async fn refresh_conversation_list(&self) -> Result<()> {
        self.store()?.refresh_list().await;
        Ok(())
    }

    /// 拉取下一页会话
    pub async fn load_more_conversations(&self) -> Result<()> {
        self.store()?.load_more().await;
        Ok(())
    }

    /// 发送文本消息
    pub async fn send_message(&self, conversation_id: &str, content: &str) -> Result<()> {
        self.store()?.send_message(conversation_id, content).await
    }

    /// 设置会话置顶状态
    pub async fn set_pinned(&self, conversation_id: &str, pinned: bool) -> Result<()> {
        self.store()?.set_pinned(conversation_id, pinned).await
    }

    /// 设置会话归档状态
    pub async fn set_archived(&self, conversation_id: &str, archived: bool) -> Result<()> {
        self.store()?.set_archived(conversation_id, archived).await
    }

    /// 当前有序会话列表
    pub async fn get_conversation_list(&self) -> Result<Vec<ConversationSummary>> {
        Ok(self.store()?.conversation_list().await)
    }

    /// 当前选中会话详情
    pub async fn get_selected_conversation(&self) -> Result<Option<Arc<ConversationDetail>>> {
        Ok(self.store()?.selected_detail().await)
    }

    /// 总未读消息数
    pub async fn get_total_unread_count(&self) -> Result<i32> {
        Ok(self.store()?.total_unread_count().await)
    }
}
