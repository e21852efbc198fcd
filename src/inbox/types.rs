use serde::{Deserialize, Serialize};
use tracing::debug;

/// 消息平台类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Whatsapp,
    Instagram,
    Facebook,
}

/// 联系人引用（会话归属的联系人）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRef {
    /// 联系人 ID
    #[serde(rename = "contactID")]
    pub contact_id: String,
    /// 显示名称（服务器可能不返回）
    #[serde(default)]
    pub display_name: String,
    /// 头像 URL（服务器可能不返回）
    #[serde(default)]
    pub avatar_url: String,
}

/// 会话摘要（列表接口返回的条目）
///
/// 一经拉取即视为不可变，只能通过重新拉取刷新
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    /// 会话 ID（全局唯一，不透明字符串）
    #[serde(rename = "conversationID")]
    pub conversation_id: String,
    /// 会话所在平台
    pub platform: Platform,
    /// 联系人引用
    pub contact: ContactRef,
    /// 最新消息预览（可能为空字符串）
    #[serde(default)]
    pub last_message_preview: String,
    /// 最新消息时间（毫秒时间戳，会话无消息时为空）
    #[serde(default)]
    pub last_message_at: Option<i64>,
    /// 未读消息数（非负）
    #[serde(default)]
    pub unread_count: i32,
    /// 是否置顶
    #[serde(default)]
    pub is_pinned: bool,
    /// 是否归档
    #[serde(default)]
    pub is_archived: bool,
}

/// 单条消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// 消息 ID
    #[serde(rename = "messageID")]
    pub message_id: String,
    /// 发送者 ID
    #[serde(rename = "senderID", default)]
    pub sender_id: String,
    /// 消息正文
    #[serde(default)]
    pub content: String,
    /// 发送时间（毫秒时间戳）
    #[serde(default)]
    pub sent_at: i64,
}

/// 会话详情（摘要 + 按时间升序的消息序列）
///
/// 当前选中会话的详情由 ConversationStore 独占持有，
/// 缓存中的副本是独立快照，不是共享可变状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub summary: ConversationSummary,
    /// 消息列表（升序，服务器视角只追加）
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl ConversationDetail {
    /// 会话 ID
    pub fn conversation_id(&self) -> &str {
        &self.summary.conversation_id
    }

    /// 最后一条消息的 ID（无消息时为 None）
    pub fn last_message_id(&self) -> Option<&str> {
        self.messages.last().map(|m| m.message_id.as_str())
    }
}

/// 缓存条目：详情快照 + 落盘时间
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub data: ConversationDetail,
    pub stored_at: i64,
}

/// 推送事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushEventKind {
    /// 新消息
    NewMessage,
    /// 会话属性变更（置顶 / 归档 / 联系人信息等）
    ConversationUpdated,
    /// 服务端完成了一轮会话同步
    ChatsSynced,
    /// 对方正在输入
    TypingStatus,
    /// 在线状态变更
    PresenceChanged,
}

/// 推送事件（瞬态，从不落盘）
#[derive(Debug, Clone)]
pub struct PushEvent {
    pub kind: PushEventKind,
    /// 相关会话 ID（部分事件不携带）
    pub conversation_id: Option<String>,
}

/// 推送事件信封（原始 JSON 结构）
#[derive(Debug, Deserialize)]
struct PushEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "conversationId", default)]
    conversation_id: Option<String>,
}

impl PushEvent {
    /// 从信封 JSON 解析推送事件
    ///
    /// 未知的 type 和格式错误的信封都静默忽略（返回 None），不视为错误
    pub fn parse(text: &str) -> Option<PushEvent> {
        let envelope: PushEnvelope = match serde_json::from_str(text) {
            Ok(e) => e,
            Err(e) => {
                debug!("[Client] 忽略无法解析的推送信封: {}", e);
                return None;
            }
        };

        let kind = match envelope.kind.as_str() {
            "new_message" => PushEventKind::NewMessage,
            "conversation_updated" => PushEventKind::ConversationUpdated,
            "chats_synced" => PushEventKind::ChatsSynced,
            "typing_status" => PushEventKind::TypingStatus,
            "presence_changed" => PushEventKind::PresenceChanged,
            other => {
                debug!("[Client] 忽略未知推送事件类型: {}", other);
                return None;
            }
        };

        Some(PushEvent {
            kind,
            conversation_id: envelope.conversation_id,
        })
    }
}

/// 分页窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    /// 偏移量（>= 0）
    pub offset: i64,
    /// 每页条数（> 0）
    pub limit: i64,
}

/// 分页结果（列表接口单页响应）
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    /// 本页会话（保持服务器返回顺序）
    #[serde(rename = "conversations")]
    pub items: Vec<ConversationSummary>,
    /// 满足过滤条件的会话总数
    #[serde(default)]
    pub total: i64,
    /// 是否还有后续页
    #[serde(default)]
    pub has_more: bool,
}

/// 统一的 API 响应包装结构体（包含 errCode、errMsg、data）
/// data 字段可能为 null 或缺失，因此使用 Option<T>
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(rename = "errCode")]
    pub err_code: i32,
    #[serde(rename = "errMsg")]
    pub err_msg: String,
    pub data: Option<T>,
}

/// 通用 HTTP 响应处理函数：直接反序列化为统一的响应结构体
/// 返回 `ApiResponse<T>`，调用方可以根据需要处理 `data` 字段（可能为 None）
pub async fn handle_http_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> anyhow::Result<ApiResponse<T>> {
    use anyhow::Context;
    use tracing::{debug, error};

    let status = response.status();

    // 读取 body bytes（只能读取一次）
    let body_bytes = response.bytes().await.context("读取响应 body 失败")?;
    let body_str = String::from_utf8_lossy(&body_bytes);

    if !status.is_success() {
        error!(
            "[HTTP] {}请求失败，HTTP状态: {}, 响应: {}",
            operation_name, status, body_str
        );
        return Err(anyhow::anyhow!("HTTP 错误 {}: {}", status, body_str));
    }
    debug!("[HTTP] {}请求成功，HTTP状态: {}", operation_name, status);

    // 从 bytes 反序列化（因为 body 已经被消费了）
    let api_resp: ApiResponse<T> = serde_json::from_slice(&body_bytes).map_err(|e| {
        error!(
            "[HTTP] {}反序列化失败: {:?}\n原始响应: {}",
            operation_name, e, body_str
        );
        anyhow::anyhow!("反序列化响应失败: {:?}", e)
    })?;

    // 检查错误码
    if api_resp.err_code != 0 {
        error!(
            "[HTTP] {}服务器错误，错误码: {}, 错误信息: {}",
            operation_name, api_resp.err_code, api_resp.err_msg
        );
        return Err(anyhow::anyhow!(
            "服务器错误 {}: {}",
            api_resp.err_code,
            api_resp.err_msg
        ));
    }

    Ok(api_resp)
}
