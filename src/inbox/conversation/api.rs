//! 会话 HTTP API 客户端
//!
//! 负责所有会话相关的 HTTP 请求

use crate::inbox::serialization::generate_msg_id;
use crate::inbox::types::{
    handle_http_response, ConversationDetail, PageResult, PageWindow, Platform,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

/// 会话数据后端接口（列表 / 详情 / 变更操作）
///
/// 由 HTTP API 客户端实现；测试中可用内存假实现替换
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    /// 分页拉取会话列表
    async fn fetch_page(
        &self,
        window: PageWindow,
        filter: Option<Platform>,
    ) -> Result<PageResult>;

    /// 拉取单个会话详情
    async fn fetch_detail(&self, conversation_id: &str) -> Result<ConversationDetail>;

    /// 发送文本消息
    async fn send_message(&self, conversation_id: &str, content: &str) -> Result<()>;

    /// 设置置顶状态
    async fn set_pinned(&self, conversation_id: &str, pinned: bool) -> Result<()>;

    /// 设置归档状态
    async fn set_archived(&self, conversation_id: &str, archived: bool) -> Result<()>;
}

/// 会话相关的 HTTP API 客户端
pub struct ConversationApi {
    client: reqwest::Client,
    api_base_url: String,
    user_id: String,
}

impl ConversationApi {
    /// 创建新的会话 API 客户端
    ///
    /// `client` 应该已经在外部配置好认证拦截器
    pub fn new(client: reqwest::Client, api_base_url: String, user_id: String) -> Self {
        Self {
            client,
            api_base_url,
            user_id,
        }
    }

    /// 发送 POST 请求并解包统一响应信封
    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
        operation_name: &str,
    ) -> Result<T> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!("{}{}", self.api_base_url, path);

        debug!(
            "[ConvAPI]   请求URL: {}, 用户ID: {}, 操作ID: {}",
            url, self.user_id, operation_id
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .json(&body)
            .send()
            .await
            .context("请求失败")?;

        let api_resp = handle_http_response::<T>(response, operation_name).await?;
        api_resp
            .data
            .ok_or_else(|| anyhow::anyhow!("响应中缺少 data 字段"))
    }

    /// 发送无返回数据的 POST 请求（只校验错误码）
    async fn post_ack(
        &self,
        path: &str,
        body: serde_json::Value,
        operation_name: &str,
    ) -> Result<()> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!("{}{}", self.api_base_url, path);

        debug!(
            "[ConvAPI]   请求URL: {}, 用户ID: {}, 操作ID: {}",
            url, self.user_id, operation_id
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .json(&body)
            .send()
            .await
            .context("请求失败")?;

        // data 为空也算成功，只检查信封错误码
        handle_http_response::<serde_json::Value>(response, operation_name).await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationBackend for ConversationApi {
    async fn fetch_page(
        &self,
        window: PageWindow,
        filter: Option<Platform>,
    ) -> Result<PageResult> {
        info!(
            "[ConvAPI] 📡 请求会话列表: offset={}, limit={}, platform={:?}",
            window.offset, window.limit, filter
        );

        let page: PageResult = self
            .post_json(
                "/conversation/get_conversation_list",
                serde_json::json!({
                    "userID": self.user_id,
                    "platform": filter,
                    "offset": window.offset,
                    "limit": window.limit,
                }),
                "会话列表",
            )
            .await?;

        info!(
            "[ConvAPI] ✅ 会话列表响应: 本页 {} 条, 总数 {}, hasMore={}",
            page.items.len(),
            page.total,
            page.has_more
        );
        Ok(page)
    }

    async fn fetch_detail(&self, conversation_id: &str) -> Result<ConversationDetail> {
        info!("[ConvAPI] 📡 请求会话详情: conversationID={}", conversation_id);

        let detail: ConversationDetail = self
            .post_json(
                "/conversation/get_conversation_detail",
                serde_json::json!({
                    "userID": self.user_id,
                    "conversationID": conversation_id,
                }),
                "会话详情",
            )
            .await?;

        info!(
            "[ConvAPI] ✅ 会话详情响应: conversationID={}, 消息数 {}",
            detail.conversation_id(),
            detail.messages.len()
        );
        Ok(detail)
    }

    async fn send_message(&self, conversation_id: &str, content: &str) -> Result<()> {
        let client_msg_id = generate_msg_id(&self.user_id);
        info!(
            "[ConvAPI] 📤 发送消息: conversationID={}, clientMsgID={}",
            conversation_id, client_msg_id
        );

        self.post_ack(
            "/msg/send_message",
            serde_json::json!({
                "userID": self.user_id,
                "conversationID": conversation_id,
                "clientMsgID": client_msg_id,
                "content": content,
            }),
            "发送消息",
        )
        .await
    }

    async fn set_pinned(&self, conversation_id: &str, pinned: bool) -> Result<()> {
        info!(
            "[ConvAPI] 📌 设置置顶: conversationID={}, pinned={}",
            conversation_id, pinned
        );

        self.post_ack(
            "/conversation/set_pinned",
            serde_json::json!({
                "userID": self.user_id,
                "conversationID": conversation_id,
                "isPinned": pinned,
            }),
            "设置置顶",
        )
        .await
    }

    async fn set_archived(&self, conversation_id: &str, archived: bool) -> Result<()> {
        info!(
            "[ConvAPI] 🗄️ 设置归档: conversationID={}, archived={}",
            conversation_id, archived
        );

        self.post_ack(
            "/conversation/set_archived",
            serde_json::json!({
                "userID": self.user_id,
                "conversationID": conversation_id,
                "isArchived": archived,
            }),
            "设置归档",
        )
        .await
    }
}
