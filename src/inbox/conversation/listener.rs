//! 会话监听器回调接口

use crate::inbox::types::{ConversationDetail, ConversationSummary};
use async_trait::async_trait;
use std::sync::Arc;

/// 会话监听器回调接口
///
/// 详情通过 `Arc` 传递：内容没有可见变化时回调不会触发，且同一内容
/// 始终复用同一个 `Arc`，展示层可用 `Arc::ptr_eq` 做恒等性记忆化
#[async_trait]
pub trait ConversationListener: Send + Sync {
    /// 会话列表变更（已按置顶 + 时间排好序）
    async fn on_conversation_list_changed(&self, conversations: Vec<ConversationSummary>);

    /// 选中会话详情变更（None 表示未选中任何会话）
    async fn on_selected_conversation_changed(&self, detail: Option<Arc<ConversationDetail>>);

    /// 总未读消息数变更
    async fn on_total_unread_count_changed(&self, total_unread_count: i32);

    /// 刷新失败（列表或详情），之前展示的数据保持可见
    async fn on_refresh_failed(&self, scope: String, error: String);

    /// 对方正在输入
    async fn on_typing_status(&self, conversation_id: String);

    /// 推送通道连接状态变更
    async fn on_connection_status_changed(&self, connected: bool, message: String);
}

/// 空实现（默认监听器）
pub struct EmptyConversationListener;

#[async_trait]
impl ConversationListener for EmptyConversationListener {
    async fn on_conversation_list_changed(&self, _conversations: Vec<ConversationSummary>) {}
    async fn on_selected_conversation_changed(&self, _detail: Option<Arc<ConversationDetail>>) {}
    async fn on_total_unread_count_changed(&self, _total_unread_count: i32) {}
    async fn on_refresh_failed(&self, _scope: String, _error: String) {}
    async fn on_typing_status(&self, _conversation_id: String) {}
    async fn on_connection_status_changed(&self, _connected: bool, _message: String) {}
}
