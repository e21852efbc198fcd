//! 引用稳定性过滤
//!
//! 决定是否向展示层暴露新的会话详情引用。内容没有可见变化时
//! 沿用旧的 `Arc` 句柄，展示层可以用 `Arc::ptr_eq` 做恒等性记忆化，
//! 避免无关的后台刷新打断正在输入的回复草稿。

use crate::inbox::types::ConversationDetail;
use std::sync::Arc;

/// 稳定化选中会话的详情引用
///
/// - `next` 为空：返回空（视为未选中任何会话），丢弃旧值
/// - `previous` 为空：返回 `next`
/// - 会话 ID、消息条数或最后一条消息 ID 任一不同：返回 `next`（新引用）
/// - 其余情况：原样返回 `previous`（同一 `Arc`）
pub fn stabilize(
    previous: Option<&Arc<ConversationDetail>>,
    next: Option<Arc<ConversationDetail>>,
) -> Option<Arc<ConversationDetail>> {
    let next = next?;
    let Some(previous) = previous else {
        return Some(next);
    };

    let changed = previous.conversation_id() != next.conversation_id()
        || previous.messages.len() != next.messages.len()
        || previous.last_message_id() != next.last_message_id();

    if changed {
        Some(next)
    } else {
        Some(Arc::clone(previous))
    }
}
