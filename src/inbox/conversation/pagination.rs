//! 分页合并引擎
//!
//! 把服务器按页返回的会话列表拼装成一个有序的整体视图。
//! 纯内存计算，不依赖其他组件。

use crate::inbox::types::{ConversationSummary, PageResult, PageWindow};
use std::cmp::Ordering;

/// 每页拉取条数
pub const PAGE_SIZE: i64 = 30;

/// 会话分页器
///
/// 持有已拉取的页序列。刷新列表时必须 `reset` 后从第 0 页重新拉取，
/// 而不是原地修补：推送事件可能改变置顶状态或时间戳，旧的页边界已不可信。
#[derive(Debug, Default)]
pub struct ConversationPager {
    pages: Vec<PageResult>,
}

impl ConversationPager {
    /// 创建空分页器
    pub fn new() -> Self {
        Self { pages: Vec::new() }
    }

    /// 丢弃全部已拉取的页（硬重置）
    pub fn reset(&mut self) {
        self.pages.clear();
    }

    /// 追加一页服务器响应
    pub fn push_page(&mut self, page: PageResult) {
        self.pages.push(page);
    }

    /// 已拉取的页数
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// 下一个拉取窗口
    ///
    /// 尚未拉取任何页时从 0 开始；最后一页 hasMore 为 false 时返回 None（终止）
    pub fn next_window(&self) -> Option<PageWindow> {
        if let Some(last) = self.pages.last() {
            if !last.has_more {
                return None;
            }
        }
        let offset: i64 = self.pages.iter().map(|p| p.items.len() as i64).sum();
        Some(PageWindow {
            offset,
            limit: PAGE_SIZE,
        })
    }

    /// 按拉取顺序平铺所有页
    ///
    /// 同一过滤条件下服务器保证不同页之间无重复 ID，客户端不做去重
    pub fn flatten(&self) -> Vec<ConversationSummary> {
        self.pages
            .iter()
            .flat_map(|p| p.items.iter().cloned())
            .collect()
    }

    /// 平铺并排序，得到最终展示顺序
    pub fn ordered(&self) -> Vec<ConversationSummary> {
        let mut list = self.flatten();
        order(&mut list);
        list
    }
}

/// 列表排序：置顶优先，其余按最新消息时间降序
///
/// 无消息时间的会话排在最后；时间相同（含都无时间）时按会话 ID 升序兜底，
/// 保证排序是全序，反复刷新不会出现跳动
pub fn order(list: &mut [ConversationSummary]) {
    list.sort_by(|a, b| {
        match (a.is_pinned, b.is_pinned) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => {
                let by_time = match (a.last_message_at, b.last_message_at) {
                    (Some(ta), Some(tb)) => tb.cmp(&ta),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                by_time.then_with(|| a.conversation_id.cmp(&b.conversation_id))
            }
        }
    });
}
