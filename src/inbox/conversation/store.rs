//! 会话存储（组合根）
//!
//! 持有当前选中会话与平台过滤条件，把分页合并、持久缓存、引用稳定性
//! 过滤和失效调度拼装成展示层消费的统一读模型。
//!
//! 刷新失败时之前的列表 / 详情保持可见，不破坏性清除任何状态，
//! 由下一次成功刷新（下一个推送事件或手动重试）完成收敛。

use crate::inbox::conversation::api::ConversationBackend;
use crate::inbox::conversation::cache::ConversationCache;
use crate::inbox::conversation::listener::ConversationListener;
use crate::inbox::conversation::pagination::{ConversationPager, PAGE_SIZE};
use crate::inbox::conversation::scheduler::RefreshCommand;
use crate::inbox::conversation::stability::stabilize;
use crate::inbox::types::{
    ConversationDetail, ConversationSummary, PageWindow, Platform, PushEvent, PushEventKind,
};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// 详情新鲜度窗口（毫秒）：距上次成功拉取不足该时长时跳过重复拉取，
/// 避免窗口聚焦、推送事件等多个触发源在短时间内叠加造成拉取风暴
pub const DETAIL_FRESH_MS: i64 = 10_000;

/// 存储内部可变状态
struct StoreState {
    /// 平台过滤条件（None 表示全部平台）
    platform_filter: Option<Platform>,
    pager: ConversationPager,
    /// 当前对外暴露的有序列表
    ordered: Vec<ConversationSummary>,
    /// 当前对外暴露的选中会话详情
    selected_detail: Option<Arc<ConversationDetail>>,
    /// 列表代际计数：硬重置时自增，旧代际的响应到达即丢弃
    list_generation: u64,
    /// 详情代际计数：切换选中时自增
    detail_generation: u64,
    /// 最近一次成功呈现详情的（会话 ID，时间戳）
    last_detail_fetch: Option<(String, i64)>,
}

/// 会话存储
pub struct ConversationStore {
    backend: Arc<dyn ConversationBackend>,
    cache: ConversationCache,
    listener: Arc<dyn ConversationListener>,
    /// 本地变更注入推送事件的通道（与调度器共用）
    events_tx: mpsc::Sender<PushEvent>,
    /// 当前选中的会话 ID（与调度器共享）
    selected: Arc<RwLock<Option<String>>>,
    state: Mutex<StoreState>,
}

impl ConversationStore {
    /// 创建新的会话存储
    pub fn new(
        backend: Arc<dyn ConversationBackend>,
        cache: ConversationCache,
        listener: Arc<dyn ConversationListener>,
        events_tx: mpsc::Sender<PushEvent>,
        selected: Arc<RwLock<Option<String>>>,
    ) -> Self {
        Self {
            backend,
            cache,
            listener,
            events_tx,
            selected,
            state: Mutex::new(StoreState {
                platform_filter: None,
                pager: ConversationPager::new(),
                ordered: Vec::new(),
                selected_detail: None,
                list_generation: 0,
                detail_generation: 0,
                last_detail_fetch: None,
            }),
        }
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// 消费调度器下发的刷新命令，直到通道关闭
    pub async fn run_refresh_loop(self: Arc<Self>, mut commands_rx: mpsc::Receiver<RefreshCommand>) {
        info!("[ConvStore] 刷新命令循环启动");
        while let Some(command) = commands_rx.recv().await {
            self.handle_refresh(command).await;
        }
        info!("[ConvStore] 刷新命令循环退出");
    }

    /// 执行一条刷新命令
    pub async fn handle_refresh(&self, command: RefreshCommand) {
        if command.list {
            self.refresh_list().await;
        }
        if command.selected {
            self.refresh_selected().await;
        }
    }

    /// 设置平台过滤条件并硬重置列表（过滤条件变化使旧的页边界失效）
    pub async fn set_platform_filter(&self, filter: Option<Platform>) {
        {
            let mut state = self.state.lock().await;
            if state.platform_filter == filter {
                return;
            }
            info!("[ConvStore] 切换平台过滤: {:?}", filter);
            state.platform_filter = filter;
        }
        self.refresh_list().await;
    }

    /// 硬重置会话列表：丢弃已拉取的页，从第 0 页重新拉取并全量重排
    ///
    /// 不做原地修补：推送事件可能改变置顶状态或时间戳，
    /// 陈旧的顺序比短暂的加载闪烁更糟
    pub async fn refresh_list(&self) {
        let (generation, filter) = {
            let mut state = self.state.lock().await;
            state.list_generation += 1;
            (state.list_generation, state.platform_filter)
        };

        let window = PageWindow {
            offset: 0,
            limit: PAGE_SIZE,
        };
        match self.backend.fetch_page(window, filter).await {
            Ok(page) => {
                let mut state = self.state.lock().await;
                if state.list_generation != generation {
                    // 拉取期间又发生了硬重置，本响应已被取代
                    debug!("[ConvStore] 丢弃过期的列表响应（代际 {}）", generation);
                    return;
                }
                state.pager.reset();
                state.pager.push_page(page);
                self.publish_list(&mut state);
            }
            Err(e) => {
                warn!("[ConvStore] ⚠️ 列表刷新失败，保留现有列表: {}", e);
                self.notify_refresh_failed("list", &e);
            }
        }
    }

    /// 拉取下一页并入已有列表；没有后续页时无操作
    pub async fn load_more(&self) {
        let (generation, filter, window) = {
            let state = self.state.lock().await;
            (
                state.list_generation,
                state.platform_filter,
                state.pager.next_window(),
            )
        };
        let Some(window) = window else {
            debug!("[ConvStore] 列表已拉完，无后续页");
            return;
        };

        match self.backend.fetch_page(window, filter).await {
            Ok(page) => {
                let mut state = self.state.lock().await;
                if state.list_generation != generation {
                    debug!("[ConvStore] 丢弃过期的分页响应（代际 {}）", generation);
                    return;
                }
                state.pager.push_page(page);
                self.publish_list(&mut state);
            }
            Err(e) => {
                warn!("[ConvStore] ⚠️ 分页拉取失败: {}", e);
                self.notify_refresh_failed("list", &e);
            }
        }
    }

    /// 重排并对外发布当前列表与总未读数
    fn publish_list(&self, state: &mut StoreState) {
        let ordered = state.pager.ordered();
        let total_unread: i32 = ordered.iter().map(|c| c.unread_count).sum();
        state.ordered = ordered.clone();

        info!(
            "[ConvStore] 📢 发布会话列表: {} 条, 总未读 {}",
            ordered.len(),
            total_unread
        );
        let listener = self.listener.clone();
        tokio::spawn(async move {
            listener.on_conversation_list_changed(ordered).await;
            listener.on_total_unread_count_changed(total_unread).await;
        });
    }

    /// 切换选中会话
    ///
    /// 先用缓存命中做即时占位（没有命中则先清空，避免展示已取消
    /// 选中的旧会话），随后从网络拉取新鲜详情
    pub async fn select_conversation(&self, conversation_id: Option<String>) {
        *self.selected.write().await = conversation_id.clone();
        let generation = {
            let mut state = self.state.lock().await;
            state.detail_generation += 1;
            state.detail_generation
        };

        match conversation_id {
            None => {
                let mut state = self.state.lock().await;
                if state.detail_generation == generation {
                    self.present_detail(&mut state, None);
                }
            }
            Some(id) => {
                info!("[ConvStore] 选中会话: {}", id);
                let cached = self.cache.get(&id).await;
                {
                    let mut state = self.state.lock().await;
                    if state.detail_generation == generation {
                        if cached.is_some() {
                            debug!("[ConvStore] 缓存命中，先行展示占位详情: {}", id);
                        }
                        self.present_detail(&mut state, cached.map(Arc::new));
                    }
                }
                self.fetch_and_present_detail(&id, generation).await;
            }
        }
    }

    /// 重新拉取选中会话的详情（调度器触发）
    ///
    /// 距上次成功呈现不足新鲜度窗口时跳过，与去抖机制相互独立
    pub async fn refresh_selected(&self) {
        let selected_now = self.selected.read().await.clone();
        let Some(id) = selected_now else {
            return;
        };

        let generation = {
            let state = self.state.lock().await;
            if let Some((last_id, fetched_at)) = &state.last_detail_fetch {
                if *last_id == id && Self::now_ms() - fetched_at < DETAIL_FRESH_MS {
                    debug!("[ConvStore] 详情仍在新鲜度窗口内，跳过重复拉取: {}", id);
                    return;
                }
            }
            state.detail_generation
        };

        self.fetch_and_present_detail(&id, generation).await;
    }

    /// 拉取详情并（在通过竞态保护后）呈现
    ///
    /// 成功的拉取无条件写透缓存；呈现则要求响应的会话仍被选中
    /// 且代际未变——迟到的响应不允许覆盖当前选中会话的对外状态
    async fn fetch_and_present_detail(&self, conversation_id: &str, generation: u64) {
        match self.backend.fetch_detail(conversation_id).await {
            Ok(detail) => {
                // 写透点：每次成功的详情拉取都刷新缓存
                self.cache.put(&detail).await;

                let selected_now = self.selected.read().await.clone();
                let mut state = self.state.lock().await;
                if selected_now.as_deref() != Some(conversation_id)
                    || state.detail_generation != generation
                {
                    // 选中竞态：会话已被取消选中或被更新的拉取取代，丢弃（不算错误）
                    debug!(
                        "[ConvStore] 丢弃迟到的详情响应: conversationID={}",
                        conversation_id
                    );
                    return;
                }

                state.last_detail_fetch = Some((conversation_id.to_string(), Self::now_ms()));
                self.present_detail(&mut state, Some(Arc::new(detail)));
            }
            Err(e) => {
                warn!(
                    "[ConvStore] ⚠️ 详情拉取失败，保留现有详情: conversationID={}, 错误: {}",
                    conversation_id, e
                );
                self.notify_refresh_failed("detail", &e);
            }
        }
    }

    /// 经引用稳定性过滤后呈现详情；引用未变时不触发回调
    fn present_detail(&self, state: &mut StoreState, next: Option<Arc<ConversationDetail>>) {
        let stabilized = stabilize(state.selected_detail.as_ref(), next);
        let unchanged = match (&state.selected_detail, &stabilized) {
            (Some(previous), Some(next)) => Arc::ptr_eq(previous, next),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            debug!("[ConvStore] 详情内容无可见变化，沿用原引用");
            return;
        }

        state.selected_detail = stabilized.clone();
        let listener = self.listener.clone();
        tokio::spawn(async move {
            listener.on_selected_conversation_changed(stabilized).await;
        });
    }

    fn notify_refresh_failed(&self, scope: &str, error: &anyhow::Error) {
        let listener = self.listener.clone();
        let scope = scope.to_string();
        let error = format!("{:#}", error);
        tokio::spawn(async move {
            listener.on_refresh_failed(scope, error).await;
        });
    }

    /// 本地变更成功后注入一个会话变更事件，走与推送事件相同的
    /// 去抖硬重置路径（本端不一定会收到自己触发的推送）
    async fn notify_local_mutation(&self, conversation_id: &str) {
        let event = PushEvent {
            kind: PushEventKind::ConversationUpdated,
            conversation_id: Some(conversation_id.to_string()),
        };
        if self.events_tx.send(event).await.is_err() {
            error!("[ConvStore] 事件通道已关闭，本地变更无法触发刷新");
        }
    }

    /// 发送文本消息，成功后触发列表刷新
    pub async fn send_message(&self, conversation_id: &str, content: &str) -> Result<()> {
        self.backend.send_message(conversation_id, content).await?;
        self.notify_local_mutation(conversation_id).await;
        Ok(())
    }

    /// 设置置顶状态，成功后触发列表刷新（置顶直接改变排序）
    pub async fn set_pinned(&self, conversation_id: &str, pinned: bool) -> Result<()> {
        self.backend.set_pinned(conversation_id, pinned).await?;
        self.notify_local_mutation(conversation_id).await;
        Ok(())
    }

    /// 设置归档状态，成功后触发列表刷新
    pub async fn set_archived(&self, conversation_id: &str, archived: bool) -> Result<()> {
        self.backend.set_archived(conversation_id, archived).await?;
        self.notify_local_mutation(conversation_id).await;
        Ok(())
    }

    /// 当前对外暴露的有序会话列表
    pub async fn conversation_list(&self) -> Vec<ConversationSummary> {
        self.state.lock().await.ordered.clone()
    }

    /// 当前对外暴露的选中会话详情
    pub async fn selected_detail(&self) -> Option<Arc<ConversationDetail>> {
        self.state.lock().await.selected_detail.clone()
    }

    /// 当前总未读数
    pub async fn total_unread_count(&self) -> i32 {
        self.state
            .lock()
            .await
            .ordered
            .iter()
            .map(|c| c.unread_count)
            .sum()
    }

    /// 对方正在输入事件透传给监听器
    pub fn notify_typing(&self, conversation_id: String) {
        let listener = self.listener.clone();
        tokio::spawn(async move {
            listener.on_typing_status(conversation_id).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbox::types::{ContactRef, Message, PageResult};
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    fn summary(id: &str, pinned: bool, last_at: Option<i64>, unread: i32) -> ConversationSummary {
        ConversationSummary {
            conversation_id: id.to_string(),
            platform: Platform::Whatsapp,
            contact: ContactRef {
                contact_id: format!("c-{}", id),
                display_name: String::new(),
                avatar_url: String::new(),
            },
            last_message_preview: String::new(),
            last_message_at: last_at,
            unread_count: unread,
            is_pinned: pinned,
            is_archived: false,
        }
    }

    fn detail(id: &str, message_count: usize) -> ConversationDetail {
        ConversationDetail {
            summary: summary(id, false, Some(message_count as i64), 0),
            messages: (0..message_count)
                .map(|i| Message {
                    message_id: format!("{}-m{}", id, i),
                    sender_id: format!("c-{}", id),
                    content: format!("第 {} 条", i),
                    sent_at: i as i64,
                })
                .collect(),
        }
    }

    /// 内存假后端
    struct FakeBackend {
        summaries: StdMutex<Vec<ConversationSummary>>,
        details: StdMutex<HashMap<String, ConversationDetail>>,
        page_calls: AtomicU32,
        detail_calls: AtomicU32,
        fail_list: AtomicBool,
        fail_detail: AtomicBool,
    }

    impl FakeBackend {
        fn new(summaries: Vec<ConversationSummary>) -> Self {
            Self {
                summaries: StdMutex::new(summaries),
                details: StdMutex::new(HashMap::new()),
                page_calls: AtomicU32::new(0),
                detail_calls: AtomicU32::new(0),
                fail_list: AtomicBool::new(false),
                fail_detail: AtomicBool::new(false),
            }
        }

        fn put_detail(&self, d: ConversationDetail) {
            self.details
                .lock()
                .unwrap()
                .insert(d.conversation_id().to_string(), d);
        }
    }

    #[async_trait]
    impl ConversationBackend for FakeBackend {
        async fn fetch_page(
            &self,
            window: PageWindow,
            _filter: Option<Platform>,
        ) -> Result<PageResult> {
            self.page_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_list.load(Ordering::SeqCst) {
                return Err(anyhow::anyhow!("连接被重置"));
            }
            let all = self.summaries.lock().unwrap().clone();
            let start = (window.offset as usize).min(all.len());
            let end = (start + window.limit as usize).min(all.len());
            Ok(PageResult {
                items: all[start..end].to_vec(),
                total: all.len() as i64,
                has_more: end < all.len(),
            })
        }

        async fn fetch_detail(&self, conversation_id: &str) -> Result<ConversationDetail> {
            self.detail_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_detail.load(Ordering::SeqCst) {
                return Err(anyhow::anyhow!("连接被重置"));
            }
            self.details
                .lock()
                .unwrap()
                .get(conversation_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("会话不存在: {}", conversation_id))
        }

        async fn send_message(&self, _conversation_id: &str, _content: &str) -> Result<()> {
            Ok(())
        }

        async fn set_pinned(&self, _conversation_id: &str, _pinned: bool) -> Result<()> {
            Ok(())
        }

        async fn set_archived(&self, _conversation_id: &str, _archived: bool) -> Result<()> {
            Ok(())
        }
    }

    /// 记录所有回调的监听器
    #[derive(Default)]
    struct RecordingListener {
        lists: StdMutex<Vec<Vec<ConversationSummary>>>,
        details: StdMutex<Vec<Option<Arc<ConversationDetail>>>>,
        failures: StdMutex<Vec<(String, String)>>,
        unreads: StdMutex<Vec<i32>>,
    }

    #[async_trait]
    impl ConversationListener for RecordingListener {
        async fn on_conversation_list_changed(&self, conversations: Vec<ConversationSummary>) {
            self.lists.lock().unwrap().push(conversations);
        }
        async fn on_selected_conversation_changed(&self, d: Option<Arc<ConversationDetail>>) {
            self.details.lock().unwrap().push(d);
        }
        async fn on_total_unread_count_changed(&self, total: i32) {
            self.unreads.lock().unwrap().push(total);
        }
        async fn on_refresh_failed(&self, scope: String, error: String) {
            self.failures.lock().unwrap().push((scope, error));
        }
        async fn on_typing_status(&self, _conversation_id: String) {}
        async fn on_connection_status_changed(&self, _connected: bool, _message: String) {}
    }

    async fn new_cache() -> ConversationCache {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let cache = ConversationCache::new(pool);
        cache.init_db().await.unwrap();
        cache
    }

    async fn new_store(
        backend: Arc<FakeBackend>,
        listener: Arc<RecordingListener>,
    ) -> (Arc<ConversationStore>, mpsc::Receiver<PushEvent>) {
        let (events_tx, events_rx) = mpsc::channel(16);
        let selected = Arc::new(RwLock::new(None));
        let store = Arc::new(ConversationStore::new(
            backend,
            new_cache().await,
            listener,
            events_tx,
            selected,
        ));
        (store, events_rx)
    }

    /// 让 spawn 出去的回调任务跑完
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn refresh_list_publishes_ordered_list_and_unread() {
        let backend = Arc::new(FakeBackend::new(vec![
            summary("a", false, Some(300), 2),
            summary("b", true, Some(100), 1),
            summary("c", false, None, 0),
        ]));
        let listener = Arc::new(RecordingListener::default());
        let (store, _events_rx) = new_store(backend, listener.clone()).await;

        store.refresh_list().await;
        settle().await;

        let list = store.conversation_list().await;
        let ids: Vec<&str> = list.iter().map(|c| c.conversation_id.as_str()).collect();
        // 置顶在前，其余时间降序，无时间的最后
        assert_eq!(ids, vec!["b", "a", "c"]);

        assert_eq!(listener.lists.lock().unwrap().len(), 1);
        assert_eq!(listener.unreads.lock().unwrap().as_slice(), &[3]);
    }

    #[tokio::test]
    async fn load_more_appends_until_terminal() {
        // 35 条会话：第 0 页 30 条，第 1 页 5 条
        let summaries: Vec<ConversationSummary> = (0..35)
            .map(|i| summary(&format!("conv-{:02}", i), false, Some(1000 - i), 0))
            .collect();
        let backend = Arc::new(FakeBackend::new(summaries));
        let listener = Arc::new(RecordingListener::default());
        let (store, _events_rx) = new_store(backend.clone(), listener).await;

        store.refresh_list().await;
        assert_eq!(store.conversation_list().await.len(), 30);

        store.load_more().await;
        assert_eq!(store.conversation_list().await.len(), 35);
        assert_eq!(backend.page_calls.load(Ordering::SeqCst), 2);

        // 已拉完：不再发请求
        store.load_more().await;
        assert_eq!(backend.page_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_list() {
        let backend = Arc::new(FakeBackend::new(vec![summary("a", false, Some(1), 0)]));
        let listener = Arc::new(RecordingListener::default());
        let (store, _events_rx) = new_store(backend.clone(), listener.clone()).await;

        store.refresh_list().await;
        assert_eq!(store.conversation_list().await.len(), 1);

        backend.fail_list.store(true, Ordering::SeqCst);
        store.refresh_list().await;
        settle().await;

        // 之前的列表保持可见，错误通过回调上报
        assert_eq!(store.conversation_list().await.len(), 1);
        let failures = listener.failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "list");
    }

    #[tokio::test]
    async fn select_serves_cache_placeholder_then_network() {
        let backend = Arc::new(FakeBackend::new(vec![]));
        backend.put_detail(detail("wa:1", 6));
        let listener = Arc::new(RecordingListener::default());
        let (store, _events_rx) = new_store(backend, listener.clone()).await;

        // 预先放入旧快照（5 条消息）
        store.cache.put(&detail("wa:1", 5)).await;

        store.select_conversation(Some("wa:1".to_string())).await;
        settle().await;

        // 占位（5 条）+ 网络（6 条）各呈现一次
        let presented = listener.details.lock().unwrap();
        assert_eq!(presented.len(), 2);
        assert_eq!(presented[0].as_ref().unwrap().messages.len(), 5);
        assert_eq!(presented[1].as_ref().unwrap().messages.len(), 6);
        drop(presented);

        // 写透：缓存已刷新为 6 条
        let cached = store.cache.get("wa:1").await.unwrap();
        assert_eq!(cached.messages.len(), 6);
    }

    #[tokio::test]
    async fn late_response_for_deselected_conversation_is_discarded() {
        let backend = Arc::new(FakeBackend::new(vec![]));
        backend.put_detail(detail("wa:a", 3));
        backend.put_detail(detail("wa:b", 9));
        let listener = Arc::new(RecordingListener::default());
        let (store, _events_rx) = new_store(backend, listener).await;

        store.select_conversation(Some("wa:a".to_string())).await;
        let generation = store.state.lock().await.detail_generation;

        // 模拟已取消选中的会话的迟到响应：当前选中 a，却到达 b 的详情
        store.fetch_and_present_detail("wa:b", generation).await;
        settle().await;

        // 对外状态仍是 a
        let exposed = store.selected_detail().await.unwrap();
        assert_eq!(exposed.conversation_id(), "wa:a");

        // 但迟到的响应仍然写入了缓存
        assert!(store.cache.get("wa:b").await.is_some());
    }

    #[tokio::test]
    async fn stale_generation_response_is_discarded() {
        let backend = Arc::new(FakeBackend::new(vec![]));
        backend.put_detail(detail("wa:a", 3));
        let listener = Arc::new(RecordingListener::default());
        let (store, _events_rx) = new_store(backend.clone(), listener).await;

        store.select_conversation(Some("wa:a".to_string())).await;
        let exposed_before = store.selected_detail().await.unwrap();

        // 后端内容变了，但旧代际的响应不允许覆盖
        backend.put_detail(detail("wa:a", 99));
        store.fetch_and_present_detail("wa:a", 0).await;
        settle().await;

        let exposed_after = store.selected_detail().await.unwrap();
        assert!(Arc::ptr_eq(&exposed_before, &exposed_after));
    }

    #[tokio::test]
    async fn staleness_window_suppresses_refetch() {
        let backend = Arc::new(FakeBackend::new(vec![]));
        backend.put_detail(detail("wa:a", 3));
        let listener = Arc::new(RecordingListener::default());
        let (store, _events_rx) = new_store(backend.clone(), listener).await;

        store.select_conversation(Some("wa:a".to_string())).await;
        let calls_after_select = backend.detail_calls.load(Ordering::SeqCst);

        // 刚刚成功拉取过，新鲜度窗口内跳过
        store.refresh_selected().await;
        assert_eq!(backend.detail_calls.load(Ordering::SeqCst), calls_after_select);

        // 窗口过期后恢复拉取
        store.state.lock().await.last_detail_fetch =
            Some(("wa:a".to_string(), ConversationStore::now_ms() - DETAIL_FRESH_MS - 1));
        store.refresh_selected().await;
        assert_eq!(
            backend.detail_calls.load(Ordering::SeqCst),
            calls_after_select + 1
        );
    }

    #[tokio::test]
    async fn unchanged_refetch_does_not_republish() {
        let backend = Arc::new(FakeBackend::new(vec![]));
        backend.put_detail(detail("wa:a", 3));
        let listener = Arc::new(RecordingListener::default());
        let (store, _events_rx) = new_store(backend, listener.clone()).await;

        store.select_conversation(Some("wa:a".to_string())).await;
        settle().await;
        let presented_before = listener.details.lock().unwrap().len();

        // 内容深度相等的重复拉取：引用稳定，不再回调
        store.state.lock().await.last_detail_fetch = None;
        store.refresh_selected().await;
        settle().await;
        assert_eq!(listener.details.lock().unwrap().len(), presented_before);

        let exposed = store.selected_detail().await.unwrap();
        assert_eq!(exposed.messages.len(), 3);
    }

    #[tokio::test]
    async fn deselect_clears_exposed_detail() {
        let backend = Arc::new(FakeBackend::new(vec![]));
        backend.put_detail(detail("wa:a", 1));
        let listener = Arc::new(RecordingListener::default());
        let (store, _events_rx) = new_store(backend, listener.clone()).await;

        store.select_conversation(Some("wa:a".to_string())).await;
        assert!(store.selected_detail().await.is_some());

        store.select_conversation(None).await;
        settle().await;
        assert!(store.selected_detail().await.is_none());
        assert!(listener.details.lock().unwrap().last().unwrap().is_none());
    }

    #[tokio::test]
    async fn mutations_inject_refresh_events() {
        let backend = Arc::new(FakeBackend::new(vec![]));
        let listener = Arc::new(RecordingListener::default());
        let (store, mut events_rx) = new_store(backend, listener).await;

        store.send_message("wa:1", "你好").await.unwrap();
        store.set_pinned("wa:2", true).await.unwrap();
        store.set_archived("wa:3", true).await.unwrap();

        for expected in ["wa:1", "wa:2", "wa:3"] {
            let event = events_rx.recv().await.unwrap();
            assert_eq!(event.kind, PushEventKind::ConversationUpdated);
            assert_eq!(event.conversation_id.as_deref(), Some(expected));
        }
    }

    #[tokio::test]
    async fn failed_detail_keeps_previous_detail() {
        let backend = Arc::new(FakeBackend::new(vec![]));
        backend.put_detail(detail("wa:a", 2));
        let listener = Arc::new(RecordingListener::default());
        let (store, _events_rx) = new_store(backend.clone(), listener.clone()).await;

        store.select_conversation(Some("wa:a".to_string())).await;
        let exposed_before = store.selected_detail().await.unwrap();

        backend.fail_detail.store(true, Ordering::SeqCst);
        store.state.lock().await.last_detail_fetch = None;
        store.refresh_selected().await;
        settle().await;

        let exposed_after = store.selected_detail().await.unwrap();
        assert!(Arc::ptr_eq(&exposed_before, &exposed_after));
        let failures = listener.failures.lock().unwrap();
        assert_eq!(failures.last().unwrap().0, "detail");
    }
}
