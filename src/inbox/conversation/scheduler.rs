//! 失效调度器
//!
//! 消费推送事件，在一个尾沿去抖窗口内合并，然后下发一次最小必要的
//! 刷新命令（列表 / 选中详情）。逐事件刷新在消息风暴下会导致列表
//! 每条消息都回流一次并堆积冗余请求；合并后每个静默期最多刷新一次，
//! 且任何突发的最后一个事件总会触发刷新，保证最终一致。
//!
//! 全部待刷新状态（脏标记 + 去抖截止时间）都归本调度器实例所有，
//! 多个收件箱实例（测试、多窗口）互不干扰。

use crate::inbox::types::{PushEvent, PushEventKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};

/// 去抖窗口（毫秒）
pub const DEBOUNCE_MS: u64 = 800;

/// 刷新命令：去抖窗口结束时对外发出的脏标记并集
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshCommand {
    /// 需要硬重置会话列表
    pub list: bool,
    /// 需要重新拉取选中会话的详情
    pub selected: bool,
}

/// 失效调度器
///
/// 作为独立任务运行：从 `events_rx` 消费推送事件，向 `commands_tx`
/// 发出刷新命令，由 ConversationStore 消费执行
pub struct InvalidationScheduler {
    events_rx: mpsc::Receiver<PushEvent>,
    commands_tx: mpsc::Sender<RefreshCommand>,
    /// 当前选中的会话 ID（与 ConversationStore 共享）
    selected: Arc<RwLock<Option<String>>>,
    debounce: Duration,
}

impl InvalidationScheduler {
    /// 创建新的失效调度器
    pub fn new(
        events_rx: mpsc::Receiver<PushEvent>,
        commands_tx: mpsc::Sender<RefreshCommand>,
        selected: Arc<RwLock<Option<String>>>,
    ) -> Self {
        Self {
            events_rx,
            commands_tx,
            selected,
            debounce: Duration::from_millis(DEBOUNCE_MS),
        }
    }

    /// 运行调度循环，直到事件通道关闭或命令通道无人消费
    pub async fn run(mut self) {
        info!("[Sched] 失效调度器启动，去抖窗口 {}ms", DEBOUNCE_MS);

        let mut list_dirty = false;
        let mut selected_dirty = false;
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                event = self.events_rx.recv() => {
                    match event {
                        Some(event) => {
                            if self.mark(&event, &mut list_dirty, &mut selected_dirty).await {
                                // 尾沿去抖：每个新事件都重置时钟
                                deadline = Some(Instant::now() + self.debounce);
                            }
                        }
                        None => {
                            // 事件通道关闭：把尚未下发的脏标记冲掉再退出
                            if list_dirty || selected_dirty {
                                let _ = self
                                    .commands_tx
                                    .send(RefreshCommand {
                                        list: list_dirty,
                                        selected: selected_dirty,
                                    })
                                    .await;
                            }
                            break;
                        }
                    }
                }
                _ = async { tokio::time::sleep_until(deadline.unwrap()).await }, if deadline.is_some() => {
                    let command = RefreshCommand {
                        list: list_dirty,
                        selected: selected_dirty,
                    };
                    list_dirty = false;
                    selected_dirty = false;
                    deadline = None;

                    debug!(
                        "[Sched] 去抖窗口结束，下发刷新命令: list={}, selected={}",
                        command.list, command.selected
                    );
                    if self.commands_tx.send(command).await.is_err() {
                        break;
                    }
                }
            }
        }

        info!("[Sched] 失效调度器退出");
    }

    /// 根据事件类型置脏标记，返回是否需要（重新）武装去抖定时器
    async fn mark(
        &self,
        event: &PushEvent,
        list_dirty: &mut bool,
        selected_dirty: &mut bool,
    ) -> bool {
        match event.kind {
            PushEventKind::NewMessage
            | PushEventKind::ConversationUpdated
            | PushEventKind::ChatsSynced => {
                *list_dirty = true;

                if let Some(event_id) = &event.conversation_id {
                    let selected = self.selected.read().await;
                    if selected.as_deref() == Some(event_id.as_str()) {
                        *selected_dirty = true;
                    }
                }

                debug!(
                    "[Sched] 事件 {:?} 置脏: list={}, selected={}",
                    event.kind, list_dirty, selected_dirty
                );
                true
            }
            // 输入 / 在线状态事件不影响列表内容，不触发刷新
            PushEventKind::TypingStatus | PushEventKind::PresenceChanged => false,
        }
    }
}
