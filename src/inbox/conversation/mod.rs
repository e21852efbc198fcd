//! 会话模块
//!
//! 实现统一收件箱的会话同步功能

pub mod api;
pub mod cache;
pub mod listener;
pub mod models;
pub mod pagination;
pub mod scheduler;
pub mod stability;
pub mod store;

// 重新导出主要类型和函数
pub use api::{ConversationApi, ConversationBackend};
pub use cache::ConversationCache;
pub use listener::{ConversationListener, EmptyConversationListener};
pub use models::SyncConfig;
pub use pagination::{ConversationPager, PAGE_SIZE};
pub use scheduler::{InvalidationScheduler, RefreshCommand, DEBOUNCE_MS};
pub use stability::stabilize;
pub use store::{ConversationStore, DETAIL_FRESH_MS};
