pub mod client;
pub mod conversation;
pub mod serialization;
pub mod types;

// 重新导出会话同步相关类型和函数
pub use conversation::{
    ConversationListener, ConversationStore, EmptyConversationListener, InvalidationScheduler,
};
pub use types::{ConversationDetail, ConversationSummary, Platform};
