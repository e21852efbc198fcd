pub mod inbox;

// 重新导出常用类型和函数，方便外部使用
pub use inbox::{
    client::{ClientConfig, InboxClient},
    conversation::{ConversationListener, ConversationStore, EmptyConversationListener},
    types::{ConversationDetail, ConversationSummary, Platform},
};
