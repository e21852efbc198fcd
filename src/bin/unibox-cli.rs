//! 统一收件箱 CLI 客户端（测试版）
//!
//! 非交互式 CLI，用于测试和展示统一收件箱功能
//! 启动时通过命令行参数指定用户和 token，自动连接，只展示接收到的信息

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};
use unibox_sdk_core_rust::inbox::client::{ClientConfig, InboxClient};
use unibox_sdk_core_rust::inbox::conversation::listener::ConversationListener;
use unibox_sdk_core_rust::inbox::types::{ConversationDetail, ConversationSummary, Platform};

/// 统一收件箱 CLI 客户端
#[derive(Parser, Debug)]
#[command(name = "unibox-cli")]
#[command(about = "统一收件箱 CLI 客户端 - 用于测试和展示会话同步功能", long_about = None)]
struct Args {
    /// 用户 ID
    #[arg(short, long)]
    user_id: String,

    /// 认证 token
    #[arg(short, long)]
    token: String,

    /// 平台过滤（whatsapp / instagram / facebook，默认全部）
    #[arg(short, long)]
    platform: Option<String>,

    /// 启动后选中的会话 ID（可选）
    #[arg(short, long)]
    select: Option<String>,

    /// 运行时长（秒），0 表示持续运行
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// 日志级别（默认: info,unibox_sdk_core_rust=debug）
    #[arg(long, default_value = "info,unibox_sdk_core_rust=debug")]
    log_level: String,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // 创建日志文件（追加模式）
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .expect("无法创建日志文件 debug.log");

    // 输出到 stdout（控制台），保留 ANSI 颜色代码用于终端显示
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 输出到文件，禁用 ANSI 颜色代码（文件不需要颜色）
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 日志已同时输出到控制台和文件: debug.log");
}

/// 会话监听器（输出所有接收到的信息）
struct CliConversationListener;

#[async_trait::async_trait]
impl ConversationListener for CliConversationListener {
    async fn on_conversation_list_changed(&self, conversations: Vec<ConversationSummary>) {
        info!("[CLI/Conversation] 📋 会话列表变更（共 {} 个）:", conversations.len());
        for conv in conversations.iter().take(5) {
            info!(
                "[CLI]   - {} [{:?}]{} | 未读: {} | 最新: {}",
                conv.conversation_id,
                conv.platform,
                if conv.is_pinned { " 📌" } else { "" },
                conv.unread_count,
                if conv.last_message_preview.chars().count() > 30 {
                    conv.last_message_preview.chars().take(30).collect::<String>()
                } else {
                    conv.last_message_preview.clone()
                }
            );
        }
    }

    async fn on_selected_conversation_changed(&self, detail: Option<Arc<ConversationDetail>>) {
        match detail {
            Some(detail) => info!(
                "[CLI/Conversation] 💬 选中会话详情: {} | 消息数: {}",
                detail.conversation_id(),
                detail.messages.len()
            ),
            None => info!("[CLI/Conversation] 💬 取消选中会话"),
        }
    }

    async fn on_total_unread_count_changed(&self, total_unread_count: i32) {
        info!("[CLI/Conversation] 📬 总未读数: {}", total_unread_count);
    }

    async fn on_refresh_failed(&self, scope: String, error: String) {
        error!("[CLI/Conversation] ❌ 刷新失败（{}）: {}", scope, error);
    }

    async fn on_typing_status(&self, conversation_id: String) {
        info!("[CLI/Conversation] ⌨️ 对方正在输入: {}", conversation_id);
    }

    async fn on_connection_status_changed(&self, connected: bool, message: String) {
        if connected {
            info!("[CLI/Conversation] 🔗 已连接: {}", message);
        } else {
            error!("[CLI/Conversation] 🔗 断开连接: {}", message);
        }
    }
}

fn parse_platform(raw: &str) -> Result<Platform> {
    match raw.to_lowercase().as_str() {
        "whatsapp" => Ok(Platform::Whatsapp),
        "instagram" => Ok(Platform::Instagram),
        "facebook" => Ok(Platform::Facebook),
        other => Err(anyhow::anyhow!("未知平台: {}", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    init_logger(&args.log_level);

    info!("[CLI] 🚀 统一收件箱 CLI 客户端（测试模式）");
    info!("[CLI] 👤 用户ID: {}", args.user_id);
    info!("[CLI] ⏱️  运行时长: {} 秒（0=持续运行）", args.duration);

    let platform_filter = match &args.platform {
        Some(raw) => Some(parse_platform(raw)?),
        None => None,
    };

    // 创建客户端
    let config = ClientConfig::new(args.user_id.clone(), args.token.clone());
    let mut client = InboxClient::new(config);
    client.set_conversation_listener(Arc::new(CliConversationListener));

    // 连接
    info!("[CLI] 🔗 正在连接服务器...");
    client
        .connect()
        .await
        .map_err(|e| anyhow::anyhow!("连接失败: {}", e))?;
    info!("[CLI] ✅ 连接成功！");

    if let Some(platform) = platform_filter {
        info!("[CLI] 🔍 设置平台过滤: {:?}", platform);
        client.set_platform_filter(Some(platform)).await?;
    }

    if let Some(conversation_id) = &args.select {
        info!("[CLI] 💬 选中会话: {}", conversation_id);
        client
            .select_conversation(Some(conversation_id.clone()))
            .await?;
    }

    // 等初始刷新落地后显示一次当前状态
    sleep(Duration::from_secs(2)).await;
    if let Ok(conversations) = client.get_conversation_list().await {
        info!("[CLI] 📋 当前会话列表（共 {} 个）", conversations.len());
    }
    if let Ok(unread) = client.get_total_unread_count().await {
        info!("[CLI] 📬 总未读数: {}", unread);
    }

    info!("[CLI] 📥 开始监听推送...");
    info!("[CLI] 💡 提示：程序将持续运行并显示接收到的所有会话变更");
    if args.duration > 0 {
        info!("[CLI] ⏰ {} 秒后自动退出", args.duration);
        sleep(Duration::from_secs(args.duration)).await;
        info!("[CLI] 👋 程序退出");
    } else {
        info!("[CLI] ⏰ 持续运行中，按 Ctrl+C 退出");
        // 持续运行直到被中断
        loop {
            sleep(Duration::from_secs(3600)).await;
        }
    }

    Ok(())
}
