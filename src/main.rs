//! `docqa` —— 文档问答命令行
//!
//! ```bash
//! docqa chat --scope manual-v2          # 交互式多轮对话
//! docqa ask --thread <ID> "What is IVF?" # 单轮提问
//! docqa threads                          # 列出已保存的会话
//! docqa delete --thread <ID>
//! ```

use clap::{Parser, Subcommand};
use docqa_agent::config::AppConfig;
use docqa_agent::error::Result;
use docqa_agent::llm::HttpLlmClient;
use docqa_agent::llm::config::ModelRegistry;
use docqa_agent::memory::{Checkpointer, SqliteCheckpointer};
use docqa_agent::pipeline::QaPipeline;
use docqa_agent::retrieval::HttpRetriever;
use docqa_agent::service::{ConversationService, InMemoryThreadRegistry};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "docqa", version, about = "Multi-turn question answering over indexed documents")]
struct Cli {
    /// YAML 配置文件；缺省时使用内置默认值
    #[arg(long, global = true, env = "DOCQA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 交互式多轮对话
    Chat {
        /// 接续已有会话
        #[arg(long)]
        thread: Option<String>,
        /// 限定检索的文档 / 语料
        #[arg(long)]
        scope: Option<String>,
    },
    /// 单轮提问
    Ask {
        #[arg(long)]
        thread: Option<String>,
        #[arg(long)]
        scope: Option<String>,
        question: String,
    },
    /// 列出已保存的会话
    Threads,
    /// 删除会话及其快照
    Delete {
        #[arg(long)]
        thread: String,
    },
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "docqa_agent=info".into()))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{e}");
        eprintln!("❌ {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    let checkpointer: Arc<dyn Checkpointer> =
        Arc::new(SqliteCheckpointer::open(config.store_path(), config.pool_config()).await?);

    // 列出会话无需模型凭据
    if matches!(cli.command, Command::Threads) {
        let threads = checkpointer.list_threads().await?;
        if threads.is_empty() {
            println!("(no saved conversations)");
        }
        for thread in threads {
            println!("{thread}");
        }
        return checkpointer.close().await;
    }

    let service = build_service(&config, checkpointer)?;
    let outcome = match cli.command {
        Command::Threads => Ok(()),
        Command::Delete { thread } => service.delete_conversation(&thread).await.map(|_| {
            println!("🗑️ deleted {thread}");
        }),
        Command::Ask {
            thread,
            scope,
            question,
        } => ask_once(&service, thread, scope, &question).await,
        Command::Chat { thread, scope } => chat(&service, thread, scope).await,
    };

    service.shutdown().await?;
    outcome
}

fn build_service(config: &AppConfig, checkpointer: Arc<dyn Checkpointer>) -> Result<ConversationService> {
    let registry = ModelRegistry::from_env()?;
    let model = registry.get(&config.model)?;
    let http = Arc::new(reqwest::Client::new());

    let llm = Arc::new(
        HttpLlmClient::new(http.clone(), model).max_tool_iterations(config.retrieval.max_tool_iterations),
    );
    let retriever = Arc::new(HttpRetriever::new(http, config.retrieval.endpoint.clone()));
    let pipeline = Arc::new(QaPipeline::new(llm, retriever, config.pipeline_config()));
    info!(model = %config.model, "🚀 问答服务就绪");

    Ok(ConversationService::new(
        pipeline,
        checkpointer,
        Arc::new(InMemoryThreadRegistry::new()),
    ))
}

/// 接续或新建会话，返回线程 ID
async fn open_thread(service: &ConversationService, thread: Option<String>, scope: Option<String>) -> Result<String> {
    match thread {
        Some(id) => {
            service.resume_conversation(&id, scope).await?;
            Ok(id)
        }
        None => service.begin_conversation(scope).await,
    }
}

async fn ask_once(
    service: &ConversationService,
    thread: Option<String>,
    scope: Option<String>,
    question: &str,
) -> Result<()> {
    let thread_id = open_thread(service, thread, scope).await?;
    let response = service.ask(&thread_id, question).await?;
    println!("{}", response.answer);
    eprintln!("(thread: {thread_id})");
    Ok(())
}

async fn chat(service: &ConversationService, thread: Option<String>, scope: Option<String>) -> Result<()> {
    let thread_id = open_thread(service, thread, scope).await?;
    println!("💬 thread {thread_id}  (Ctrl-D to quit, /scope <id> to change scope)");

    let mut editor = DefaultEditor::new().map_err(|e| docqa_agent::error::QaError::Other(e.to_string()))?;
    loop {
        let line = match editor.readline("👤 > ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(docqa_agent::error::QaError::Other(e.to_string())),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        if let Some(scope) = line.strip_prefix("/scope") {
            let scope = scope.trim();
            let scope = (!scope.is_empty()).then(|| scope.to_string());
            service.set_scope(&thread_id, scope.clone()).await?;
            println!("🔎 scope: {}", scope.as_deref().unwrap_or("(all documents)"));
            continue;
        }

        match service.ask(&thread_id, line).await {
            Ok(response) => println!("🤖 {}\n", response.answer),
            // 单轮失败不结束会话，快照保持上一轮的状态
            Err(e) => eprintln!("❌ {e}\n"),
        }
    }

    println!("👋 resume later with: docqa chat --thread {thread_id}");
    Ok(())
}
