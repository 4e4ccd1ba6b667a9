use anyhow::{bail, Context, Result};
use clap::{builder::PossibleValuesParser, Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;

use duelbox_core_sdk::{
    compare::{ComparisonEvent, ComparisonState, Comparator},
    config::Config,
    credentials::CredentialStore,
    db::SqliteStore,
    history::HistoryStore,
    llm::LlmClient,
    models::{self, HistoryEntry, ModelSelection, ProviderKind},
    server, telemetry,
};

/**
 * \brief CLI 程序入口。
 */
#[derive(Parser, Debug)]
#[command(name = "duelbox", version, about = "Compare Gemini and Groq side by side")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 管理已保存的 API Key。
     */
    Keys {
        #[command(subcommand)]
        action: KeysCommand,
    },

    /**
     * \brief 列出各 Provider 可选模型。
     */
    Models,

    /**
     * \brief 把同一 prompt 发给两个 Provider，结果到达即打印。
     */
    Compare {
        #[arg(long)]
        prompt: String,
        #[arg(long, value_parser = model_value_parser(ProviderKind::Gemini))]
        gemini_model: Option<String>,
        #[arg(long, value_parser = model_value_parser(ProviderKind::Groq))]
        groq_model: Option<String>,
    },

    /**
     * \brief 查看历史对比，最新在前。
     */
    History {
        /** \brief 只显示包含该文本的 prompt（不区分大小写）。 */
        #[arg(long)]
        search: Option<String>,
        #[command(subcommand)]
        action: Option<HistoryCommand>,
    },

    /**
     * \brief 开关本地事件日志。
     */
    Telemetry {
        #[arg(value_enum)]
        state: Toggle,
    },

    /**
     * \brief 启动本地 HTTP 服务并提供前端页面。
     */
    Serve {
        #[arg(long, default_value = "127.0.0.1:5173")]
        addr: String,
    },
}

#[derive(Subcommand, Debug)]
enum KeysCommand {
    /** \brief 保存一个或两个密钥。 */
    Set {
        #[arg(long)]
        gemini: Option<String>,
        #[arg(long)]
        groq: Option<String>,
    },
    /** \brief 显示已保存的密钥（打码）。 */
    Show,
}

#[derive(Subcommand, Debug)]
enum HistoryCommand {
    /** \brief 完整打印一条记录。 */
    Show { id: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Toggle {
    On,
    Off,
}

fn model_value_parser(kind: ProviderKind) -> PossibleValuesParser {
    let values: Vec<&'static str> = models::catalog(kind).iter().map(|m| m.id).collect();
    PossibleValuesParser::new(values)
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = Config::from_env().context("read configuration failed")?;
    let store = SqliteStore::open(&config.db_path).context("open database failed")?;
    telemetry::load(&store).context("load telemetry flag failed")?;

    match cli.command {
        Commands::Keys { action } => {
            let creds = CredentialStore::new(&store);
            match action {
                KeysCommand::Set { gemini, groq } => {
                    if gemini.is_none() && groq.is_none() {
                        bail!("nothing to save, pass --gemini and/or --groq");
                    }
                    if let Some(key) = gemini {
                        creds
                            .set(ProviderKind::Gemini, &key)
                            .context("save gemini key failed")?;
                    }
                    if let Some(key) = groq {
                        creds
                            .set(ProviderKind::Groq, &key)
                            .context("save groq key failed")?;
                    }
                    println!("API keys saved");
                }
                KeysCommand::Show => {
                    for kind in [ProviderKind::Gemini, ProviderKind::Groq] {
                        match creds.masked(kind)? {
                            Some(masked) if creds.looks_valid(kind)? => {
                                println!("{:<7} {}", kind.label(), masked)
                            }
                            Some(masked) => {
                                println!("{:<7} {} (looks too short)", kind.label(), masked)
                            }
                            None => println!("{:<7} not set", kind.label()),
                        }
                    }
                }
            }
        }
        Commands::Models => {
            for kind in [ProviderKind::Gemini, ProviderKind::Groq] {
                println!("{}:", kind.label());
                for (i, model) in models::catalog(kind).iter().enumerate() {
                    let marker = if i == 0 { " (default)" } else { "" };
                    println!("  {:<26} {}{}", model.id, model.name, marker);
                }
            }
        }
        Commands::Compare {
            prompt,
            gemini_model,
            groq_model,
        } => {
            let client = LlmClient::new(&config).context("build http client failed")?;
            let selection = ModelSelection::with_overrides(gemini_model, groq_model);
            let (tx, rx) = mpsc::unbounded_channel();

            let comparator = Comparator::new(&client, &store);
            let (state, _) = futures_util::future::join(
                comparator.run(&prompt, &selection, Some(tx)),
                print_events(rx),
            )
            .await;

            if let ComparisonState::Idle {
                notice: Some(notice),
            } = state
            {
                bail!(notice.message());
            }
        }
        Commands::History { search, action } => {
            let history = HistoryStore::new(&store);
            match action {
                Some(HistoryCommand::Show { id }) => {
                    let entry = history
                        .get(&id)?
                        .with_context(|| format!("no history entry with id {}", id))?;
                    print_entry(&entry);
                }
                None => {
                    let entries = match search.as_deref() {
                        Some(term) => history.search(term)?,
                        None => history.list()?,
                    };
                    if entries.is_empty() {
                        if search.is_some() {
                            println!("No matching prompts found");
                        } else {
                            println!("No history yet. Start by comparing some prompts!");
                        }
                    }
                    for entry in entries {
                        println!("{}  {}  {}", entry.id, entry.formatted_time(), entry.prompt);
                    }
                }
            }
        }
        Commands::Telemetry { state } => {
            let enabled = matches!(state, Toggle::On);
            telemetry::save(&store, enabled).context("save telemetry failed")?;
            println!("Telemetry {}", if enabled { "enabled" } else { "disabled" });
        }
        Commands::Serve { addr } => {
            server::run(&addr, &config).await?;
        }
    }

    Ok(())
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<ComparisonEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            ComparisonEvent::Started { prompt } => println!("Comparing: {}\n", prompt),
            ComparisonEvent::ProviderFinished { provider, result } => {
                println!("== {} ==", provider.label());
                match result.error {
                    Some(err) => println!("{}", err),
                    None if result.text.is_empty() => println!("(empty response)"),
                    None => println!("{}", result.text),
                }
                println!();
            }
            ComparisonEvent::Completed { entry } => println!("Saved to history (id={})", entry.id),
            ComparisonEvent::Blocked { .. } => {}
        }
    }
}

fn print_entry(entry: &HistoryEntry) {
    println!("{}  {}", entry.id, entry.formatted_time());
    println!("Prompt: {}\n", entry.prompt);
    println!("== Gemini ==\n{}\n", entry.gemini_response);
    println!("== Groq ==\n{}", entry.groq_response);
}
