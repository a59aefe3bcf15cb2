//! weft - ingest and inspect conversation histories

mod config;
mod processors;
mod store;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use weft_memory::{
    ConversationKey, MessageList, MessageSource, MessageStore, ProcessorRunner, SaveScheduler,
    Thread,
};
use weft_message::MessageInput;

/// weft - conversation history tools
#[derive(Parser, Debug)]
#[command(name = "weft")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add turns from a JSONL file (one message per line, any supported shape)
    Ingest {
        file: PathBuf,

        #[arg(long)]
        thread: String,

        #[arg(long)]
        resource: String,

        /// Who produced the turns
        #[arg(long, value_enum, default_value_t = SourceArg::User)]
        source: SourceArg,
    },
    /// Print a stored conversation, one JSON message per line
    Show {
        #[arg(long)]
        thread: String,

        #[arg(long)]
        resource: String,

        #[arg(long, value_enum, default_value_t = View::Canonical)]
        view: View,
    },
    /// Initialize config file
    InitConfig,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SourceArg {
    User,
    Response,
}

impl From<SourceArg> for MessageSource {
    fn from(source: SourceArg) -> Self {
        match source {
            SourceArg::User => MessageSource::User,
            SourceArg::Response => MessageSource::Response,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum View {
    Canonical,
    Ui,
    Flat,
    Core,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("weft=debug")
            .init();
    }

    match args.command {
        Command::InitConfig => {
            match config::Config::init() {
                Ok(path) => {
                    println!("Config file created at: {}", path.display());
                    println!("\nExample config:\n{}", config::example_config());
                }
                Err(e) => {
                    eprintln!("Error creating config: {}", e);
                    std::process::exit(1);
                }
            }
            Ok(())
        }
        Command::Ingest {
            file,
            thread,
            resource,
            source,
        } => {
            let cfg = config::Config::load();
            let key = ConversationKey::new(thread, resource);
            ingest(&cfg, &key, &file, source.into()).await
        }
        Command::Show {
            thread,
            resource,
            view,
        } => {
            let cfg = config::Config::load();
            let key = ConversationKey::new(thread, resource);
            show(&cfg, &key, view).await
        }
    }
}

/// Parse a JSONL file of messages
fn read_inputs(path: &Path) -> anyhow::Result<Vec<MessageInput>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            let value: serde_json::Value = serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid JSON", path.display(), n + 1))?;
            MessageInput::from_value(value)
                .with_context(|| format!("{}:{}: unsupported message", path.display(), n + 1))
        })
        .collect()
}

/// Load a stored conversation into a list bound to its key
async fn load_list(store: &dyn MessageStore, key: &ConversationKey) -> anyhow::Result<MessageList> {
    let records = store
        .load_messages(key)
        .await
        .with_context(|| format!("Failed to load conversation {}", key))?;
    let mut list = MessageList::for_conversation(key);
    list.add(records, MessageSource::Memory)
        .context("Stored conversation is corrupt")?;
    Ok(list)
}

async fn ingest(
    cfg: &config::Config,
    key: &ConversationKey,
    file: &Path,
    source: MessageSource,
) -> anyhow::Result<()> {
    let inputs = read_inputs(file)?;
    let store = Arc::new(store::JsonlStore::new(cfg.storage_dir()));

    let thread = match store.get_thread(&key.thread_id).await? {
        Some(thread) => thread,
        None => Thread::new(key.thread_id.clone(), key.resource_id.clone()),
    };
    store
        .save_thread(thread)
        .await
        .with_context(|| format!("Cannot use thread {}", key.thread_id))?;

    let mut list = load_list(&*store, key).await?;
    let before = list.len();
    list.add(inputs, source)?;

    let blocked = processors::BlockedTerms::new(&cfg.blocked_terms);
    if !blocked.is_empty() && source == MessageSource::User {
        let runner = ProcessorRunner::new().with_processor(blocked);
        if let Err(e) = runner.run_input(&mut list).await {
            if e.is_abort() {
                eprintln!("Input rejected: {}", e);
                std::process::exit(2);
            }
            return Err(e.into());
        }
    }
    let added = list.len().saturating_sub(before);

    let scheduler = SaveScheduler::new(store, cfg.save_config());
    let list = Arc::new(Mutex::new(list));
    let written = scheduler
        .flush_messages(&list, key)
        .await
        .context("Failed to save conversation")?;

    println!(
        "Ingested {} into {} ({} new turns, {} written)",
        file.display(),
        key,
        added,
        written
    );
    Ok(())
}

async fn show(cfg: &config::Config, key: &ConversationKey, view: View) -> anyhow::Result<()> {
    let store = store::JsonlStore::new(cfg.storage_dir());
    let list = load_list(&store, key).await?;

    let lines = match view {
        View::Canonical => to_lines(&list.all())?,
        View::Ui => to_lines(&list.all_ui())?,
        View::Flat => to_lines(&list.all_flat())?,
        View::Core => to_lines(&list.all_core())?,
    };
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

fn to_lines<T: serde::Serialize>(items: &[T]) -> anyhow::Result<Vec<String>> {
    items
        .iter()
        .map(|item| serde_json::to_string(item).map_err(Into::into))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_jsonl(dir: &Path, lines: &[serde_json::Value]) -> PathBuf {
        let path = dir.join("input.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        path
    }

    fn test_config(dir: &Path) -> config::Config {
        config::Config {
            storage_dir: Some(dir.join("store").display().to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_read_inputs_reports_bad_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_jsonl(
            dir.path(),
            &[
                serde_json::json!({"role": "user", "content": "hi"}),
                serde_json::json!({"text": "no shape"}),
            ],
        );
        let err = read_inputs(&path).unwrap_err();
        assert!(format!("{:#}", err).contains(":2: unsupported message"));
    }

    #[tokio::test]
    async fn test_ingest_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let key = ConversationKey::new("t1", "r1");
        let path = write_jsonl(
            dir.path(),
            &[
                serde_json::json!({"role": "user", "content": "what's 40 + 2?"}),
                serde_json::json!({"role": "assistant", "content": [
                    {"type": "text", "text": "calling tool"},
                    {"type": "tool-call", "toolCallId": "t1", "toolName": "sum", "args": {"a": 40, "b": 2}}
                ]}),
                serde_json::json!({"role": "tool", "content": [
                    {"type": "tool-result", "toolCallId": "t1", "toolName": "sum", "result": 42}
                ]}),
                serde_json::json!({"role": "assistant", "content": "done"}),
            ],
        );

        ingest(&cfg, &key, &path, MessageSource::Response).await.unwrap();

        let store = store::JsonlStore::new(cfg.storage_dir());
        let list = load_list(&store, &key).await.unwrap();
        assert_eq!(list.len(), 2);
        let assistant = &list.all()[1];
        assert_eq!(assistant.text(), "calling tooldone");
        assert!(assistant.tool_invocations().all(|inv| inv.is_resolved()));

        // Core inputs carry no ids, so a second ingest adds new turns
        ingest(&cfg, &key, &path, MessageSource::Response).await.unwrap();
        let list = load_list(&store, &key).await.unwrap();
        assert_eq!(list.len(), 4);
    }
}
