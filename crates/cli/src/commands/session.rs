//! `roundclaw sessions|history|context|compress|rebuild`: session inspection.

use std::path::Path;
use std::sync::Arc;

use chrono::DateTime;
use roundclaw_context::{AofFlusher, ContextStore, LogItem};
use roundclaw_core::{Message, SessionKey};

use super::{load_config, preview};

const PREVIEW_CHARS: usize = 100;

/// The session store of the configured workspace, plus its AOF flusher when
/// `session.aof_write_through` is off.
struct Workspace {
    store: Arc<ContextStore>,
    flusher: Option<AofFlusher>,
}

impl Workspace {
    fn open(config_path: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let config = load_config(config_path)?;
        let store = Arc::new(ContextStore::new(&config));
        let flusher = AofFlusher::from_config(Arc::clone(&store), &config.session);
        Ok(Self { store, flusher })
    }

    /// Drain buffered AOF entries before the process exits.
    async fn close(self) {
        if let Some(flusher) = self.flusher {
            flusher.shutdown().await;
        }
    }
}

pub async fn list(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let ws = Workspace::open(config_path)?;
    let keys = ws.store.list_sessions()?;
    if keys.is_empty() {
        println!("No sessions in {}", ws.store.sessions_dir().display());
    }

    for key in keys {
        let session = ws.store.session(&key).await?;
        println!(
            "{key:<32} {:>6} logged {:>6} in context",
            session.aof.len().await,
            session.context.len().await
        );
    }
    ws.close().await;
    Ok(())
}

pub async fn history(
    config_path: Option<&Path>,
    key: &SessionKey,
    limit: Option<usize>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let ws = Workspace::open(config_path)?;
    let items = ws.store.existing_session(key).await?.aof.read_all().await?;
    let skip = limit.map_or(0, |n| items.len().saturating_sub(n));

    for item in &items[skip..] {
        if json {
            println!("{}", serde_json::to_string(item)?);
        } else {
            println!("{}", render_item(item));
        }
    }
    ws.close().await;
    Ok(())
}

pub async fn context(config_path: Option<&Path>, key: &SessionKey) -> Result<(), Box<dyn std::error::Error>> {
    let ws = Workspace::open(config_path)?;
    let session = ws.store.existing_session(key).await?;
    for item in session.context.items().await {
        println!("{}", render_item(&item));
    }

    let tokens = ws.store.estimate_tokens(key).await?;
    let budget = ws.store.budget();
    println!();
    println!(
        "~{tokens} tokens ({:.1}% of {}), compact above {}, summarize above {}",
        budget.usage_percent(tokens),
        budget.window_tokens,
        budget.compact_threshold,
        budget.summarize_threshold
    );
    ws.close().await;
    Ok(())
}

pub async fn compress(
    config_path: Option<&Path>,
    key: &SessionKey,
    count: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let ws = Workspace::open(config_path)?;
    ws.store.existing_session(key).await?;
    let count = count.unwrap_or(ws.store.budget().compress_batch);
    let before = ws.store.estimate_tokens(key).await?;
    let compressed = ws.store.compress_tool_calls(key, count).await?;
    let after = ws.store.estimate_tokens(key).await?;
    println!("Compressed {compressed} tool result(s): ~{before} -> ~{after} tokens");
    ws.close().await;
    Ok(())
}

pub async fn rebuild(config_path: Option<&Path>, key: &SessionKey) -> Result<(), Box<dyn std::error::Error>> {
    let ws = Workspace::open(config_path)?;
    ws.store.existing_session(key).await?;
    let restored = ws.store.rebuild_context(key).await?;
    println!("Rebuilt context of {key} from {restored} logged message(s)");
    ws.close().await;
    Ok(())
}

/// One display line for a log item.
fn render_item(item: &LogItem) -> String {
    let time = DateTime::from_timestamp(item.created, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| item.created.to_string());

    let body = match &item.message {
        Message::Assistant { tool_calls, .. } if !tool_calls.is_empty() => {
            let names: Vec<&str> = tool_calls.iter().map(|c| c.name.as_str()).collect();
            let text = item.message.content();
            if text.is_empty() {
                format!("-> {}", names.join(", "))
            } else {
                format!("{} -> {}", preview(text, PREVIEW_CHARS), names.join(", "))
            }
        }
        Message::Tool { tool_call_id, content } => format!("[{tool_call_id}] {}", preview(content, PREVIEW_CHARS)),
        other => preview(other.content(), PREVIEW_CHARS),
    };
    format!("{time} {:<9} {body}", item.role)
}
