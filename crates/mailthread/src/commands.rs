use anyhow::{Context, Result, anyhow};
use mailthread_core::{MailStore, SqliteMailStore, StoredMessage};
use serde_json::{Value as JsonValue, json};
use tracing::info;

use crate::cli::{CliCommand, FoldersCommand, output_ok};
use crate::config::StoreConfig;
use crate::import::message_from_raw;

async fn open_store(config: &StoreConfig) -> Result<SqliteMailStore> {
    if let Some(parent) = config.database.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let store = SqliteMailStore::connect(
        &config.database.to_string_lossy(),
        config.attachments_dir.clone(),
    )
    .await?;
    store.init().await?;
    Ok(store)
}

fn format_date(ts: Option<i64>) -> JsonValue {
    ts.and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        .map(|date| json!(date.to_rfc3339()))
        .unwrap_or(JsonValue::Null)
}

fn message_to_json(message: &StoredMessage) -> JsonValue {
    json!({
        "id": message.id,
        "folder_id": message.folder_id,
        "uid": message.uid,
        "message_id": message.message_id,
        "subject": message.content.subject,
        "from": message.content.sender_list,
        "date": format_date(message.content.date),
        "deleted": message.deleted,
        "empty": message.empty,
    })
}

pub(crate) async fn run_cli(command: CliCommand, config: &StoreConfig) -> Result<()> {
    let store = open_store(config).await?;

    match command {
        CliCommand::Init => output_ok(json!({
            "database": config.database.display().to_string(),
            "attachments": config.attachments_dir.display().to_string(),
        })),
        CliCommand::Folders(cmd) => match cmd.command {
            FoldersCommand::List => {
                let folders = store.list_folders().await?;
                output_ok(serde_json::to_value(folders)?)
            }
            FoldersCommand::Add(args) => {
                let id = store.create_folder(&args.name).await?;
                output_ok(json!({ "id": id, "name": args.name }))
            }
            FoldersCommand::Clear(args) => {
                let folder_id = store.require_folder(&args.name).await?;
                store.clear_all_messages(folder_id).await?;
                info!(folder = %args.name, "cleared folder");
                output_ok(json!({ "folder": args.name }))
            }
        },
        CliCommand::Import(args) => {
            let folder_id = store.require_folder(&args.folder).await?;
            let raw = std::fs::read(&args.file)
                .with_context(|| format!("reading {}", args.file.display()))?;
            let data = message_from_raw(&raw)?;
            let id = store
                .save_message(folder_id, args.uid.as_deref(), &data)
                .await?;
            let thread = store.thread_for_message(id).await?;
            output_ok(json!({ "id": id, "thread": thread }))
        }
        CliCommand::Copy(args) => {
            let destination = store.require_folder(&args.to).await?;
            let id = store.copy_message(args.message, destination).await?;
            output_ok(json!({ "source": args.message, "id": id }))
        }
        CliCommand::Move(args) => {
            let destination = store.require_folder(&args.to).await?;
            let id = store.move_message(args.message, destination).await?;
            output_ok(json!({ "source": args.message, "id": id }))
        }
        CliCommand::Destroy(args) => {
            let folder_id = store.require_folder(&args.folder).await?;
            store.destroy_messages(folder_id, &args.uids).await?;
            output_ok(json!({ "folder": args.folder, "uids": args.uids }))
        }
        CliCommand::Purge(args) => {
            let folder_id = store.require_folder(&args.folder).await?;
            let tombstones = store.destroy_deleted_messages(folder_id).await?;
            let local = if args.local {
                store.destroy_local_only_messages(folder_id).await?
            } else {
                0
            };
            output_ok(json!({ "tombstones": tombstones, "local": local }))
        }
        CliCommand::Thread(args) => {
            let node = store
                .thread_for_message(args.message)
                .await?
                .ok_or_else(|| anyhow!("message {} is not threaded", args.message))?;
            let members = store.thread_members(node.root).await?;
            let mut out = Vec::new();
            for member in members {
                let message = store.get_message(member.message_id).await?;
                out.push(json!({
                    "thread_id": member.thread_id,
                    "parent": member.parent,
                    "message": message.as_ref().map(message_to_json),
                }));
            }
            output_ok(json!({ "root": node.root, "node": node, "members": out }))
        }
        CliCommand::Verify => {
            let report = store.verify_thread_forest().await?;
            output_ok(json!({
                "consistent": report.is_consistent(),
                "report": report,
            }))
        }
    }
}
