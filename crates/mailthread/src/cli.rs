use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use serde_json::{Value as JsonValue, json};

pub(crate) const CLI_SCHEMA_VERSION: &str = "mailthread.cli.v1";

#[derive(Parser, Debug)]
#[command(name = "mailthread", version, about = "Threaded mail store maintenance")]
pub(crate) struct Cli {
    /// SQLite database path.
    #[arg(long, global = true)]
    pub(crate) database: Option<PathBuf>,
    /// Directory for message parts stored on disk.
    #[arg(long, global = true)]
    pub(crate) attachments: Option<PathBuf>,
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CliCommand {
    /// Create the database and apply the schema.
    Init,
    Folders(FoldersCmd),
    /// Store an RFC 5322 message file and thread it.
    Import(ImportArgs),
    Copy(TransferArgs),
    Move(TransferArgs),
    /// Destroy messages by server UID.
    Destroy(DestroyArgs),
    /// Destroy tombstones, and optionally local-only messages, in a folder.
    Purge(PurgeArgs),
    /// Show the thread a message belongs to.
    Thread(ThreadArgs),
    /// Check the thread forest for structural damage.
    Verify,
}

#[derive(Args, Debug)]
pub(crate) struct FoldersCmd {
    #[command(subcommand)]
    pub(crate) command: FoldersCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum FoldersCommand {
    List,
    Add(FolderName),
    /// Remove every message of a folder.
    Clear(FolderName),
}

#[derive(Args, Debug)]
pub(crate) struct FolderName {
    pub(crate) name: String,
}

#[derive(Args, Debug)]
pub(crate) struct ImportArgs {
    #[arg(long)]
    pub(crate) folder: String,
    /// Server UID; a local UID is generated when omitted.
    #[arg(long)]
    pub(crate) uid: Option<String>,
    pub(crate) file: PathBuf,
}

#[derive(Args, Debug)]
pub(crate) struct TransferArgs {
    #[arg(long)]
    pub(crate) message: i64,
    #[arg(long)]
    pub(crate) to: String,
}

#[derive(Args, Debug)]
pub(crate) struct DestroyArgs {
    #[arg(long)]
    pub(crate) folder: String,
    #[arg(required = true)]
    pub(crate) uids: Vec<String>,
}

#[derive(Args, Debug)]
pub(crate) struct PurgeArgs {
    #[arg(long)]
    pub(crate) folder: String,
    #[arg(long)]
    pub(crate) local: bool,
}

#[derive(Args, Debug)]
pub(crate) struct ThreadArgs {
    #[arg(long)]
    pub(crate) message: i64,
}

pub(crate) fn output_ok(value: JsonValue) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string(&json!({
            "schema": CLI_SCHEMA_VERSION,
            "ok": true,
            "result": value
        }))?
    );
    Ok(())
}

pub(crate) fn output_error(message: &str) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string(&json!({
            "schema": CLI_SCHEMA_VERSION,
            "ok": false,
            "error": message
        }))?
    );
    Ok(())
}
