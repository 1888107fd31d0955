use std::path::PathBuf;

pub(crate) const LOG_ENV: &str = "MAILTHREAD_LOG";
const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Clone)]
pub(crate) struct StoreConfig {
    pub(crate) database: PathBuf,
    pub(crate) attachments_dir: PathBuf,
    pub(crate) log_filter: String,
    pub(crate) load_error: Option<String>,
}

fn xdg_config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

fn xdg_state_dir() -> PathBuf {
    std::env::var_os("XDG_STATE_HOME")
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local").join("state"))
        })
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

fn config_path_candidates() -> Vec<PathBuf> {
    vec![
        PathBuf::from("mailthread.toml"),
        xdg_config_dir().join("mailthread").join("mailthread.toml"),
    ]
}

fn load_config_text() -> Option<String> {
    for path in config_path_candidates() {
        if let Ok(content) = std::fs::read_to_string(&path) {
            return Some(content);
        }
    }
    None
}

fn defaults() -> StoreConfig {
    let state = xdg_state_dir().join("mailthread");
    StoreConfig {
        database: state.join("mailthread.db"),
        attachments_dir: state.join("attachments"),
        log_filter: DEFAULT_LOG_FILTER.to_string(),
        load_error: None,
    }
}

/// Reads `mailthread.toml`. Command-line paths win over the file, and
/// `MAILTHREAD_LOG` wins over `[log].filter`.
pub(crate) fn load_store_config(
    database: Option<PathBuf>,
    attachments: Option<PathBuf>,
) -> StoreConfig {
    let mut config = defaults();
    if let Some(content) = load_config_text() {
        match toml::from_str::<toml::Value>(&content) {
            Ok(value) => apply_file(&mut config, &value),
            Err(err) => config.load_error = Some(err.to_string()),
        }
    }
    if let Ok(filter) = std::env::var(LOG_ENV) {
        if !filter.trim().is_empty() {
            config.log_filter = filter;
        }
    }
    if let Some(database) = database {
        config.database = database;
    }
    if let Some(attachments) = attachments {
        config.attachments_dir = attachments;
    }
    config
}

fn apply_file(config: &mut StoreConfig, value: &toml::Value) {
    if let Some(store) = value.get("store") {
        if let Some(database) = store.get("database").and_then(|v| v.as_str()) {
            config.database = PathBuf::from(database);
        }
        if let Some(dir) = store.get("attachments_dir").and_then(|v| v.as_str()) {
            config.attachments_dir = PathBuf::from(dir);
        }
    }
    if let Some(filter) = value
        .get("log")
        .and_then(|log| log.get("filter"))
        .and_then(|v| v.as_str())
    {
        config.log_filter = filter.to_string();
    }
}
