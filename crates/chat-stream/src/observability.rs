use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn observability_enabled() -> bool {
    ["CHAT_STREAM_OBSERVABILITY_ENABLED", "CHAT_STREAM_OBSERVABILITY"]
        .into_iter()
        .find_map(|key| std::env::var(key).ok())
        .map(|value| parse_bool_env(&value).unwrap_or(true))
        .unwrap_or(true)
}

/// Pipeline crates log at `info`; everything else (hyper, reqwest, rustls)
/// only surfaces warnings.
const DEFAULT_FILTER: &str = "warn,chat_stream=info,chat_stream_cli=info";

/// `CHAT_STREAM_LOG_LEVEL` wins when it parses, then `RUST_LOG`, then
/// [`DEFAULT_FILTER`].
fn filter_from(level: Option<&str>, rust_log: Option<&str>) -> EnvFilter {
    [level, rust_log]
        .into_iter()
        .flatten()
        .find_map(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

fn resolve_env_filter() -> EnvFilter {
    let level = std::env::var("CHAT_STREAM_LOG_LEVEL").ok();
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    filter_from(level.as_deref(), rust_log.as_deref())
}

/// Installs the global tracing subscriber once per process.
///
/// Environment variables:
/// - `CHAT_STREAM_OBSERVABILITY_ENABLED` / `CHAT_STREAM_OBSERVABILITY`: enable flag (default enabled).
/// - `CHAT_STREAM_LOG_LEVEL`: level/filter override (`info`, `chat_stream=debug`, ...).
/// - `CHAT_STREAM_JSON_LOG_PATH`: write JSONL to this file instead of the console.
/// - `RUST_LOG`: fallback filter. With neither set, pipeline crates log at
///   `info` and dependencies at `warn`.
///
/// Console output goes to stderr so that streamed text on stdout stays clean.
pub fn init_observability() {
    INIT.get_or_init(|| {
        if !observability_enabled() {
            return;
        }

        let env_filter = resolve_env_filter();
        if let Ok(path_raw) = std::env::var("CHAT_STREAM_JSON_LOG_PATH") {
            let path = std::path::PathBuf::from(path_raw);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                let _ = std::fs::create_dir_all(parent);
            }
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("chat-stream.logs.jsonl");
            let writer = tracing_appender::rolling::never(dir, file_name);
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_target(false)
                .with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .try_init();
        } else {
            let console_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init();
        }
    });
}
