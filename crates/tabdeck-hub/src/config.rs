use crate::github::DEFAULT_GH_BIN;
use crate::registry::DEFAULT_CLOSED_TAB_CAPACITY;
use crate::router::DEFAULT_EXTENSIONS_URL;
use clap::Parser;
use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

const LOG_FILE_NAME: &str = "tabdeck-hub.log";

#[derive(Parser, Debug)]
#[command(name = "tabdeck-hub", about = "Background coordinator for the tabdeck palette")]
pub struct Args {
    #[arg(long, env = "TABDECK_SOCKET", default_value = "")]
    pub socket: String,
    #[arg(long, env = "TABDECK_SETTINGS", default_value = "")]
    pub settings: String,
    #[arg(long, default_value_t = false)]
    pub debug: bool,
    #[arg(long, env = "TABDECK_LOG_DIR", default_value = "")]
    pub log_dir: String,
    #[arg(long, default_value_t = 2)]
    pub write_timeout: u64,
    #[arg(long, default_value_t = 64)]
    pub queue_capacity: usize,
    #[arg(long, default_value_t = DEFAULT_CLOSED_TAB_CAPACITY)]
    pub closed_tab_capacity: usize,
    #[arg(long, default_value = DEFAULT_EXTENSIONS_URL)]
    pub extensions_url: String,
    /// Hosts whose favicon is served from `/favicon.ico` directly.
    #[arg(long = "favicon-direct-host")]
    pub favicon_direct_hosts: Vec<String>,
    #[arg(long, env = "TABDECK_GH_BIN", default_value = DEFAULT_GH_BIN)]
    pub gh_bin: String,
}

#[derive(Clone, Debug)]
pub struct HubConfig {
    pub socket_path: PathBuf,
    pub settings_path: PathBuf,
    pub debug: bool,
    pub log_dir: String,
    pub write_timeout: Duration,
    pub queue_capacity: usize,
    pub closed_tab_capacity: usize,
    pub extensions_url: String,
    pub favicon_direct_hosts: Vec<String>,
    pub gh_bin: String,
}

pub fn load_config() -> HubConfig {
    HubConfig::from_args(Args::parse())
}

impl HubConfig {
    pub fn from_args(args: Args) -> Self {
        Self {
            socket_path: resolve_path(&args.socket, default_socket_path),
            settings_path: resolve_path(&args.settings, default_settings_path),
            debug: args.debug || env_true("TABDECK_DEBUG"),
            log_dir: args.log_dir.trim().to_string(),
            write_timeout: Duration::from_secs(args.write_timeout.max(1)),
            queue_capacity: args.queue_capacity.max(1),
            closed_tab_capacity: args.closed_tab_capacity.max(1),
            extensions_url: args.extensions_url,
            favicon_direct_hosts: args.favicon_direct_hosts,
            gh_bin: args.gh_bin,
        }
    }
}

fn resolve_path(flag: &str, fallback: fn() -> PathBuf) -> PathBuf {
    if flag.trim().is_empty() {
        fallback()
    } else {
        PathBuf::from(flag.trim())
    }
}

fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("tabdeck")
        .join("hub.sock")
}

fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("tabdeck")
        .join("settings.json")
}

pub fn init_logging(config: &HubConfig) -> Option<LogGuard> {
    let level = default_log_level(std::env::var("TABDECK_LOG_LEVEL").ok(), config.debug);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = match open_log_file(&config.log_dir) {
        Ok(log_guard) => log_guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = writer.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(writer)
}

/// Filter used when `RUST_LOG` is unset: `TABDECK_LOG_LEVEL`, then `--debug`.
fn default_log_level(env_level: Option<String>, debug: bool) -> String {
    match env_level.filter(|level| !level.trim().is_empty()) {
        Some(level) => level,
        None if debug => "debug".to_string(),
        None => "info".to_string(),
    }
}

/// Keeps the log file open for the lifetime of the process.
pub struct LogGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

struct MultiWriter {
    stdout: io::Stdout,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>) -> Self {
        Self {
            stdout: io::stdout(),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    if std::fs::create_dir_all(&dir).is_err() {
        return Ok(LogGuard { file: None });
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}
