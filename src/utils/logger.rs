use colored::{ColoredString, Colorize};
use env_logger::Builder;
use log::Level;
use std::io::Write;
use std::thread;

use crate::utils::config::PackagePaths;

/// Install the logger. Verbose runs log at debug and tag each line with the thread it
/// came from, so worker lines read `[stagepool 1-0]` for stage 1, worker 0.
pub fn setup_logging(verbose: bool) {
    use log::LevelFilter;

    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    // try_init: tests and library callers may already have a logger installed.
    let _ = Builder::from_default_env()
        .filter_level(LevelFilter::Warn) // Default: only warnings from dependencies
        .filter_module(env!("CARGO_PKG_NAME"), level)
        .format(move |buf, record| {
            let name = PackagePaths::get().pkg_name();
            let tag = if verbose {
                format!("{} {}", name.cyan(), thread_label().dimmed())
            } else {
                name.cyan().to_string()
            };
            let line = match record.level() {
                Level::Error | Level::Warn => {
                    let level_str = match record.level() {
                        Level::Warn => "WARN".yellow(),
                        _ => "ERROR".red(),
                    };
                    let path = record.target().to_string().white();
                    format!("[{} {} {}] {}", tag, level_str, path, record.args())
                }
                _ => format!("[{}] {}", tag, record.args()),
            };
            writeln!(buf, "{}", line)
        })
        .try_init();
}

/// Short name of the current thread: `<stage>-<worker>` on worker threads, the thread
/// name elsewhere, `?` for unnamed threads.
pub fn thread_label() -> String {
    let current = thread::current();
    let Some(name) = current.name() else {
        return "?".to_string();
    };
    let prefix = PackagePaths::get().pkg_name();
    name.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('-'))
        .unwrap_or(name)
        .to_string()
}

/// Colors for the run summary.
pub struct Colors;

impl Colors {
    pub const EMITTED: &'static str = "green";
    pub const FAILED: &'static str = "red";
    pub const DROPPED: &'static str = "yellow";

    pub fn colorize(color: &str, text: &str) -> ColoredString {
        text.color(color)
    }
}
