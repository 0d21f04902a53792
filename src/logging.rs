//! Logging backend which writes timestamped lines to stderr.

use chrono::Local;
use log::{Level, LevelFilter, Metadata, Record};

pub struct Logger;

impl Logger {
    fn commit(&self, record: &Record) {
        let level_name = match record.level() {
            Level::Error => "error",
            Level::Warn => "warning",
            Level::Info => "info",
            Level::Debug | Level::Trace => "debug",
        };

        let module = record
            .module_path()
            .and_then(|path| path.split("::").last())
            .unwrap_or("unknown");

        //      [date time] [module] [level] Text
        eprintln!(
            "[{}] [{}] [{}] {}",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            module,
            level_name,
            record.args()
        );
    }
}

impl log::Log for Logger {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.commit(record);
        }
    }

    fn flush(&self) {}
}

static LOGGER: Logger = Logger;

fn install_panic_hook() {
    // Route panic output through the log so it carries a timestamp like everything else.
    std::panic::set_hook(Box::new(|info| {
        let message = info
            .payload()
            .downcast_ref::<&str>()
            .map(|message| message.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "no message, sorry :/".to_string());

        let backtrace = std::backtrace::Backtrace::force_capture();

        log::error!("panic: {message}\n{backtrace}");
    }));
}

pub fn init(verbose: bool) {
    install_panic_hook();

    let level = if verbose || cfg!(feature = "debug") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    log::set_logger(&LOGGER)
        .map(|_| log::set_max_level(level))
        .unwrap();
}
