use log::{LevelFilter, Metadata, Record, SetLoggerError};

pub struct Logger {
    max_level: LevelFilter,
}

pub fn init_with_level(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_max_level(level);
    log::set_boxed_logger(Box::new(Logger { max_level: level }))
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // webrtc and tungstenite are very chatty below info
        if !record
            .module_path()
            .map(|x| x.starts_with("huddle"))
            .unwrap_or_default()
            && record.level() > log::Level::Info
        {
            return;
        }
        println!(
            "{} [{}] {}",
            record.level(),
            record.module_path().unwrap_or_default(),
            record.args()
        );
    }

    fn flush(&self) {}
}
