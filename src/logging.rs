//! Logging setup utilities for the application.
//!
//! Log records go to stderr and to `gpseq.log` in the output directory of the
//! subcommand being run, both through the `log4rs` crate.

use std::path::Path;

use log::LevelFilter;
use log4rs::{
    append::{console::{ConsoleAppender, Target}, file::FileAppender},
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
};

pub const LOG_FILE: &str = "gpseq.log";

const PATTERN: &str = "[{d(%Y-%m-%d %H:%M:%S)}] {h({l})}: {m}{n}";

/// Configure logger to write to stderr and to the log file in `out_dir`.
pub fn setup_logger(out_dir: &Path, level: LevelFilter) -> anyhow::Result<()> {
    let stderr = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .target(Target::Stderr)
        .build();

    let logfile = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build(out_dir.join(LOG_FILE))?;

    let config = Config::builder()
        .appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(level)))
                .build("stderr", Box::new(stderr)),
        ).appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(level)))
                .build("logfile", Box::new(logfile)),
        )
        .build(Root::builder().appender("stderr").appender("logfile").build(LevelFilter::Trace))?;

    log4rs::init_config(config)?;
    Ok(())
}
