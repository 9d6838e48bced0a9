use anyhow::{Context, Result};
use simplelog::{ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger, TerminalMode, WriteLogger};
use std::fs::File;

pub fn setup_logger(log_dir: &std::path::Path) -> Result<()> {
    std::fs::create_dir_all(log_dir).context("failed to create log dir")?;
    let log_file = File::create(log_dir.join("kvm-client.log")).context("failed to create log file")?;

    let file_config = ConfigBuilder::new().set_time_offset_to_local().unwrap().build();
    let term_config = ConfigBuilder::new().set_time_offset_to_local().unwrap().build();

    let loggers: Vec<Box<dyn SharedLogger>> = vec![
        TermLogger::new(LevelFilter::Info, term_config, TerminalMode::Mixed, ColorChoice::Auto),
        WriteLogger::new(LevelFilter::Debug, file_config, log_file),
    ];
    CombinedLogger::init(loggers).ok();
    log::info!("kvm-client logging initialized");
    Ok(())
}
