use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use git_testament::{git_testament, CommitKind};
use log::LevelFilter;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use simplelog::{ColorChoice, TermLogger, TerminalMode, ThreadLogMode};

/// Log level. Available values are off, error, warn, info, debug and trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

pub trait Config: Default + Serialize + DeserializeOwned + std::fmt::Debug {
    fn get_log_level(&self) -> Option<LogLevel> {
        None
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Options {
    config_file: Option<PathBuf>,
    print_config: bool,
    print_parsed_config: bool,
    print_version: bool,
}

impl Options {
    /// Parse arguments (excluding program name). `Err(None)` means help was
    /// requested.
    pub fn parse_args<I>(mut arg_iter: I) -> Result<Options, Option<String>>
    where
        I: Iterator<Item = String>,
    {
        let mut options = Options::default();

        while let Some(arg) = arg_iter.next() {
            match arg.as_str() {
                "-c" | "--config-file" => match arg_iter.next() {
                    Some(path) => options.config_file = Some(path.into()),
                    None => return Err(Some("No config file path given".to_string())),
                },
                "-p" | "--print-config" => options.print_config = true,
                "-P" => options.print_parsed_config = true,
                "-v" | "--version" => options.print_version = true,
                "-h" | "--help" => return Err(None),
                "" => (),
                arg => return Err(Some(format!("Unrecognized argument: {}", arg))),
            }
        }

        Ok(options)
    }
}

pub fn run_app_with_cli_and_config<T>(
    app_title: &str,
    crate_version: &str,
    // Function that takes config and runs application
    app_fn: fn(T) -> anyhow::Result<()>,
    opts: Option<Options>,
) where
    T: Config,
{
    ::std::process::exit(match run_inner(app_title, crate_version, app_fn, opts) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {:#}", err);

            1
        }
    })
}

fn run_inner<T>(
    app_title: &str,
    crate_version: &str,
    app_fn: fn(T) -> anyhow::Result<()>,
    options: Option<Options>,
) -> anyhow::Result<()>
where
    T: Config,
{
    let options = match options {
        Some(options) => options,
        None => {
            let mut arg_iter = ::std::env::args();

            let app_path = arg_iter.next().unwrap_or_else(|| "palisade".into());

            match Options::parse_args(arg_iter) {
                Ok(options) => options,
                Err(opt_err) => {
                    let is_error = opt_err.is_some();

                    print_help(
                        || format!("{}\n\nUsage: {} [OPTIONS]", app_title, app_path),
                        opt_err,
                    );

                    if is_error {
                        anyhow::bail!("invalid arguments");
                    }

                    return Ok(());
                }
            }
        }
    };

    if options.print_version {
        println!("{}{}", crate_version, get_commit_info());

        Ok(())
    } else if options.print_config {
        print!("{}", default_config_as_toml::<T>()?);

        Ok(())
    } else {
        let config = match options.config_file {
            Some(path) => config_from_toml_file(&path)?,
            None => T::default(),
        };

        if let Some(log_level) = config.get_log_level() {
            start_logger(log_level)?;
        }

        if options.print_parsed_config {
            println!("Running with configuration: {:#?}", config);
        }

        app_fn(config)
    }
}

pub fn print_help<F>(info_generator: F, opt_error: Option<String>)
where
    F: FnOnce() -> String,
{
    println!("{}", info_generator());

    println!("\nOptions:");
    println!("    -c, --config-file     Load config from this path");
    println!("    -h, --help            Print this help message");
    println!("    -p, --print-config    Print default config");
    println!("    -P                    Print parsed config");
    println!("    -v, --version         Print version information");

    if let Some(error) = opt_error {
        println!("\nError: {}.", error);
    }
}

pub fn config_from_toml_file<T>(path: &Path) -> anyhow::Result<T>
where
    T: DeserializeOwned,
{
    let data = fs::read_to_string(path)
        .with_context(|| format!("Couldn't read config file {}", path.display()))?;

    toml::from_str(&data).with_context(|| format!("Couldn't parse config file {}", path.display()))
}

pub fn default_config_as_toml<T>() -> anyhow::Result<String>
where
    T: Default + Serialize,
{
    toml::to_string_pretty(&T::default()).context("Couldn't serialize default config")
}

fn start_logger(log_level: LogLevel) -> ::anyhow::Result<()> {
    let mut builder = simplelog::ConfigBuilder::new();

    builder
        .set_thread_mode(ThreadLogMode::Both)
        .set_thread_level(LevelFilter::Error)
        .set_target_level(LevelFilter::Error)
        .set_location_level(LevelFilter::Off);

    let config = match builder.set_time_offset_to_local() {
        Ok(builder) => builder.build(),
        Err(builder) => builder.build(),
    };

    TermLogger::init(
        log_level.into(),
        config,
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )
    .context("Couldn't initialize logger")?;

    Ok(())
}

fn get_commit_info() -> String {
    git_testament!(TESTAMENT);

    match TESTAMENT.commit {
        CommitKind::NoTags(hash, date) | CommitKind::FromTag(_, hash, date, _) => {
            format!(" ({} - {})", first_8_chars(hash), date)
        }
        _ => String::new(),
    }
}

fn first_8_chars(input: &str) -> String {
    input.chars().take(8).collect()
}
