use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

use crate::status::Language;

#[derive(Parser)]
#[command(name = "judge", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<String>,

    /// Whether to flush the existing database
    #[arg(long = "flush-data", short = 'f', default_value_t = false)]
    pub flush_data: bool,

    /// Number of build workers, overrides the configuration file
    #[arg(long = "workers", short = 'w')]
    pub workers: Option<u8>,
}

impl CliArgs {
    /// Load the configuration from the specified file, or defaults when none is given
    pub fn to_config(&self) -> std::io::Result<Config> {
        let mut config = match &self.config_path {
            Some(path) => {
                let file = std::fs::File::open(path)?;
                let reader = std::io::BufReader::new(file);
                serde_json::from_reader(reader)?
            }
            None => Config::default(),
        };
        if let Some(workers) = self.workers {
            config.builder.workers = workers;
        }
        Ok(config)
    }
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub builder: BuilderConfig,
    pub limits: ProcessLimits,
    pub languages: Vec<ToolchainConfig>,
    pub events: EventsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            builder: BuilderConfig::default(),
            limits: ProcessLimits::default(),
            languages: default_toolchains(),
            events: EventsConfig::default(),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: 4,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct BuilderConfig {
    pub workers: u8,
    pub poll_interval_ms: u64,
    pub work_dir: Option<PathBuf>,
    /// Reject builds for assignment UUIDs that were never registered
    pub strict_assignments: bool,
    pub report_buffer: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            poll_interval_ms: 1000,
            work_dir: None,
            strict_assignments: false,
            report_buffer: 16,
        }
    }
}

/// Ceilings applied to every solution run
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct ProcessLimits {
    pub open_files: u64,
    pub processes: u64,
    pub file_locks: u64,
    pub cpu_seconds: u64,
    pub address_space_mb: u64,
    pub wall_seconds: u64,
    pub output_bytes: u64,
    pub compile_cpu_seconds: u64,
}

impl Default for ProcessLimits {
    fn default() -> Self {
        Self {
            open_files: 8,
            processes: 1,
            file_locks: 8,
            cpu_seconds: 2,
            address_space_mb: 256,
            wall_seconds: 10,
            output_bytes: 16 * 1024 * 1024,
            compile_cpu_seconds: 30,
        }
    }
}

/// How to turn a source file of one language into an executable.
///
/// `command` may reference `%INPUT%` (source path) and `%OUTPUT%` (executable path).
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ToolchainConfig {
    pub language: Language,
    pub file_name: String,
    pub command: Vec<String>,
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

pub fn default_toolchains() -> Vec<ToolchainConfig> {
    vec![
        ToolchainConfig {
            language: Language::Cpp,
            file_name: "solution.cpp".to_string(),
            command: owned(&["g++", "%INPUT%", "-o", "%OUTPUT%", "--std=c++17"]),
        },
        ToolchainConfig {
            language: Language::Pascal,
            file_name: "solution.pas".to_string(),
            command: owned(&["fpc", "-Mtp", "-So", "-o%OUTPUT%", "%INPUT%"]),
        },
    ]
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct EventsConfig {
    pub webhook_url: Option<String>,
}
