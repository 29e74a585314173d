//! Configuration: TOML file layer plus the command-line merge.
//!
//! Every CLI option has a config-file equivalent; values given on the
//! command line win. The merged result is a [`RuntimeConfig`] with the
//! normalizer patterns already compiled, so a bad regex fails here,
//! before any capture processing begins.

use crate::cli::Cli;
use crate::pattern::{PatternError, QueryPattern};
use crate::replay::ReplayOpts;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

fn empty_path_none<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt = Option::<PathBuf>::deserialize(deserializer)?;
    Ok(opt.and_then(|path| {
        if path.as_os_str().is_empty() {
            None
        } else {
            Some(path)
        }
    }))
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Pattern(PatternError),
    MissingInput,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "config io error: {}", err),
            ConfigError::Parse(err) => write!(f, "config parse error: {}", err),
            ConfigError::Pattern(err) => write!(f, "{}", err),
            ConfigError::MissingInput => {
                write!(f, "missing input file, specify with -i or [input].file")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<PatternError> for ConfigError {
    fn from(err: PatternError) -> Self {
        ConfigError::Pattern(err)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub input: InputConfig,
    pub report: ReportConfig,
    pub replay: ReplayConfig,
    pub record: RecordConfig,
    /// Normalizer patterns in `s/search/replace/` form, applied in order.
    pub patterns: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            input: InputConfig::default(),
            report: ReportConfig::default(),
            replay: ReplayConfig::default(),
            record: RecordConfig::default(),
            patterns: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&raw).map_err(ConfigError::Parse)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    #[serde(deserialize_with = "empty_path_none")]
    pub file: Option<PathBuf>,
    pub ip: Ipv4Addr,
    pub port: u16,
    /// Pinned link-layer header size; absent = auto-detect.
    pub link_offset: Option<usize>,
}

impl Default for InputConfig {
    fn default() -> Self {
        InputConfig {
            file: None,
            ip: Ipv4Addr::new(127, 0, 0, 1),
            port: 3306,
            link_offset: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub n_slow: usize,
    pub explain: bool,
    pub analyze: bool,
    #[serde(deserialize_with = "empty_path_none")]
    pub csv: Option<PathBuf>,
    #[serde(deserialize_with = "empty_path_none")]
    pub table_stats: Option<PathBuf>,
    pub progress: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        ReportConfig {
            n_slow: 10,
            explain: false,
            analyze: false,
            csv: None,
            table_stats: None,
            progress: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub pw: Option<String>,
    pub db: Option<String>,
    #[serde(deserialize_with = "empty_path_none")]
    pub ssl_ca: Option<PathBuf>,
    #[serde(deserialize_with = "empty_path_none")]
    pub ssl_cert: Option<PathBuf>,
    #[serde(deserialize_with = "empty_path_none")]
    pub ssl_key: Option<PathBuf>,
    pub speed: f64,
    pub assert_on_query_error: bool,
    pub ignore_dup_key_errors: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        ReplayConfig {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: None,
            pw: None,
            db: None,
            ssl_ca: None,
            ssl_cert: None,
            ssl_key: None,
            speed: 1.0,
            assert_on_query_error: false,
            ignore_dup_key_errors: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RecordConfig {
    #[serde(deserialize_with = "empty_path_none")]
    pub file: Option<PathBuf>,
}

/// Fully merged, validated runtime configuration.
#[derive(Debug)]
pub struct RuntimeConfig {
    pub input: PathBuf,
    pub server_ip: Ipv4Addr,
    pub server_port: u16,
    pub link_offset: Option<usize>,
    pub n_slow: usize,
    pub explain: bool,
    pub analyze: bool,
    pub csv: Option<PathBuf>,
    pub table_stats: Option<PathBuf>,
    pub progress: bool,
    pub replay: bool,
    pub replay_opts: ReplayOpts,
    pub record_for_replay: Option<PathBuf>,
    pub patterns: Vec<QueryPattern>,
    pub verbose: u8,
}

/// Merge the config file (if any) with command-line arguments; CLI wins.
pub fn load_config(args: &Cli) -> Result<RuntimeConfig, ConfigError> {
    let base = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let mut input = base.input.clone();
    let mut report = base.report.clone();
    let mut replay = base.replay.clone();
    let mut record = base.record.clone();
    let mut pattern_args = base.patterns.clone();

    if let Some(value) = &args.input {
        input.file = Some(value.clone());
    }
    if let Some(value) = args.ip {
        input.ip = value;
    }
    if let Some(value) = args.port {
        input.port = value;
    }
    if let Some(value) = args.link_offset {
        input.link_offset = Some(value);
    }
    if let Some(value) = args.n_slow {
        report.n_slow = value;
    }
    if args.explain {
        report.explain = true;
    }
    if args.analyze {
        report.analyze = true;
    }
    if let Some(value) = &args.csv {
        report.csv = Some(value.clone());
    }
    if let Some(value) = &args.table_stats {
        report.table_stats = Some(value.clone());
    }
    if args.progress {
        report.progress = true;
    }
    if args.replay {
        replay.enabled = true;
    }
    if let Some(value) = &args.replay_host {
        replay.host = value.clone();
    }
    if let Some(value) = args.replay_port {
        replay.port = value;
    }
    if let Some(value) = &args.replay_user {
        replay.user = Some(value.clone());
    }
    if let Some(value) = &args.replay_pw {
        replay.pw = Some(value.clone());
    }
    if let Some(value) = &args.replay_db {
        replay.db = Some(value.clone());
    }
    if let Some(value) = &args.replay_ssl_ca {
        replay.ssl_ca = Some(value.clone());
    }
    if let Some(value) = &args.replay_ssl_cert {
        replay.ssl_cert = Some(value.clone());
    }
    if let Some(value) = &args.replay_ssl_key {
        replay.ssl_key = Some(value.clone());
    }
    if let Some(value) = args.replay_speed {
        replay.speed = value;
    }
    if args.assert_on_query_error {
        replay.assert_on_query_error = true;
    }
    if args.ignore_dup_key_errors {
        replay.ignore_dup_key_errors = true;
    }
    if let Some(value) = &args.record_for_replay {
        record.file = Some(value.clone());
    }
    // CLI patterns come after the file's, keeping declaration order.
    pattern_args.extend(args.query_patterns.iter().cloned());

    let mut patterns = Vec::with_capacity(pattern_args.len());
    for arg in &pattern_args {
        patterns.push(QueryPattern::parse(arg)?);
    }

    let input_file = input.file.ok_or(ConfigError::MissingInput)?;

    Ok(RuntimeConfig {
        input: input_file,
        server_ip: input.ip,
        server_port: input.port,
        link_offset: input.link_offset,
        n_slow: report.n_slow,
        explain: report.explain,
        analyze: report.analyze,
        csv: report.csv,
        table_stats: report.table_stats,
        progress: report.progress,
        replay: replay.enabled,
        replay_opts: ReplayOpts {
            host: replay.host,
            port: replay.port,
            user: replay.user,
            pass: replay.pw,
            db: replay.db,
            ssl_ca: replay.ssl_ca,
            ssl_cert: replay.ssl_cert,
            ssl_key: replay.ssl_key,
            speed: replay.speed,
            assert_on_query_error: replay.assert_on_query_error,
            ignore_dup_key_errors: replay.ignore_dup_key_errors,
        },
        record_for_replay: record.file,
        patterns,
        verbose: args.verbose,
    })
}
