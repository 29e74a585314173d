use clap::Parser;
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// mysqlscope: reconstruct MySQL queries from a packet capture, report
/// slow queries and per-pattern/per-table latency statistics, and
/// optionally replay the traffic against a live server.
///
/// `-h` is the MySQL server IP filter (as the classic tools have it),
/// so the short help flag is disabled; use `--help`.
#[derive(Parser, Debug)]
#[command(name = "mysqlscope", version, about, disable_help_flag = true)]
pub struct Cli {
    /// Input file: a pcap capture or an MCAP recording
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,

    /// MySQL server port filter
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// MySQL server IPv4 filter
    #[arg(short = 'h', long = "ip")]
    pub ip: Option<Ipv4Addr>,

    /// Size of the top-N slow-query set
    #[arg(short = 'n', long = "print-n-slow")]
    pub n_slow: Option<usize>,

    /// Link-layer header size override; auto-detected when absent
    #[arg(short = 'e', long = "ethernet-header-size")]
    pub link_offset: Option<usize>,

    /// Print EXPLAIN for each slow query against the replay endpoint
    #[arg(short = 'E', long = "explain")]
    pub explain: bool,

    /// Print ANALYZE (json) for each slow query
    #[arg(short = 'A', long = "analyze")]
    pub analyze: bool,

    /// Replay the captured queries live
    #[arg(short = 'R', long = "replay")]
    pub replay: bool,

    /// Add an s/search/replace/ normalizer pattern (order significant)
    #[arg(short = 'q', long = "query-pattern")]
    pub query_patterns: Vec<String>,

    /// Replay target host
    #[arg(long = "replay-host")]
    pub replay_host: Option<String>,

    /// Replay target port
    #[arg(long = "replay-port")]
    pub replay_port: Option<u16>,

    /// Replay user
    #[arg(long = "replay-user")]
    pub replay_user: Option<String>,

    /// Replay password
    #[arg(long = "replay-pw")]
    pub replay_pw: Option<String>,

    /// Replay database
    #[arg(long = "replay-db")]
    pub replay_db: Option<String>,

    /// TLS root CA certificate for the replay connection
    #[arg(long = "replay-ssl-ca")]
    pub replay_ssl_ca: Option<PathBuf>,

    /// TLS client certificate
    #[arg(long = "replay-ssl-cert")]
    pub replay_ssl_cert: Option<PathBuf>,

    /// TLS client key
    #[arg(long = "replay-ssl-key")]
    pub replay_ssl_key: Option<PathBuf>,

    /// Pacing multiplier; 0 disables pacing
    #[arg(long = "replay-speed")]
    pub replay_speed: Option<f64>,

    /// Write an MCAP recording of the captured queries
    #[arg(long = "record-for-replay")]
    pub record_for_replay: Option<PathBuf>,

    /// Write pattern statistics as CSV
    #[arg(long = "csv")]
    pub csv: Option<PathBuf>,

    /// Write table statistics to this file
    #[arg(long = "table-stats")]
    pub table_stats: Option<PathBuf>,

    /// Periodic progress to stderr
    #[arg(long = "progress")]
    pub progress: bool,

    /// Abort the process on the first replay query error
    #[arg(long = "assert-on-query-error")]
    pub assert_on_query_error: bool,

    /// Treat duplicate-key replay errors as non-fatal
    #[arg(long = "ignore-dup-key-errors")]
    pub ignore_dup_key_errors: bool,

    /// Configuration file (TOML); command-line options override it
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print help
    #[arg(long, action = clap::ArgAction::HelpLong)]
    help: Option<bool>,
}
