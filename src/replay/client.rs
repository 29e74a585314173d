//! Thin wrapper around the MySQL client used for replay and for the
//! EXPLAIN/ANALYZE pass over slow queries.

use mysql::prelude::Queryable;
use mysql::{ClientIdentity, Conn, OptsBuilder, SslOpts};
use std::path::PathBuf;

/// MySQL error code for a duplicate-key violation (ER_DUP_ENTRY).
pub const ER_DUP_ENTRY: u16 = 1062;

/// Replay target endpoint and policy knobs.
#[derive(Debug, Clone, Default)]
pub struct ReplayOpts {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub db: Option<String>,
    pub ssl_ca: Option<PathBuf>,
    pub ssl_cert: Option<PathBuf>,
    pub ssl_key: Option<PathBuf>,
    /// Pacing multiplier; 0 disables pacing entirely.
    pub speed: f64,
    pub assert_on_query_error: bool,
    pub ignore_dup_key_errors: bool,
}

/// One live connection to the replay server.
pub struct ReplayClient {
    conn: Conn,
}

impl ReplayClient {
    pub fn connect(opts: &ReplayOpts) -> Result<Self, mysql::Error> {
        let mut builder = OptsBuilder::new()
            .ip_or_hostname(Some(opts.host.clone()))
            .tcp_port(opts.port)
            .user(opts.user.clone())
            .pass(opts.pass.clone())
            .db_name(opts.db.clone());

        let wants_tls = opts.ssl_ca.is_some() || (opts.ssl_cert.is_some() && opts.ssl_key.is_some());
        if wants_tls {
            let mut ssl = SslOpts::default();
            if let Some(ca) = &opts.ssl_ca {
                ssl = ssl.with_root_cert_path(Some(ca.clone()));
            }
            if let (Some(cert), Some(key)) = (&opts.ssl_cert, &opts.ssl_key) {
                ssl = ssl.with_client_identity(Some(ClientIdentity::new(
                    cert.clone(),
                    key.clone(),
                )));
            }
            builder = builder.ssl_opts(ssl);
        }

        Ok(ReplayClient {
            conn: Conn::new(builder)?,
        })
    }

    /// Execute a replayed statement. Result-set rows are retrieved and
    /// discarded so the measured time covers the full exchange.
    pub fn execute_discard(&mut self, sql: &str) -> Result<(), mysql::Error> {
        self.conn.query_drop(sql)
    }

    /// Run `EXPLAIN <sql>` (or `ANALYZE FORMAT=JSON <sql>`) and return
    /// the result rows as (column name, value) pairs.
    pub fn explain(
        &mut self,
        sql: &str,
        analyze: bool,
    ) -> Result<Vec<(String, String)>, mysql::Error> {
        let prefix = if analyze {
            "analyze format=json "
        } else {
            "explain "
        };
        let mut fields = Vec::new();
        let result = self.conn.query_iter(format!("{}{}", prefix, sql))?;
        for row in result {
            let row = row?;
            let columns = row.columns();
            for (i, column) in columns.iter().enumerate() {
                let value: Option<String> = row.get(i).unwrap_or(None);
                fields.push((
                    column.name_str().into_owned(),
                    value.unwrap_or_else(|| "NULL".to_string()),
                ));
            }
        }
        Ok(fields)
    }
}

/// Is this a duplicate-key server error?
pub fn is_dup_key_error(err: &mysql::Error) -> bool {
    matches!(err, mysql::Error::MySqlError(e) if e.code == ER_DUP_ENTRY)
}
