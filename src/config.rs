use std::fmt;
use std::str::FromStr;

use crate::error::PgValetError;

/// TLS negotiation policy carried by the `sslmode` connection key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslMode {
    Disable,
    Allow,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Allow => "allow",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }
}

impl FromStr for SslMode {
    type Err = PgValetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disable" => Ok(SslMode::Disable),
            "allow" => Ok(SslMode::Allow),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(PgValetError::Configuration(format!(
                "invalid sslmode value: {other}"
            ))),
        }
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated connection configuration.
///
/// Built either from a space-delimited `key=value` connection string or
/// through [`PgConfigBuilder`]. `host`, `user`, and `dbname` are required
/// and must be non-empty.
#[derive(Debug, Clone, PartialEq)]
pub struct PgConfig {
    pub host: String,
    pub user: String,
    pub dbname: String,
    pub password: Option<String>,
    pub port: Option<u16>,
    pub sslmode: Option<SslMode>,
    /// Open timeout in seconds.
    pub connect_timeout: Option<u32>,
    /// Reuse server processes across client instance recreation. A
    /// facade-level hint; never forwarded to the wire driver.
    pub persistent: bool,
}

impl PgConfig {
    #[must_use]
    pub fn builder() -> PgConfigBuilder {
        PgConfigBuilder::default()
    }

    /// Parse a space-delimited `key=value` connection string.
    ///
    /// Recognized keys: `host`, `user`, `dbname`, `password`, `port`,
    /// `sslmode`, `connect_timeout`, `persistent`. Later duplicates win.
    ///
    /// # Errors
    /// Returns `PgValetError::Configuration` for malformed tokens, unknown
    /// keys, invalid values, or missing required keys.
    pub fn parse(conninfo: &str) -> Result<PgConfig, PgValetError> {
        let mut builder = PgConfigBuilder::default();

        for token in conninfo.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                return Err(PgValetError::Configuration(format!(
                    "malformed connection token (expected key=value): {token}"
                )));
            };
            match key {
                "host" => builder.host = Some(value.to_string()),
                "user" => builder.user = Some(value.to_string()),
                "dbname" => builder.dbname = Some(value.to_string()),
                "password" => builder.password = Some(value.to_string()),
                "port" => builder.port = Some(parse_positive::<u16>(key, value)?),
                "sslmode" => builder.sslmode = Some(value.parse()?),
                "connect_timeout" => {
                    builder.connect_timeout = Some(parse_positive::<u32>(key, value)?);
                }
                "persistent" => builder.persistent = parse_bool(key, value)?,
                other => {
                    return Err(PgValetError::Configuration(format!(
                        "unknown connection key: {other}"
                    )));
                }
            }
        }

        builder.finish()
    }

    /// Render back to a space-delimited connection string (driver form).
    ///
    /// `persistent` is a pool-level hint and is not included.
    #[must_use]
    pub fn conninfo(&self) -> String {
        let mut out = format!(
            "host={} user={} dbname={}",
            self.host, self.user, self.dbname
        );
        if let Some(password) = &self.password {
            out.push_str(&format!(" password={password}"));
        }
        if let Some(port) = self.port {
            out.push_str(&format!(" port={port}"));
        }
        if let Some(sslmode) = self.sslmode {
            out.push_str(&format!(" sslmode={sslmode}"));
        }
        if let Some(timeout) = self.connect_timeout {
            out.push_str(&format!(" connect_timeout={timeout}"));
        }
        out
    }
}

fn parse_positive<T>(key: &str, value: &str) -> Result<T, PgValetError>
where
    T: FromStr + PartialOrd + From<u8>,
{
    let parsed: T = value.parse().map_err(|_| {
        PgValetError::Configuration(format!("{key} must be a positive integer, got: {value}"))
    })?;
    if parsed < T::from(1u8) {
        return Err(PgValetError::Configuration(format!(
            "{key} must be positive, got: {value}"
        )));
    }
    Ok(parsed)
}

fn parse_bool(key: &str, value: &str) -> Result<bool, PgValetError> {
    match value {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => Err(PgValetError::Configuration(format!(
            "{key} must be a boolean, got: {other}"
        ))),
    }
}

/// Fluent builder for [`PgConfig`].
#[derive(Debug, Clone, Default)]
pub struct PgConfigBuilder {
    host: Option<String>,
    user: Option<String>,
    dbname: Option<String>,
    password: Option<String>,
    port: Option<u16>,
    sslmode: Option<SslMode>,
    connect_timeout: Option<u32>,
    persistent: bool,
}

impl PgConfigBuilder {
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    #[must_use]
    pub fn dbname(mut self, dbname: impl Into<String>) -> Self {
        self.dbname = Some(dbname.into());
        self
    }

    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn sslmode(mut self, sslmode: SslMode) -> Self {
        self.sslmode = Some(sslmode);
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, seconds: u32) -> Self {
        self.connect_timeout = Some(seconds);
        self
    }

    #[must_use]
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Validate and produce the final configuration.
    ///
    /// # Errors
    /// Returns `PgValetError::Configuration` if a required field is missing
    /// or empty.
    pub fn finish(self) -> Result<PgConfig, PgValetError> {
        let host = required("host", self.host)?;
        let user = required("user", self.user)?;
        let dbname = required("dbname", self.dbname)?;

        Ok(PgConfig {
            host,
            user,
            dbname,
            password: self.password,
            port: self.port,
            sslmode: self.sslmode,
            connect_timeout: self.connect_timeout,
            persistent: self.persistent,
        })
    }
}

fn required(key: &str, value: Option<String>) -> Result<String, PgValetError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        Some(_) => Err(PgValetError::Configuration(format!(
            "{key} must not be empty"
        ))),
        None => Err(PgValetError::Configuration(format!("{key} is required"))),
    }
}
