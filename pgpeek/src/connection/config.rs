//! Postgres connection configuration.
use std::{borrow::Cow, fmt, time::Duration};

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5432;
const DEFAULT_USER: &str = "postgres";

/// Postgres connection config.
///
/// Built from `key=value` connection parameters, see [`Config::from_params`].
#[derive(Clone)]
pub struct Config {
    pub(crate) host: String,
    pub(crate) hostaddr: Option<String>,
    pub(crate) port: u16,
    pub(crate) user: String,
    pub(crate) password: String,
    pub(crate) dbname: String,
    pub(crate) application_name: Option<String>,
    pub(crate) options: Option<String>,
    pub(crate) client_encoding: Option<String>,
    pub(crate) connect_timeout: Option<Duration>,
}

/// Where to open the socket.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Target<'a> {
    Tcp(&'a str, u16),
    Unix(String),
}

/// Values given explicitly, before environment and default fallback.
#[derive(Default)]
struct Given {
    host: Option<String>,
    hostaddr: Option<String>,
    port: Option<String>,
    user: Option<String>,
    password: Option<String>,
    dbname: Option<String>,
    application_name: Option<String>,
    options: Option<String>,
    client_encoding: Option<String>,
    connect_timeout: Option<String>,
    sslmode: Option<String>,
}

impl Config {
    /// Build config from connection parameters.
    ///
    /// Recognized keys are `host`, `hostaddr`, `port`, `dbname`, `user`, `password`,
    /// `application_name`, `options`, `client_encoding`, `connect_timeout` and `sslmode`.
    /// When a key is repeated, the last one wins.
    ///
    /// A `dbname` starting with `postgres://` or `postgresql://` is parsed as connection url.
    ///
    /// Missing values are read from environment variable:
    /// - `PGHOST`
    /// - `PGHOSTADDR`
    /// - `PGPORT`
    /// - `PGUSER`
    /// - `PGPASSWORD`
    /// - `PGDATABASE`
    /// - `PGAPPNAME`
    /// - `PGOPTIONS`
    /// - `PGCLIENTENCODING`
    /// - `PGCONNECT_TIMEOUT`
    /// - `PGSSLMODE`
    pub fn from_params<K, V>(params: &[(K, V)]) -> Result<Config, ParseError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self::from_params_with(params, |name| std::env::var(name).ok())
    }

    /// Same as [`Config::from_params`], with custom environment lookup.
    pub fn from_params_with<K, V>(
        params: &[(K, V)],
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Config, ParseError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut given = Given::default();
        for (key, value) in params {
            given.set(key.as_ref(), value.as_ref())?;
        }

        macro_rules! resolve {
            ($field:ident, $env:literal) => {
                given.$field.or_else(|| env($env))
            };
        }

        let sslmode = resolve!(sslmode, "PGSSLMODE");
        if let Some(mode) = sslmode {
            if !matches!(mode.as_str(), "disable" | "allow" | "prefer") {
                return Err(ParseError::unsupported_sslmode(&mode));
            }
        }

        let port = match resolve!(port, "PGPORT") {
            Some(port) => port.parse().map_err(|_| ParseError::invalid_value("port", &port))?,
            None => DEFAULT_PORT,
        };

        let connect_timeout = match resolve!(connect_timeout, "PGCONNECT_TIMEOUT") {
            Some(secs) => match secs.parse::<u64>() {
                Ok(0) => None,
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => return Err(ParseError::invalid_value("connect_timeout", &secs)),
            },
            None => None,
        };

        let user = resolve!(user, "PGUSER").unwrap_or_else(|| DEFAULT_USER.into());

        Ok(Self {
            host: resolve!(host, "PGHOST").unwrap_or_else(|| DEFAULT_HOST.into()),
            hostaddr: resolve!(hostaddr, "PGHOSTADDR"),
            port,
            password: resolve!(password, "PGPASSWORD").unwrap_or_default(),
            dbname: resolve!(dbname, "PGDATABASE").unwrap_or_else(|| user.clone()),
            user,
            application_name: resolve!(application_name, "PGAPPNAME"),
            options: resolve!(options, "PGOPTIONS"),
            client_encoding: resolve!(client_encoding, "PGCLIENTENCODING"),
            connect_timeout,
        })
    }

    /// Host name or unix socket directory, as given.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn dbname(&self) -> &str {
        &self.dbname
    }

    pub fn application_name(&self) -> Option<&str> {
        self.application_name.as_deref()
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    pub(crate) fn target(&self) -> Target<'_> {
        let host = self.hostaddr.as_deref().unwrap_or(&self.host);
        match host.starts_with('/') {
            true => Target::Unix(format!("{host}/.s.PGSQL.{}", self.port)),
            false => Target::Tcp(host, self.port),
        }
    }

    /// Run-time parameters sent along the startup message.
    pub(crate) fn runtime_params(&self) -> Vec<(&str, &str)> {
        [
            ("application_name", &self.application_name),
            ("options", &self.options),
            ("client_encoding", &self.client_encoding),
        ]
        .into_iter()
        .filter_map(|(name, value)| Some((name, value.as_deref()?)))
        .collect()
    }
}

impl Given {
    fn set(&mut self, key: &str, value: &str) -> Result<(), ParseError> {
        let slot = match key {
            "host" => &mut self.host,
            "hostaddr" => &mut self.hostaddr,
            "port" => &mut self.port,
            "user" => &mut self.user,
            "password" => &mut self.password,
            "dbname" if is_url(value) => return self.set_url(value),
            "dbname" => &mut self.dbname,
            "application_name" => &mut self.application_name,
            "options" => &mut self.options,
            "client_encoding" => &mut self.client_encoding,
            "connect_timeout" => &mut self.connect_timeout,
            "sslmode" => &mut self.sslmode,
            _ => return Err(ParseError::invalid_option(key)),
        };
        *slot = Some(value.into());
        Ok(())
    }

    /// `postgres://[user[:password]@][host][:port][/dbname][?key=value&...]`
    fn set_url(&mut self, url: &str) -> Result<(), ParseError> {
        let Some(rest) = url
            .strip_prefix("postgresql://")
            .or_else(|| url.strip_prefix("postgres://"))
        else {
            return Err(ParseError::new("invalid URI scheme"));
        };

        let (rest, query) = rest.split_once('?').unwrap_or((rest, ""));
        let (authority, dbname) = rest.split_once('/').unwrap_or((rest, ""));

        let hostport = match authority.rsplit_once('@') {
            Some((userinfo, hostport)) => {
                match userinfo.split_once(':') {
                    Some((user, pass)) => {
                        self.user = Some(percent_decode(user)?);
                        self.password = Some(percent_decode(pass)?);
                    },
                    None => self.user = Some(percent_decode(userinfo)?),
                }
                hostport
            },
            None => authority,
        };

        let (host, port) = match hostport.strip_prefix('[') {
            // ipv6 literal
            Some(v6) => {
                let Some((host, after)) = v6.split_once(']') else {
                    return Err(ParseError::new("missing `]` in IPv6 host address"));
                };
                (host, after.strip_prefix(':'))
            },
            None => match hostport.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (hostport, None),
            },
        };

        if !host.is_empty() {
            self.host = Some(percent_decode(host)?);
        }
        if let Some(port) = port.filter(|e| !e.is_empty()) {
            self.port = Some(port.into());
        }
        if !dbname.is_empty() {
            self.dbname = Some(percent_decode(dbname)?);
        }

        for pair in query.split('&').filter(|e| !e.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(ParseError::new(format!("missing `=` in URI query parameter \"{pair}\"")));
            };
            self.set(key, &percent_decode(value)?)?;
        }

        Ok(())
    }
}

fn is_url(value: &str) -> bool {
    value.starts_with("postgres://") || value.starts_with("postgresql://")
}

fn percent_decode(value: &str) -> Result<String, ParseError> {
    if !value.contains('%') {
        return Ok(value.into());
    }

    let mut out = Vec::with_capacity(value.len());
    let mut bytes = value.bytes();
    while let Some(b) = bytes.next() {
        if b != b'%' {
            out.push(b);
            continue;
        }
        let hex = [bytes.next(), bytes.next()];
        let decoded = match hex {
            [Some(hi), Some(lo)] => std::str::from_utf8(&[hi, lo])
                .ok()
                .and_then(|e| u8::from_str_radix(e, 16).ok()),
            _ => None,
        };
        match decoded {
            Some(b) => out.push(b),
            None => return Err(ParseError::new(format!("invalid percent-encoded token: \"{value}\""))),
        }
    }

    String::from_utf8(out).map_err(|_| ParseError::new(format!("invalid percent-encoded token: \"{value}\"")))
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("hostaddr", &self.hostaddr)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("dbname", &self.dbname)
            .field("application_name", &self.application_name)
            .field("options", &self.options)
            .field("client_encoding", &self.client_encoding)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Error when building [`Config`].
pub struct ParseError {
    reason: Cow<'static,str>,
}

impl ParseError {
    pub(crate) fn new(reason: impl Into<Cow<'static,str>>) -> Self {
        Self { reason: reason.into() }
    }

    pub(crate) fn invalid_option(key: &str) -> Self {
        Self::new(format!("invalid connection option \"{key}\""))
    }

    pub(crate) fn invalid_value(key: &str, value: &str) -> Self {
        Self::new(format!("invalid {key} value: \"{value}\""))
    }

    pub(crate) fn unsupported_sslmode(mode: &str) -> Self {
        Self::new(format!("sslmode value \"{mode}\" invalid when SSL support is not compiled in"))
    }
}

impl std::error::Error for ParseError { }

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl fmt::Debug for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
