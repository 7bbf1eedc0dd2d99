//! Builder for [`FluentSender`](super::FluentSender).
//!
//! Exposes transport selection, timeout tuning, TLS configuration,
//! acknowledgement and reconnection settings. A Unix socket path takes
//! precedence over any host/port pair.

use std::{path::PathBuf, time::Duration};

use crate::{error::SenderBuildError, packet::TimeResolution};

use super::{
    FluentSender,
    config::{DEFAULT_HOST, DEFAULT_PORT, SenderConfig},
    transport::{SocketTransport, TcpTransport, TlsOptions, UnixTransport},
};

#[derive(Clone, Debug, Default)]
struct TlsConfig {
    domain: Option<String>,
    insecure: bool,
}

macro_rules! ensure_positive {
    ($value:expr, $field:expr) => {{
        if $value == 0 {
            Err(SenderBuildError::InvalidConfig(format!(
                "{} must be greater than zero",
                $field
            )))
        } else {
            Ok($value)
        }
    }};
}

macro_rules! option_setter {
    ($(#[$meta:meta])* $fn_name:ident, $field:ident, $ty:ty) => {
        $(#[$meta])*
        pub fn $fn_name(mut self, value: $ty) -> Self {
            self.$field = Some(value);
            self
        }
    };
}

/// Builder for constructing [`FluentSender`] instances.
#[derive(Clone, Debug, Default)]
pub struct FluentSenderBuilder {
    tag_prefix: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    path: Option<PathBuf>,
    tls: Option<TlsConfig>,
    connect_timeout_secs: Option<f64>,
    write_timeout_ms: Option<u64>,
    reconnect_interval_ms: Option<u64>,
    require_ack_response: bool,
    ack_response_timeout_ms: Option<u64>,
    milliseconds: bool,
    flush_timeout_ms: Option<u64>,
}

impl FluentSenderBuilder {
    /// Create a builder targeting `localhost:24224` with default timings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix joined to every label as `prefix.label`.
    pub fn with_tag_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tag_prefix = Some(prefix.into());
        self
    }

    /// Configure the builder to use TCP.
    pub fn with_tcp(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = Some(host.into());
        self.port = Some(port);
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    option_setter!(with_port, port, u16);

    /// Configure the builder to use a Unix domain socket.
    pub fn with_unix_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Configure TLS using the provided domain and validation policy.
    pub fn with_tls(mut self, domain: Option<String>, insecure: bool) -> Self {
        self.tls = Some(TlsConfig { domain, insecure });
        self
    }

    option_setter!(
        #[doc = "Connect timeout in (possibly fractional) seconds."]
        with_connect_timeout_secs,
        connect_timeout_secs,
        f64
    );

    /// Connect timeout in milliseconds.
    pub fn with_connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_secs = Some(timeout_ms as f64 / 1000.0);
        self
    }

    option_setter!(with_write_timeout_ms, write_timeout_ms, u64);
    option_setter!(
        #[doc = "Delay before reconnecting after an error; `0` disables reconnection."]
        with_reconnect_interval_ms,
        reconnect_interval_ms,
        u64
    );
    option_setter!(with_ack_response_timeout_ms, ack_response_timeout_ms, u64);
    option_setter!(with_flush_timeout_ms, flush_timeout_ms, u64);

    /// Ask the collector to acknowledge every record.
    pub fn with_require_ack_response(mut self, require: bool) -> Self {
        self.require_ack_response = require;
        self
    }

    /// Derive integer times in milliseconds instead of seconds.
    pub fn with_milliseconds(mut self, milliseconds: bool) -> Self {
        self.milliseconds = milliseconds;
        self
    }

    fn validate(&self) -> Result<(), SenderBuildError> {
        self.validate_transport()?;
        self.validate_timeouts()?;
        Ok(())
    }

    fn validate_transport(&self) -> Result<(), SenderBuildError> {
        if self.path.is_some() && self.tls.is_some() {
            return Err(SenderBuildError::InvalidConfig(
                "tls is only supported for tcp transports".into(),
            ));
        }
        if let Some(path) = &self.path
            && path.as_os_str().is_empty()
        {
            return Err(SenderBuildError::InvalidConfig(
                "unix socket path must not be empty".into(),
            ));
        }
        if self.path.is_none()
            && let Some(host) = &self.host
            && host.trim().is_empty()
        {
            return Err(SenderBuildError::InvalidConfig(
                "tcp host must not be empty".into(),
            ));
        }
        Ok(())
    }

    fn validate_timeouts(&self) -> Result<(), SenderBuildError> {
        if let Some(secs) = self.connect_timeout_secs
            && !(secs > 0.0 && Duration::try_from_secs_f64(secs).is_ok())
        {
            return Err(SenderBuildError::InvalidConfig(
                "connect timeout must be a positive number of seconds".into(),
            ));
        }
        if let Some(timeout) = self.write_timeout_ms {
            ensure_positive!(timeout, "write_timeout_ms")?;
        }
        if let Some(timeout) = self.ack_response_timeout_ms {
            ensure_positive!(timeout, "ack_response_timeout_ms")?;
        }
        if let Some(timeout) = self.flush_timeout_ms {
            ensure_positive!(timeout, "flush_timeout_ms")?;
        }
        Ok(())
    }

    /// Validate the builder and produce the runtime configuration.
    pub fn build_config(&self) -> Result<SenderConfig, SenderBuildError> {
        self.validate()?;
        let mut config = SenderConfig {
            tag_prefix: self.tag_prefix.clone(),
            transport: self.build_transport(),
            require_ack_response: self.require_ack_response,
            time_resolution: if self.milliseconds {
                TimeResolution::Milliseconds
            } else {
                TimeResolution::Seconds
            },
            ..SenderConfig::default()
        };
        self.apply_optional_fields(&mut config);
        Ok(config)
    }

    fn apply_optional_fields(&self, config: &mut SenderConfig) {
        if let Some(Ok(timeout)) = self.connect_timeout_secs.map(Duration::try_from_secs_f64) {
            config.connect_timeout = timeout;
        }
        if let Some(timeout) = self.write_timeout_ms {
            config.write_timeout = Duration::from_millis(timeout);
        }
        if let Some(interval) = self.reconnect_interval_ms {
            config.reconnect_interval = (interval > 0).then(|| Duration::from_millis(interval));
        }
        if let Some(timeout) = self.ack_response_timeout_ms {
            config.ack_response_timeout = Duration::from_millis(timeout);
        }
        if let Some(timeout) = self.flush_timeout_ms {
            config.flush_timeout = Duration::from_millis(timeout);
        }
    }

    fn build_transport(&self) -> SocketTransport {
        if let Some(path) = &self.path {
            return SocketTransport::Unix(UnixTransport { path: path.clone() });
        }
        let host = self.host.clone().unwrap_or_else(|| DEFAULT_HOST.to_owned());
        let tls = self.build_tls_options(&host);
        SocketTransport::Tcp(TcpTransport {
            port: self.port.unwrap_or(DEFAULT_PORT),
            host,
            tls,
        })
    }

    fn build_tls_options(&self, host: &str) -> Option<TlsOptions> {
        self.tls.as_ref().map(|tls_cfg| {
            let domain = tls_cfg
                .domain
                .clone()
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| host.to_owned());
            TlsOptions {
                domain,
                insecure_skip_verify: tls_cfg.insecure,
            }
        })
    }

    /// Build the sender and start its worker thread.
    pub fn build(&self) -> Result<FluentSender, SenderBuildError> {
        let config = self.build_config()?;
        FluentSender::with_config(config)
    }
}
