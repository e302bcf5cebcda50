//! Client configuration.

use crate::resource;
use crate::retry::RetrySettings;
use crate::{Error, Result};
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

/// When set to `host:port`, every client connects to an emulator at that address instead of the
/// production endpoints.
pub const EMULATOR_HOST_ENV: &str = "BIGTABLE_EMULATOR_HOST";

/// The production endpoint for administrative calls.
///
/// Reaching it needs TLS, which this crate's transport is built without. Connecting to an `https`
/// endpoint fails with [`Error::InvalidArgument`](crate::Error::InvalidArgument).
pub const DEFAULT_ADMIN_ENDPOINT: &str = "https://bigtableadmin.googleapis.com";

/// The production endpoint for data calls. Like [`DEFAULT_ADMIN_ENDPOINT`], it needs TLS.
pub const DEFAULT_DATA_ENDPOINT: &str = "https://bigtable.googleapis.com";

/// Where to connect and how to behave once connected.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// The project that owns the instance.
    pub project: String,
    /// The instance to operate on. Unused by the instance administration client.
    pub instance: String,
    /// The app profile to route data requests through. Empty selects the default profile.
    pub app_profile: String,
    /// The URI administrative clients connect to.
    pub admin_endpoint: String,
    /// The URI the data client connects to.
    pub data_endpoint: String,
    /// How idempotent calls are retried.
    pub retry: RetrySettings,
    /// How often an unfinished long-running operation is polled.
    pub operation_poll_interval: Duration,
    /// How often replication consistency is checked while waiting for it.
    pub replication_poll_interval: Duration,
    /// How long to wait for a connection to be established.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// The default configuration for an instance in a project.
    ///
    /// The endpoints default to the production ones, which cannot be reached without TLS. Point
    /// the configuration at a plaintext server with [`ClientConfig::with_endpoint`] or
    /// [`ClientConfig::with_emulator_host`].
    #[must_use]
    pub fn new(project: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            instance: instance.into(),
            app_profile: String::new(),
            admin_endpoint: DEFAULT_ADMIN_ENDPOINT.to_owned(),
            data_endpoint: DEFAULT_DATA_ENDPOINT.to_owned(),
            retry: RetrySettings::default(),
            operation_poll_interval: Duration::from_secs(1),
            replication_poll_interval: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Like [`ClientConfig::new`], but honoring [`EMULATOR_HOST_ENV`].
    #[must_use]
    pub fn from_env(project: impl Into<String>, instance: impl Into<String>) -> Self {
        let config = Self::new(project, instance);
        match std::env::var(EMULATOR_HOST_ENV) {
            Ok(host) if !host.trim().is_empty() => config.with_emulator_host(host.trim()),
            _ => config,
        }
    }

    /// Point both endpoints at a plaintext emulator listening on `host:port`.
    #[must_use]
    pub fn with_emulator_host(self, host: &str) -> Self {
        self.with_endpoint(format!("http://{host}"))
    }

    /// Point both endpoints at the same URI.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        self.admin_endpoint.clone_from(&endpoint);
        self.data_endpoint = endpoint;
        self
    }

    /// Route data requests through the named app profile.
    #[must_use]
    pub fn with_app_profile(mut self, app_profile: impl Into<String>) -> Self {
        self.app_profile = app_profile.into();
        self
    }

    /// Replace the retry settings.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    /// Change how often long-running operations are polled.
    #[must_use]
    pub const fn with_operation_poll_interval(mut self, interval: Duration) -> Self {
        self.operation_poll_interval = interval;
        self
    }

    /// Change how often replication consistency is checked.
    #[must_use]
    pub const fn with_replication_poll_interval(mut self, interval: Duration) -> Self {
        self.replication_poll_interval = interval;
        self
    }

    /// `projects/{project}`
    #[must_use]
    pub fn project_name(&self) -> String {
        resource::project_path(&self.project)
    }

    /// `projects/{project}/instances/{instance}`
    #[must_use]
    pub fn instance_name(&self) -> String {
        resource::instance_path(&self.project, &self.instance)
    }

    /// Open a channel to `uri` using this configuration's timeouts. Only plaintext URIs are
    /// supported.
    pub(crate) async fn connect(&self, uri: &str) -> Result<Channel> {
        if uri.starts_with("https://") {
            return Err(Error::invalid(format!(
                "cannot connect to {uri}: TLS is not supported, use a plaintext endpoint"
            )));
        }
        let channel = Endpoint::from_shared(uri.to_owned())?
            .connect_timeout(self.connect_timeout)
            .connect()
            .await?;
        Ok(channel)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("p", "i");
        assert_eq!(config.instance_name(), "projects/p/instances/i");
        assert_eq!(config.admin_endpoint, DEFAULT_ADMIN_ENDPOINT);
        assert_eq!(config.data_endpoint, DEFAULT_DATA_ENDPOINT);
        assert_eq!(config.replication_poll_interval, Duration::from_secs(10));
        assert_eq!(config.retry, RetrySettings::default());
    }

    #[test]
    #[serial]
    fn test_emulator_env() {
        std::env::set_var(EMULATOR_HOST_ENV, "localhost:8086");
        let config = ClientConfig::from_env("p", "i");
        std::env::remove_var(EMULATOR_HOST_ENV);
        assert_eq!(config.admin_endpoint, "http://localhost:8086");
        assert_eq!(config.data_endpoint, "http://localhost:8086");

        let config = ClientConfig::from_env("p", "i");
        assert_eq!(config.data_endpoint, DEFAULT_DATA_ENDPOINT);
    }

    #[tokio::test]
    async fn test_tls_endpoints_are_rejected() {
        let config = ClientConfig::new("p", "i");
        let code = config
            .connect(&config.data_endpoint)
            .await
            .err()
            .map(|err| err.code());
        assert_eq!(code, Some(tonic::Code::InvalidArgument));
    }
}
