use std::time::Duration;

use crate::acceptor::ACCEPT_BURST;
use crate::error::Error;

/// Configuration for the accept balancer.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum number of connections accepted from one endpoint per
    /// wake-up. Must be in `1..=ACCEPT_BURST`.
    pub burst_limit: usize,
    /// How long accepting pauses after an accept error other than
    /// `EAGAIN` (typically `EMFILE`/`ENFILE`). A shutdown request during
    /// the pause ends the loop.
    pub cooldown: Duration,
    /// Name given to the dedicated accept thread.
    pub thread_name: String,
    /// Try `accept4(SOCK_NONBLOCK)` before falling back to `accept` +
    /// `fcntl`. Set to false to start on the fallback path.
    pub use_accept4: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            burst_limit: ACCEPT_BURST,
            cooldown: Duration::from_millis(3),
            thread_name: "accept-balancer".to_string(),
            use_accept4: true,
        }
    }
}

impl Config {
    /// Validate configuration values. Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), Error> {
        if self.burst_limit == 0 || self.burst_limit > ACCEPT_BURST {
            return Err(Error::InvalidConfig(format!(
                "burst_limit must be in 1..={ACCEPT_BURST}"
            )));
        }
        if self.cooldown.is_zero() {
            return Err(Error::InvalidConfig("cooldown must be > 0".into()));
        }
        if self.thread_name.contains('\0') {
            return Err(Error::InvalidConfig(
                "thread_name must not contain NUL bytes".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`Config`] with discoverable methods and `build()` validation.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use accept_balancer::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .burst_limit(8)
///     .cooldown(Duration::from_millis(10))
///     .thread_name("frontend-accept")
///     .build()
///     .expect("invalid config");
/// assert_eq!(config.burst_limit, 8);
/// ```
#[derive(Default, Debug)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default config values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-endpoint burst limit.
    pub fn burst_limit(mut self, n: usize) -> Self {
        self.config.burst_limit = n;
        self
    }

    /// Set the pause taken after an exhaustion-class accept error.
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.config.cooldown = cooldown;
        self
    }

    /// Set the accept thread's name.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Enable or disable the `accept4` fast path.
    pub fn use_accept4(mut self, enable: bool) -> Self {
        self.config.use_accept4 = enable;
        self
    }

    /// Validate and return the config.
    pub fn build(self) -> Result<Config, Error> {
        self.config.validate()?;
        Ok(self.config)
    }
}
