use std::time::Duration;

// Timeout of a REST call.
const HTTP_TIMEOUT: Duration = Duration::from_millis(6050);

// Delay between a mutating action and the state read which follows it.
const REFRESH_DELAY: Duration = Duration::from_millis(500);

// UDP port of the push service.
const PUSH_PORT: u16 = 30007;

// Interval between two keep-alive datagrams.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(90);

// Maximum wait for a keep-alive acknowledgment.
const ACK_TIMEOUT: Duration = Duration::from_secs(2);

// Maximum wait for a state datagram before checking the keep-alive again.
const STATUS_TIMEOUT: Duration = Duration::from_secs(20);

/// REST transport configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    pub(crate) timeout: Duration,
    pub(crate) refresh_delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportConfig {
    /// Creates a [`TransportConfig`] with the default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timeout: HTTP_TIMEOUT,
            refresh_delay: REFRESH_DELAY,
        }
    }

    /// Sets the timeout bounding every REST call.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the delay between an action and the state read which follows it
    /// in [`crate::client::RestClient::execute_action_and_refresh`].
    #[must_use]
    pub const fn refresh_delay(mut self, refresh_delay: Duration) -> Self {
        self.refresh_delay = refresh_delay;
        self
    }
}

/// Push listener configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConfig {
    pub(crate) port: u16,
    pub(crate) keep_alive_interval: Duration,
    pub(crate) ack_timeout: Duration,
    pub(crate) status_timeout: Duration,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PushConfig {
    /// Creates a [`PushConfig`] with the default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            port: PUSH_PORT,
            keep_alive_interval: KEEP_ALIVE_INTERVAL,
            ack_timeout: ACK_TIMEOUT,
            status_timeout: STATUS_TIMEOUT,
        }
    }

    /// Sets the UDP port of the push service.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the interval between two keep-alive datagrams.
    #[must_use]
    pub const fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Sets the maximum wait for a keep-alive acknowledgment.
    #[must_use]
    pub const fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Sets the maximum wait for a state datagram.
    ///
    /// When it expires the listener checks whether a keep-alive is due and
    /// waits again.
    #[must_use]
    pub const fn status_timeout(mut self, timeout: Duration) -> Self {
        self.status_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{PushConfig, TransportConfig};

    #[test]
    fn default_configs() {
        let transport = TransportConfig::default();
        assert_eq!(transport.timeout, Duration::from_millis(6050));
        assert_eq!(transport.refresh_delay, Duration::from_millis(500));

        let push = PushConfig::default();
        assert_eq!(push.port, 30007);
        assert_eq!(push.keep_alive_interval, Duration::from_secs(90));
        assert_eq!(push.ack_timeout, Duration::from_secs(2));
        assert_eq!(push.status_timeout, Duration::from_secs(20));
    }

    #[test]
    fn custom_push_config() {
        let push = PushConfig::new()
            .port(4000)
            .keep_alive_interval(Duration::from_secs(1))
            .ack_timeout(Duration::from_millis(100))
            .status_timeout(Duration::from_millis(200));

        assert_eq!(
            push,
            PushConfig {
                port: 4000,
                keep_alive_interval: Duration::from_secs(1),
                ack_timeout: Duration::from_millis(100),
                status_timeout: Duration::from_millis(200),
            }
        );
    }
}
