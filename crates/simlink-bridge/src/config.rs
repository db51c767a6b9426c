//! Bridge configuration.

use smol_str::SmolStr;

/// Configuration for a [`HostRuntime`](crate::host::HostRuntime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Name of the host, used in log fields and fault reports
    pub host_name: SmolStr,
    /// Treat a panic raised by a host callable as a contained fault
    pub catch_panics: bool,
    /// Treat releasing the lock from a thread that does not hold it as a fatal
    /// precondition violation instead of a no-op
    pub strict_release: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host_name: SmolStr::new_inline("host"),
            catch_panics: true,
            strict_release: false,
        }
    }
}

impl BridgeConfig {
    /// Create a new configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the host name.
    pub fn with_host_name(mut self, name: impl Into<SmolStr>) -> Self {
        self.host_name = name.into();
        self
    }

    /// Choose whether panics in host callables are contained.
    pub fn with_catch_panics(mut self, catch: bool) -> Self {
        self.catch_panics = catch;
        self
    }

    /// Choose whether a release without the lock held is fatal.
    pub fn with_strict_release(mut self, strict: bool) -> Self {
        self.strict_release = strict;
        self
    }
}
