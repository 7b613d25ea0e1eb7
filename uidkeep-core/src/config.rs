use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default location of the store file, relative to the working directory
pub const DEFAULT_STORAGE_FILE: &str = "uid_storage.json";

/// Default credential issuing endpoint
pub const DEFAULT_ISSUER_URL: &str = "https://jwt-gen-api-v2.onrender.com/token";

/// Default access-control endpoint for granting a UID
pub const DEFAULT_ADD_URL: &str = "https://amin-api-remove-add-jwt-token.onrender.com/adding_friend";

/// Default access-control endpoint for revoking a UID
pub const DEFAULT_REMOVE_URL: &str = "https://amin-api-remove-add-jwt-token.onrender.com/remove_friend";

/// Configuration for the durable record store
///
/// # Example
///
/// ```rust
/// use uidkeep_core::StoreConfig;
///
/// let config = StoreConfig::default().with_path("/var/lib/uidkeep/uids.json");
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path of the JSON file backing the store (default: `uid_storage.json`)
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STORAGE_FILE),
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }
}

/// Configuration for the background expiry sweep
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Interval between sweeps (default: 60 seconds)
    pub interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

impl SweeperConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sweep interval
    ///
    /// This determines how often expired records are evicted and revoked
    /// upstream.
    ///
    /// # Example
    ///
    /// ```rust
    /// use uidkeep_core::SweeperConfig;
    /// use std::time::Duration;
    ///
    /// let config = SweeperConfig::default().with_interval(Duration::from_secs(30));
    /// ```
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Configuration for the credential refresh loop
#[derive(Clone)]
pub struct CredentialConfig {
    /// Endpoint that issues bearer tokens
    pub issuer_url: String,
    /// Identity sent as the `uid` query parameter
    pub identity: String,
    /// Secret sent as the `password` query parameter
    pub secret: String,
    /// Interval between refreshes (default: 8 hours)
    pub refresh_interval: Duration,
    /// Upper bound on a single issuer request (default: 10 seconds)
    pub timeout: Duration,
}

impl CredentialConfig {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            issuer_url: DEFAULT_ISSUER_URL.to_string(),
            identity: identity.into(),
            secret: secret.into(),
            refresh_interval: Duration::from_secs(8 * 3600),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_issuer_url(mut self, url: impl Into<String>) -> Self {
        self.issuer_url = url.into();
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("issuer_url", &self.issuer_url)
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .field("refresh_interval", &self.refresh_interval)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Configuration for the remote access-control endpoints
#[derive(Clone)]
pub struct AccessControlConfig {
    pub add_url: String,
    pub remove_url: String,
    /// Key forwarded as the `key` query parameter on every call
    pub admin_key: String,
    /// Upper bound on a single call (default: 5 seconds)
    pub timeout: Duration,
}

impl AccessControlConfig {
    pub fn new(admin_key: impl Into<String>) -> Self {
        Self {
            add_url: DEFAULT_ADD_URL.to_string(),
            remove_url: DEFAULT_REMOVE_URL.to_string(),
            admin_key: admin_key.into(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_add_url(mut self, url: impl Into<String>) -> Self {
        self.add_url = url.into();
        self
    }

    pub fn with_remove_url(mut self, url: impl Into<String>) -> Self {
        self.remove_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Debug for AccessControlConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessControlConfig")
            .field("add_url", &self.add_url)
            .field("remove_url", &self.remove_url)
            .field("admin_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}
