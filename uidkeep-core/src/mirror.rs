//! Best-effort mirroring of local changes to the remote access-control
//! service.
//!
//! Local state is authoritative. A mirror call that cannot be made (no
//! credential) or that fails is logged and counted, never retried and never
//! reported back to the operation that triggered it.

use async_trait::async_trait;
use reqwest::Client;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::AccessControlConfig;
use crate::credential::CredentialHandle;
use crate::error::{Error, Result};

const ACCESS_CONTROL: &str = "access control";

/// Which remote endpoint to call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorAction {
    Add,
    Remove,
}

impl fmt::Display for MirrorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorAction::Add => f.write_str("add"),
            MirrorAction::Remove => f.write_str("remove"),
        }
    }
}

/// Remote service that grants and revokes access per UID
#[async_trait]
pub trait AccessControl: Send + Sync {
    async fn call(&self, action: MirrorAction, token: &str, uid: &str) -> Result<()>;
}

/// Calls `GET {url}?token=..&id=..&key=..` on the add or remove endpoint.
pub struct HttpAccessControl {
    client: Client,
    config: AccessControlConfig,
}

impl HttpAccessControl {
    pub fn new(config: AccessControlConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::external(ACCESS_CONTROL, e))?;
        Ok(Self { client, config })
    }

    fn url_for(&self, action: MirrorAction) -> &str {
        match action {
            MirrorAction::Add => &self.config.add_url,
            MirrorAction::Remove => &self.config.remove_url,
        }
    }
}

#[async_trait]
impl AccessControl for HttpAccessControl {
    async fn call(&self, action: MirrorAction, token: &str, uid: &str) -> Result<()> {
        let response = self
            .client
            .get(self.url_for(action))
            .query(&[
                ("token", token),
                ("id", uid),
                ("key", self.config.admin_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::external(ACCESS_CONTROL, e.without_url()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::external(ACCESS_CONTROL, format!("{action} returned HTTP {status}")))
        }
    }
}

/// Counters for mirror outcomes since startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorStats {
    pub delivered: u64,
    pub failed: u64,
    /// Calls not attempted because no credential was held
    pub skipped: u64,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

struct MirrorInner {
    access: Option<Arc<dyn AccessControl>>,
    credentials: CredentialHandle,
    counters: Counters,
}

/// Fire-and-forget side channel to the access-control service.
#[derive(Clone)]
pub struct Mirror {
    inner: Arc<MirrorInner>,
}

impl Mirror {
    pub fn new(access: Arc<dyn AccessControl>, credentials: CredentialHandle) -> Self {
        Self {
            inner: Arc::new(MirrorInner {
                access: Some(access),
                credentials,
                counters: Counters::default(),
            }),
        }
    }

    /// A mirror that never calls out
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(MirrorInner {
                access: None,
                credentials: CredentialHandle::none(),
                counters: Counters::default(),
            }),
        }
    }

    pub fn credentials(&self) -> &CredentialHandle {
        &self.inner.credentials
    }

    /// Sends `action` for `uid` if possible. Never fails; the outcome is
    /// logged and counted.
    pub async fn notify(&self, action: MirrorAction, uid: &str) {
        let counters = &self.inner.counters;
        let Some(access) = &self.inner.access else {
            return;
        };

        let credential = match self.inner.credentials.require() {
            Ok(credential) => credential,
            Err(err) => {
                counters.skipped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Skipping {} for UID {}: {}", action, uid, err);
                return;
            }
        };

        match access.call(action, credential.token(), uid).await {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Mirrored {} for UID {}", action, uid);
            }
            Err(err) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Mirror {} for UID {} failed: {}", action, uid, err);
            }
        }
    }

    pub fn stats(&self) -> MirrorStats {
        let counters = &self.inner.counters;
        MirrorStats {
            delivered: counters.delivered.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            skipped: counters.skipped.load(Ordering::Relaxed),
        }
    }
}

/// In-memory [`AccessControl`] that records every call, for tests.
#[cfg(any(test, feature = "test-util"))]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingAccessControl {
        calls: Mutex<Vec<(MirrorAction, String, String)>>,
        fail: std::sync::atomic::AtomicBool,
    }

    impl RecordingAccessControl {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Makes every later call return an error
        pub fn fail_calls(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        /// `(action, token, uid)` for every call so far
        pub fn calls(&self) -> Vec<(MirrorAction, String, String)> {
            self.calls
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone()
        }

        pub fn uids_for(&self, action: MirrorAction) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter(|(a, _, _)| *a == action)
                .map(|(_, _, uid)| uid)
                .collect()
        }
    }

    #[async_trait]
    impl AccessControl for RecordingAccessControl {
        async fn call(&self, action: MirrorAction, token: &str, uid: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push((action, token.to_string(), uid.to_string()));
            if self.fail.load(Ordering::SeqCst) {
                Err(Error::external(ACCESS_CONTROL, "HTTP 500"))
            } else {
                Ok(())
            }
        }
    }
}
