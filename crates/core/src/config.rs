//! Run configuration for a reconciliation pass.
//!
//! Values are collected by the CLI (command line options with
//! environment fallback) and validated here before any network
//! activity starts.

use crate::error::{Result, SyncError};

/// Default user attribute used for matching when none is configured.
pub const DEFAULT_USER_ATTRIBUTE: &str = "displayName";

/// Application credentials for one tenant.
///
/// Resolved exactly once at startup into a bearer token; nothing past
/// token acquisition ever branches on the credential kind.
#[derive(Debug, Clone)]
pub enum CredentialConfig {
    /// Client-secret credential.
    Secret { secret: String },
    /// Certificate credential: a PEM file containing the certificate
    /// and its private key.
    Certificate {
        path: String,
        password: Option<String>,
    },
}

/// Connection settings for one tenant (source or destination).
#[derive(Debug, Clone)]
pub struct TenantConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub credential: CredentialConfig,
}

/// Everything a reconciliation run needs to know.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub source: TenantConfig,
    pub destination: TenantConfig,

    /// Comma-separated display-name prefixes selecting groups at source.
    pub group_prefix: String,

    /// User attribute for matching users at source.
    pub source_user_attribute: String,
    /// User attribute for matching users at destination.
    pub destination_user_attribute: String,

    /// Create groups at destination that exist only at source.
    pub create_missing_groups: bool,
    /// Allow creating groups that have no members at source.
    /// Only meaningful together with `create_missing_groups`.
    pub allow_empty_groups: bool,
    /// Remove destination members that are absent at source.
    pub remove_members: bool,
    /// Add missing members at destination. On by default.
    pub create_members: bool,
    /// Log intended changes without writing anything.
    pub preview: bool,

    /// Number of concurrent workers. 1 means strictly sequential.
    pub threads: usize,
}

impl SyncConfig {
    /// Validate flag combinations and required values.
    ///
    /// Configuration errors are fatal and must surface before the run
    /// starts; nothing here touches the network.
    pub fn validate(&self) -> Result<()> {
        if self.group_prefix.is_empty() {
            return Err(SyncError::Config("group_prefix must not be empty".into()));
        }
        if self.allow_empty_groups && !self.create_missing_groups {
            return Err(SyncError::Config(
                "allow_empty_groups requires create_missing_groups".into(),
            ));
        }
        if self.threads == 0 {
            return Err(SyncError::Config("threads must be at least 1".into()));
        }
        Ok(())
    }

    /// The configured prefixes, split on commas.
    ///
    /// No trimming is applied: the prefix text is passed to the
    /// server-side filter exactly as given.
    pub fn group_prefixes(&self) -> Vec<&str> {
        self.group_prefix.split(',').collect()
    }
}
