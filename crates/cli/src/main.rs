use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use entrasync_core::config::{CredentialConfig, SyncConfig, TenantConfig, DEFAULT_USER_ATTRIBUTE};
use entrasync_engine::sync::SyncEngine;
use entrasync_graph::auth::TokenClient;
use entrasync_graph::client::GraphClient;

/// Sync group memberships from a source Entra ID tenant into a
/// destination tenant. Every option can also be supplied through an
/// `ENTRASYNC_*` environment variable.
#[derive(Parser, Debug)]
#[command(name = "entrasync", about = "Cross-tenant group membership sync", version)]
struct Cli {
    /// Source tenant id
    #[arg(long, env = "ENTRASYNC_SRC_TENANT_ID")]
    src_tenant_id: String,
    /// Application (client) id at the source tenant
    #[arg(long, env = "ENTRASYNC_SRC_CLIENT_ID")]
    src_client_id: String,
    /// Client secret at the source tenant
    #[arg(long, env = "ENTRASYNC_SRC_CLIENT_SECRET")]
    src_client_secret: Option<String>,
    /// PEM certificate file (certificate plus private key) at the source tenant
    #[arg(long, env = "ENTRASYNC_SRC_CLIENT_CERTIFICATE")]
    src_client_certificate: Option<String>,
    /// Password protecting the source certificate's private key
    #[arg(long, env = "ENTRASYNC_SRC_CLIENT_CERTIFICATE_PASSWORD")]
    src_client_certificate_password: Option<String>,

    /// Destination tenant id
    #[arg(long, env = "ENTRASYNC_DST_TENANT_ID")]
    dst_tenant_id: String,
    /// Application (client) id at the destination tenant
    #[arg(long, env = "ENTRASYNC_DST_CLIENT_ID")]
    dst_client_id: String,
    /// Client secret at the destination tenant
    #[arg(long, env = "ENTRASYNC_DST_CLIENT_SECRET")]
    dst_client_secret: Option<String>,
    /// PEM certificate file (certificate plus private key) at the destination tenant
    #[arg(long, env = "ENTRASYNC_DST_CLIENT_CERTIFICATE")]
    dst_client_certificate: Option<String>,
    /// Password protecting the destination certificate's private key
    #[arg(long, env = "ENTRASYNC_DST_CLIENT_CERTIFICATE_PASSWORD")]
    dst_client_certificate_password: Option<String>,

    /// Display-name prefix(es) selecting groups at the source, comma-separated
    #[arg(long, env = "ENTRASYNC_GROUP_PREFIX")]
    group_prefix: String,

    /// Create groups at the destination that exist only at the source
    #[arg(long, env = "ENTRASYNC_CREATE_MISSING_GROUPS")]
    create_missing_groups: bool,
    /// Also create groups that have no members at the source
    #[arg(long, env = "ENTRASYNC_ALLOW_EMPTY_GROUPS")]
    allow_empty_groups: bool,
    /// Remove destination members that are absent at the source
    #[arg(long, env = "ENTRASYNC_REMOVE_MEMBERS")]
    remove_members: bool,
    /// Log intended changes without writing anything
    #[arg(long, env = "ENTRASYNC_PREVIEW")]
    preview: bool,

    /// Number of concurrent workers; 1 runs strictly sequentially
    #[arg(long, env = "ENTRASYNC_THREADS", default_value_t = 1)]
    threads: usize,

    /// User attribute used to match users on both sides
    #[arg(long, env = "ENTRASYNC_USER_FIELD_NAME", default_value = DEFAULT_USER_ATTRIBUTE)]
    user_field_name: String,
    /// Override the matching attribute at the source only
    #[arg(long, env = "ENTRASYNC_SRC_USER_FIELD_NAME")]
    src_user_field_name: Option<String>,
    /// Override the matching attribute at the destination only
    #[arg(long, env = "ENTRASYNC_DST_USER_FIELD_NAME")]
    dst_user_field_name: Option<String>,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<SyncConfig> {
        let source = TenantConfig {
            tenant_id: self.src_tenant_id,
            client_id: self.src_client_id,
            credential: credential(
                self.src_client_secret,
                self.src_client_certificate,
                self.src_client_certificate_password,
                "source",
            )?,
        };
        let destination = TenantConfig {
            tenant_id: self.dst_tenant_id,
            client_id: self.dst_client_id,
            credential: credential(
                self.dst_client_secret,
                self.dst_client_certificate,
                self.dst_client_certificate_password,
                "destination",
            )?,
        };

        let source_user_attribute = self
            .src_user_field_name
            .unwrap_or_else(|| self.user_field_name.clone());
        let destination_user_attribute = self
            .dst_user_field_name
            .unwrap_or_else(|| self.user_field_name.clone());

        Ok(SyncConfig {
            source,
            destination,
            group_prefix: self.group_prefix,
            source_user_attribute,
            destination_user_attribute,
            create_missing_groups: self.create_missing_groups,
            allow_empty_groups: self.allow_empty_groups,
            remove_members: self.remove_members,
            create_members: true,
            preview: self.preview,
            threads: self.threads,
        })
    }
}

/// Resolve a tenant's credential from the secret/certificate options.
/// Exactly one of the two must be given.
fn credential(
    secret: Option<String>,
    certificate: Option<String>,
    password: Option<String>,
    side: &str,
) -> anyhow::Result<CredentialConfig> {
    match (secret, certificate) {
        (Some(secret), None) => Ok(CredentialConfig::Secret { secret }),
        (None, Some(path)) => Ok(CredentialConfig::Certificate { path, password }),
        (Some(_), Some(_)) => anyhow::bail!(
            "{side}: specify either a client secret or a client certificate, not both"
        ),
        (None, None) => {
            anyhow::bail!("{side}: a client secret or a client certificate is required")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.into_config()?;
    config.validate()?;

    if config.preview {
        println!("Preview mode: no changes will be made.");
    }

    let tokens = TokenClient::new();
    info!(tenant = %config.source.tenant_id, "acquiring token for source tenant");
    let source_token = tokens.acquire(&config.source).await?;
    info!(tenant = %config.destination.tenant_id, "acquiring token for destination tenant");
    let destination_token = tokens.acquire(&config.destination).await?;

    let engine = SyncEngine::new(
        GraphClient::new(&source_token),
        GraphClient::new(&destination_token),
        config,
    )?;

    let report = engine.reconcile().await?;
    print!("{}", report.summary());

    Ok(())
}
