//! The reconciliation run: group discovery, membership diffing, and
//! dispatch of the resulting create/add/remove operations.
//!
//! One run walks every source group matching the configured prefixes.
//! Per-group work is independent and may run on a bounded worker pool;
//! with a single thread everything runs inline, in discovery order.
//! Read failures inside a group are logged and skip that group; write
//! failures are logged and counted, never aborting the run. Counters
//! record performed writes only, so a preview run reports zero writes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use entrasync_core::config::SyncConfig;
use entrasync_core::error::{Result, SyncError};
use entrasync_graph::client::{group_prefix_filter, GraphClient};
use entrasync_graph::identity::{fold_key, UserAttribute};
use entrasync_graph::models::{Group, User};

use crate::pool::WorkerPool;
use crate::report::{MissingUserCache, RunCounters, RunReport};

/// Reconciles group memberships from a source tenant into a destination
/// tenant.
#[derive(Debug, Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

#[derive(Debug)]
struct EngineInner {
    source: GraphClient,
    destination: GraphClient,
    config: SyncConfig,
    source_attr: UserAttribute,
    destination_attr: UserAttribute,
    counters: RunCounters,
    missing_users: MissingUserCache,
}

impl SyncEngine {
    /// Build an engine from validated configuration and per-tenant
    /// clients. Attribute names are resolved here, so a bad attribute
    /// fails before any network activity.
    pub fn new(
        source: GraphClient,
        destination: GraphClient,
        config: SyncConfig,
    ) -> Result<Self> {
        config.validate()?;
        let source_attr = UserAttribute::parse(&config.source_user_attribute)?;
        let destination_attr = UserAttribute::parse(&config.destination_user_attribute)?;
        Ok(Self {
            inner: Arc::new(EngineInner {
                source,
                destination,
                config,
                source_attr,
                destination_attr,
                counters: RunCounters::default(),
                missing_users: MissingUserCache::default(),
            }),
        })
    }

    /// Run one reconciliation pass and return its report.
    ///
    /// Failing to enumerate source groups is fatal; everything after
    /// discovery degrades per group or per member instead.
    pub async fn reconcile(&self) -> Result<RunReport> {
        let start = Instant::now();
        self.inner.counters.reset();
        self.inner.missing_users.clear();

        let pool = (self.inner.config.threads > 1)
            .then(|| WorkerPool::new(self.inner.config.threads));

        let prefixes = self.inner.config.group_prefixes();
        let filter = group_prefix_filter(&prefixes);
        info!(filter = %filter, preview = self.inner.config.preview, "starting reconciliation");

        let mut next_link: Option<String> = None;
        loop {
            let page = self
                .inner
                .source
                .list_groups_page(&filter, next_link.as_deref())
                .await?;

            for group in page.value {
                match &pool {
                    Some(pool) => {
                        let task = reconcile_group(
                            Arc::clone(&self.inner),
                            group,
                            Some(pool.clone()),
                        );
                        pool.spawn(task);
                    }
                    None => reconcile_group(Arc::clone(&self.inner), group, None).await,
                }
            }

            match page.next_link {
                Some(link) => next_link = Some(link),
                None => break,
            }
        }

        if let Some(pool) = &pool {
            pool.wait().await;
        }

        Ok(self.report(start.elapsed()))
    }

    fn report(&self, elapsed: Duration) -> RunReport {
        let c = &self.inner.counters;
        RunReport {
            elapsed,
            groups: c.groups.get(),
            members_seen: c.members_seen.get(),
            missing_groups: c.missing_groups.get(),
            groups_created: c.groups_created.get(),
            group_create_errors: c.group_create_errors.get(),
            missing_users: self.inner.missing_users.len() as u64,
            members_created: c.members_created.get(),
            member_create_errors: c.member_create_errors.get(),
            members_removed: c.members_removed.get(),
            member_remove_errors: c.member_remove_errors.get(),
            create_missing_groups: self.inner.config.create_missing_groups,
            remove_members: self.inner.config.remove_members,
        }
    }
}

/// Reconcile one source group against the destination.
async fn reconcile_group(inner: Arc<EngineInner>, group: Group, pool: Option<WorkerPool>) {
    inner.counters.groups.inc();
    let name = group.name().to_string();

    let source_members = match inner
        .source
        .list_group_members(group.id.as_deref(), &inner.source_attr)
        .await
    {
        Ok(members) => members,
        Err(e) => {
            error!(group = %name, error = %e, "failed to read source membership, skipping group");
            return;
        }
    };
    inner.counters.members_seen.add(source_members.len() as u64);

    let destination_group = match inner.destination.find_group_by_name(&name).await {
        Ok(found) => found,
        Err(e) => {
            error!(group = %name, error = %e, "failed to resolve group at destination, skipping group");
            return;
        }
    };

    let destination_group = match destination_group {
        Some(found) => found,
        None => {
            if source_members.is_empty() && !inner.config.allow_empty_groups {
                warn!(group = %name, "group is missing at destination and empty at source, skipping");
                return;
            }
            inner.counters.missing_groups.inc();
            if !inner.config.create_missing_groups {
                warn!(group = %name, "group is missing at destination");
                return;
            }
            match create_missing_group(&inner, &group).await {
                Ok(created) => created,
                Err(e) => {
                    inner.counters.group_create_errors.inc();
                    warn!(group = %name, error = %e, "failed to create group at destination");
                    return;
                }
            }
        }
    };

    let destination_members = match inner
        .destination
        .list_group_members(destination_group.id.as_deref(), &inner.destination_attr)
        .await
    {
        Ok(members) => members,
        Err(e) => {
            error!(group = %name, error = %e, "failed to read destination membership, skipping group");
            return;
        }
    };

    let source_index = index_by_key(source_members, &inner.source_attr, "source", &name);
    let destination_index = index_by_key(
        destination_members,
        &inner.destination_attr,
        "destination",
        &name,
    );
    let destination_group = Arc::new(destination_group);

    if inner.config.create_members {
        for (key, user) in &source_index {
            if destination_index.contains_key(key) || inner.missing_users.contains(key) {
                continue;
            }
            // Destination lookup uses the original-cased value, not the
            // folded key.
            let Some(lookup) = inner.source_attr.value_of(user) else {
                continue;
            };
            let task = add_missing_member(
                Arc::clone(&inner),
                key.clone(),
                lookup.to_string(),
                Arc::clone(&destination_group),
            );
            match &pool {
                Some(pool) => pool.spawn(task),
                None => task.await,
            }
        }
    }

    if inner.config.remove_members {
        for (key, user) in &destination_index {
            if source_index.contains_key(key) {
                continue;
            }
            let Some(user_id) = user.id.as_deref() else {
                warn!(group = %name, user = %user.name(), "stale member carries no id, cannot remove");
                continue;
            };
            let task = remove_stale_member(
                Arc::clone(&inner),
                Arc::clone(&destination_group),
                user_id.to_string(),
                user.name().to_string(),
            );
            match &pool {
                Some(pool) => pool.spawn(task),
                None => task.await,
            }
        }
    }
}

/// Create the destination counterpart of a source group, copying the
/// creation field subset from a fresh read of the source group.
///
/// In preview mode nothing is written; the returned group has no id, so
/// the membership diff proceeds against an empty destination.
async fn create_missing_group(inner: &EngineInner, source_group: &Group) -> Result<Group> {
    let Some(id) = source_group.id.as_deref() else {
        return Err(SyncError::Graph("source group carries no id".into()));
    };
    let full = inner
        .source
        .get_group(id)
        .await?
        .ok_or_else(|| SyncError::Graph(format!("source group {id} vanished mid-run")))?;

    let template = Group { id: None, ..full };
    if inner.config.preview {
        info!(group = %template.name(), "preview: would create group at destination");
        return Ok(template);
    }

    let created = inner.destination.create_group(&template).await?;
    inner.counters.groups_created.inc();
    info!(group = %created.name(), "created group at destination");
    Ok(created)
}

/// Index users by the folded value of the matching attribute.
///
/// Users without a value for the attribute are excluded with a warning;
/// when two users fold to the same key, the first one seen wins.
fn index_by_key(
    users: Vec<User>,
    attr: &UserAttribute,
    side: &str,
    group: &str,
) -> HashMap<String, User> {
    let mut index = HashMap::with_capacity(users.len());
    for user in users {
        match attr.value_of(&user) {
            Some(value) => {
                index.entry(fold_key(value)).or_insert(user);
            }
            None => {
                warn!(
                    group,
                    side,
                    user = %user.name(),
                    attribute = attr.graph_name(),
                    "member carries no value for the matching attribute, excluded"
                );
            }
        }
    }
    index
}

/// Look up one missing member at the destination and add it.
async fn add_missing_member(
    inner: Arc<EngineInner>,
    key: String,
    lookup: String,
    group: Arc<Group>,
) {
    match inner
        .destination
        .find_user_by_key(&lookup, &inner.destination_attr)
        .await
    {
        Ok(Some(user)) => {
            let Some(user_id) = user.id.as_deref() else {
                warn!(group = %group.name(), user = %lookup, "matched user carries no id, cannot add");
                return;
            };
            if inner.config.preview {
                info!(group = %group.name(), user = %user.name(), "preview: would add member");
                return;
            }
            let Some(group_id) = group.id.as_deref() else {
                return;
            };
            match inner.destination.add_member(group_id, user_id).await {
                Ok(()) => inner.counters.members_created.inc(),
                Err(e) => {
                    inner.counters.member_create_errors.inc();
                    warn!(group = %group.name(), user = %lookup, error = %e, "failed to add member");
                }
            }
        }
        Ok(None) => {
            if inner.missing_users.insert(&key) {
                warn!(user = %lookup, "user not found at destination");
            }
        }
        Err(e) => {
            error!(user = %lookup, error = %e, "user lookup at destination failed");
        }
    }
}

/// Remove one destination member that no longer exists at the source.
async fn remove_stale_member(
    inner: Arc<EngineInner>,
    group: Arc<Group>,
    user_id: String,
    display_name: String,
) {
    if inner.config.preview {
        info!(group = %group.name(), user = %display_name, "preview: would remove member");
        return;
    }
    let Some(group_id) = group.id.as_deref() else {
        return;
    };
    match inner.destination.remove_member(group_id, &user_id).await {
        Ok(()) => inner.counters.members_removed.inc(),
        Err(e) => {
            inner.counters.member_remove_errors.inc();
            warn!(group = %group.name(), user = %display_name, error = %e, "failed to remove member");
        }
    }
}
