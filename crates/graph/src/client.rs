//! Typed reqwest wrapper for the Microsoft Graph API.
//!
//! One client per tenant. Read paths normalize 404 into empty results;
//! every other non-success status is surfaced as a Graph error with
//! status and body context. All requests carry the
//! `ConsistencyLevel: eventual` header required for advanced queries.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use entrasync_core::error::{Result, SyncError};

use crate::identity::{fold_key, UserAttribute};
use crate::models::{DirectoryObject, Group, Page, User};

const GRAPH_API_BASE: &str = "https://graph.microsoft.com";

/// Field subset copied when a group is created at the destination.
const GROUP_CREATE_FIELDS: &str =
    "description,displayName,id,isAssignableToRole,mailEnabled,securityEnabled,mailNickname";

/// HTTP client for Graph group and membership operations on one tenant.
#[derive(Debug, Clone)]
pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: String,
}

impl GraphClient {
    /// Create a new client with the given bearer token.
    pub fn new(auth_token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: GRAPH_API_BASE.to_string(),
            auth_token: auth_token.to_string(),
        }
    }

    /// Override the base URL (for testing with wiremock).
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }

    fn groups_url(&self) -> String {
        format!("{}/v1.0/groups", self.base_url)
    }

    fn group_url(&self, id: &str) -> String {
        format!("{}/v1.0/groups/{}", self.base_url, id)
    }

    fn users_url(&self) -> String {
        format!("{}/v1.0/users", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        what: &str,
    ) -> Result<T> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.auth_token)
            .header("ConsistencyLevel", "eventual")
            .query(query)
            .send()
            .await
            .map_err(|e| SyncError::Graph(format!("{what} request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Graph(format!("{what} failed ({status}): {body}")));
        }

        resp.json::<T>()
            .await
            .map_err(|e| SyncError::Graph(format!("{what} parse failed: {e}")))
    }

    /// Like [`Self::get_json`], but a 404 becomes `Ok(None)`.
    async fn get_json_optional<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        what: &str,
    ) -> Result<Option<T>> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.auth_token)
            .header("ConsistencyLevel", "eventual")
            .query(query)
            .send()
            .await
            .map_err(|e| SyncError::Graph(format!("{what} request failed: {e}")))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Graph(format!("{what} failed ({status}): {body}")));
        }

        let parsed = resp
            .json::<T>()
            .await
            .map_err(|e| SyncError::Graph(format!("{what} parse failed: {e}")))?;
        Ok(Some(parsed))
    }

    /// Fetch one page of groups matching a display-name filter.
    ///
    /// Pass `next_link` from the previous page to continue; there is no
    /// cursor persistence, a fresh call restarts from the beginning.
    pub async fn list_groups_page(
        &self,
        filter: &str,
        next_link: Option<&str>,
    ) -> Result<Page<Group>> {
        match next_link {
            Some(link) => self.get_json(link, &[], "list groups").await,
            None => {
                let url = self.groups_url();
                self.get_json(
                    &url,
                    &[("$select", "displayName,id"), ("$filter", filter)],
                    "list groups",
                )
                .await
            }
        }
    }

    /// Find a group whose display name equals `name`, case-insensitively.
    ///
    /// The server-side filter is a prefix match (which can return more
    /// than intended), so pages are walked until an exact match shows up.
    pub async fn find_group_by_name(&self, name: &str) -> Result<Option<Group>> {
        let filter = format!("startswith(displayName, '{}')", escape_odata(name));
        let wanted = fold_key(name);

        let mut next_link: Option<String> = None;
        loop {
            let page = self.list_groups_page(&filter, next_link.as_deref()).await?;
            if let Some(group) = page
                .value
                .into_iter()
                .find(|g| fold_key(g.name()) == wanted)
            {
                return Ok(Some(group));
            }
            match page.next_link {
                Some(link) => next_link = Some(link),
                None => return Ok(None),
            }
        }
    }

    /// Fetch a group by id with the full field subset needed to copy it.
    pub async fn get_group(&self, id: &str) -> Result<Option<Group>> {
        let url = self.group_url(id);
        self.get_json_optional(&url, &[("$select", GROUP_CREATE_FIELDS)], "get group")
            .await
    }

    /// Fetch the full membership of a group, walking all pages.
    ///
    /// `None` (a group that was never persisted, e.g. preview-created)
    /// and 404 (a group that vanished) both yield an empty list; only
    /// user-typed members are returned.
    pub async fn list_group_members(
        &self,
        group_id: Option<&str>,
        attr: &UserAttribute,
    ) -> Result<Vec<User>> {
        let Some(group_id) = group_id else {
            return Ok(Vec::new());
        };

        let select = attr.select_clause();
        let first_url = format!("{}/members", self.group_url(group_id));

        let mut users = Vec::new();
        let mut next_link: Option<String> = None;
        loop {
            let page: Option<Page<DirectoryObject>> = match &next_link {
                Some(link) => self.get_json_optional(link, &[], "list members").await?,
                None => {
                    self.get_json_optional(
                        &first_url,
                        &[("$select", select.as_str())],
                        "list members",
                    )
                    .await?
                }
            };
            let Some(page) = page else {
                return Ok(Vec::new());
            };

            users.extend(page.value.into_iter().filter_map(DirectoryObject::into_user));
            match page.next_link {
                Some(link) => next_link = Some(link),
                None => return Ok(users),
            }
        }
    }

    /// Find a user by the configured matching attribute.
    ///
    /// `id` is a point lookup; `displayName` searches by prefix and then
    /// matches exactly (case-insensitive); any other attribute uses an
    /// exact-equality filter.
    pub async fn find_user_by_key(
        &self,
        value: &str,
        attr: &UserAttribute,
    ) -> Result<Option<User>> {
        let select = attr.select_clause();

        if *attr == UserAttribute::Id {
            let url = format!("{}/{}", self.users_url(), value);
            return self
                .get_json_optional(&url, &[("$select", select.as_str())], "get user")
                .await;
        }

        let filter = match attr {
            UserAttribute::DisplayName => {
                format!("startswith(displayName, '{}')", escape_odata(value))
            }
            other => format!("{} eq '{}'", other.graph_name(), escape_odata(value)),
        };
        let wanted = fold_key(value);

        let url = self.users_url();
        let mut next_link: Option<String> = None;
        loop {
            let page: Page<User> = match &next_link {
                Some(link) => self.get_json(link, &[], "find user").await?,
                None => {
                    self.get_json(
                        &url,
                        &[
                            ("$select", select.as_str()),
                            ("$filter", filter.as_str()),
                            ("$count", "true"),
                        ],
                        "find user",
                    )
                    .await?
                }
            };

            if let Some(user) = page
                .value
                .into_iter()
                .find(|u| attr.value_of(u).is_some_and(|v| fold_key(v) == wanted))
            {
                return Ok(Some(user));
            }
            match page.next_link {
                Some(link) => next_link = Some(link),
                None => return Ok(None),
            }
        }
    }

    /// Create a new group.
    pub async fn create_group(&self, group: &Group) -> Result<Group> {
        let resp = self
            .http
            .post(self.groups_url())
            .bearer_auth(&self.auth_token)
            .json(group)
            .send()
            .await
            .map_err(|e| SyncError::Graph(format!("create group request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Graph(format!(
                "create group failed ({status}): {body}"
            )));
        }

        resp.json::<Group>()
            .await
            .map_err(|e| SyncError::Graph(format!("create group parse failed: {e}")))
    }

    /// Add a user to a group's membership.
    pub async fn add_member(&self, group_id: &str, user_id: &str) -> Result<()> {
        let url = format!("{}/members/$ref", self.group_url(group_id));
        let body = serde_json::json!({
            "@odata.id": format!("{}/v1.0/directoryObjects/{}", self.base_url, user_id),
        });

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.auth_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::Graph(format!("add member request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Graph(format!(
                "add member failed ({status}): {body}"
            )));
        }
        Ok(())
    }

    /// Remove a user from a group's membership.
    pub async fn remove_member(&self, group_id: &str, user_id: &str) -> Result<()> {
        let url = format!("{}/members/{}/$ref", self.group_url(group_id), user_id);

        let resp = self
            .http
            .delete(&url)
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .map_err(|e| SyncError::Graph(format!("remove member request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Graph(format!(
                "remove member failed ({status}): {body}"
            )));
        }
        Ok(())
    }
}

/// Build the combined display-name filter for the configured prefixes:
/// one `startswith` disjunct per prefix.
pub fn group_prefix_filter(prefixes: &[&str]) -> String {
    prefixes
        .iter()
        .map(|p| format!("startswith(displayName, '{}')", escape_odata(p)))
        .collect::<Vec<_>>()
        .join(" or ")
}

/// Escape a literal for use inside an OData single-quoted string.
fn escape_odata(value: &str) -> String {
    value.replace('\'', "''")
}
