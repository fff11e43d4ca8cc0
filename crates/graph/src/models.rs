//! Microsoft Graph request/response structs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A directory group.
///
/// `id` is tenant-local and never compared across tenants; groups are
/// matched across tenants by `display_name`, case-insensitively.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Group {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mail_nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mail_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_assignable_to_role: Option<bool>,
}

impl Group {
    /// The display name, or an empty string when absent.
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or_default()
    }
}

/// A directory user.
///
/// Only the well-known matching attributes are typed; any other
/// attribute requested via `$select` lands in `extra` and is reached
/// through the identity resolver's named-field fallback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_principal_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_premises_sam_account_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl User {
    /// The display name, or an empty string when absent. Used for
    /// diagnostics only, never for matching.
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or_default()
    }
}

/// One page of a paginated collection response.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

/// A member entry of a group, which may be any directory object type.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryObject {
    #[serde(rename = "@odata.type")]
    pub odata_type: Option<String>,
    #[serde(flatten)]
    pub user: User,
}

impl DirectoryObject {
    /// Returns the member as a [`User`] if it is one; non-user members
    /// (nested groups, devices, service principals) yield `None`.
    pub fn into_user(self) -> Option<User> {
        match self.odata_type.as_deref() {
            Some("#microsoft.graph.user") => Some(self.user),
            _ => None,
        }
    }
}
