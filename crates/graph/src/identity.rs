//! Identity resolution: mapping a configured attribute name to a typed
//! accessor on [`User`].
//!
//! The attribute decides three things: which accessor extracts the
//! comparison value from a user record, which fields a `$select`
//! clause must request, and what shape of server-side query locates a
//! user by that value.

use entrasync_core::error::{Result, SyncError};

use crate::models::User;

/// The user attribute used to match users across tenants.
///
/// Well-known attributes get dedicated accessors; anything else is a
/// named-field lookup against the loosely-typed remainder of the user
/// record. This is a fixed dispatch table, so an attribute is resolved
/// exactly once per side when the run configuration is parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAttribute {
    Id,
    DisplayName,
    UserPrincipalName,
    OnPremisesSamAccountName,
    EmployeeId,
    Other(String),
}

impl UserAttribute {
    /// Parse a configured attribute name, case-insensitively.
    ///
    /// Unrecognized names become [`UserAttribute::Other`] after a
    /// syntactic check; a name that cannot be a Graph property is a
    /// configuration error, raised before the run starts.
    pub fn parse(name: &str) -> Result<Self> {
        let attr = match name.to_ascii_lowercase().as_str() {
            "id" => Self::Id,
            "displayname" => Self::DisplayName,
            "userprincipalname" => Self::UserPrincipalName,
            "onpremisessamaccountname" => Self::OnPremisesSamAccountName,
            "employeeid" => Self::EmployeeId,
            _ => {
                let valid = !name.is_empty()
                    && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
                    && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
                if !valid {
                    return Err(SyncError::Config(format!(
                        "unknown or invalid user attribute name: '{name}'"
                    )));
                }
                Self::Other(name.to_string())
            }
        };
        Ok(attr)
    }

    /// The Graph property name this attribute selects and filters on.
    pub fn graph_name(&self) -> &str {
        match self {
            Self::Id => "id",
            Self::DisplayName => "displayName",
            Self::UserPrincipalName => "userPrincipalName",
            Self::OnPremisesSamAccountName => "onPremisesSamAccountName",
            Self::EmployeeId => "employeeId",
            Self::Other(name) => name,
        }
    }

    /// The `$select` clause for user reads: `displayName,id` plus this
    /// attribute when it is not already one of those.
    pub fn select_clause(&self) -> String {
        match self {
            Self::Id | Self::DisplayName => "displayName,id".to_string(),
            other => format!("displayName,id,{}", other.graph_name()),
        }
    }

    /// Extract this attribute's value from a user record.
    ///
    /// `None` means the record carries no value for the attribute; the
    /// caller excludes such users from the identity-keyed diff.
    pub fn value_of<'a>(&self, user: &'a User) -> Option<&'a str> {
        match self {
            Self::Id => user.id.as_deref(),
            Self::DisplayName => user.display_name.as_deref(),
            Self::UserPrincipalName => user.user_principal_name.as_deref(),
            Self::OnPremisesSamAccountName => user.on_premises_sam_account_name.as_deref(),
            Self::EmployeeId => user.employee_id.as_deref(),
            Self::Other(name) => user.extra.get(name).and_then(|v| v.as_str()),
        }
    }
}

/// Fold a value into its identity key: case-insensitive and
/// culture-invariant (plain Unicode lowercasing, no locale collation).
pub fn fold_key(value: &str) -> String {
    value.to_lowercase()
}
