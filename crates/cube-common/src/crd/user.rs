//! User Custom Resource Definition

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a User
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "user.kubecube.io",
    version = "v1",
    kind = "User",
    plural = "users",
    status = "UserStatus",
    printcolumn = r#"{"name":"Display","type":"string","jsonPath":".spec.displayName"}"#,
    printcolumn = r#"{"name":"Login","type":"string","jsonPath":".spec.loginType"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".spec.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    /// Hashed password for normal logins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Email address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Phone number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    /// Preferred UI language
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// How the user authenticates
    #[serde(default)]
    pub login_type: LoginType,

    /// Platform role name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Whether the user may log in
    #[serde(default)]
    pub state: UserState,
}

/// Authentication source of a user
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoginType {
    /// Local password
    #[default]
    Normal,
    /// Directory bind
    Ldap,
    /// GitHub OAuth
    Github,
    /// Generic external token
    Generic,
}

/// Account state of a user
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserState {
    /// Active account
    #[default]
    Normal,
    /// Login disabled
    Forbidden,
}

/// A project membership with the tenant that owns the project
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProjectInfo {
    /// Project name
    pub project: String,
    /// Owning tenant
    pub tenant: String,
}

/// Status for a User
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    /// Tenants the user belongs to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub belong_tenants: Vec<String>,

    /// Projects the user belongs to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub belong_project_infos: Vec<ProjectInfo>,

    /// True if bound to the platform admin role
    #[serde(default)]
    pub platform_admin: bool,

    /// Time of the last successful login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login_time: Option<DateTime<Utc>>,

    /// Source address of the last successful login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login_ip: Option<String>,
}

impl UserStatus {
    /// True if `tenant` is in `belongTenants`
    pub fn belongs_to_tenant(&self, tenant: &str) -> bool {
        self.belong_tenants.iter().any(|t| t == tenant)
    }

    /// True if any `belongProjectInfos` entry names `project`
    pub fn belongs_to_project(&self, project: &str) -> bool {
        self.belong_project_infos.iter().any(|p| p.project == project)
    }

    /// Same memberships, ignoring order and login bookkeeping
    pub fn same_membership(&self, other: &UserStatus) -> bool {
        let mut a_tenants = self.belong_tenants.clone();
        let mut b_tenants = other.belong_tenants.clone();
        a_tenants.sort();
        b_tenants.sort();
        let mut a_projects = self.belong_project_infos.clone();
        let mut b_projects = other.belong_project_infos.clone();
        a_projects.sort();
        b_projects.sort();
        a_tenants == b_tenants && a_projects == b_projects && self.platform_admin == other.platform_admin
    }
}
