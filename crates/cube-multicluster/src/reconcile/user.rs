//! User controller
//!
//! Recomputes each User's tenant and project memberships from the
//! RoleBindings that name it. Namespace changes reach this controller
//! through the [`NamespaceMapper`](super::NamespaceMapper).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleBinding, Subject};
use kube::api::{ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, error, info, warn};

use cube_common::crd::{ProjectInfo, User, UserStatus};
use cube_common::labels::{non_empty, HNC_PROJECT_LABEL, HNC_TENANT_LABEL};
use cube_common::{Error, FIELD_MANAGER};

use super::mapper::{namespace_changes, NamespaceMapper};

/// Watch timeout, kept under the client read timeout
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Resync interval for a successfully reconciled user
const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Retry interval after a failed reconcile
const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// ClusterRole granting platform-wide administration
pub const PLATFORM_ADMIN_ROLE: &str = "platform-admin";

/// Shared state for User reconciles
pub struct Context {
    client: Client,
}

impl Context {
    /// Create a context around a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn names_user(subjects: Option<&Vec<Subject>>, user: &str) -> bool {
    subjects
        .into_iter()
        .flatten()
        .any(|s| s.kind == "User" && s.name == user)
}

/// Memberships implied by the bindings that name `user`
///
/// A binding in a namespace with tenant and project labels makes the user a
/// project member; one in a tenant-only namespace makes it a tenant member.
/// Other namespaces are ignored. Both lists come back sorted and distinct.
pub fn compute_membership(
    user: &str,
    namespaces: &[Namespace],
    role_bindings: &[RoleBinding],
    cluster_role_bindings: &[ClusterRoleBinding],
) -> UserStatus {
    let scopes: HashMap<String, (&str, Option<&str>)> = namespaces
        .iter()
        .filter_map(|ns| {
            let labels = ns.metadata.labels.as_ref();
            let tenant = non_empty(labels, HNC_TENANT_LABEL)?;
            Some((ns.name_any(), (tenant, non_empty(labels, HNC_PROJECT_LABEL))))
        })
        .collect();

    let mut tenants = BTreeSet::new();
    let mut projects = BTreeSet::new();
    for rb in role_bindings {
        if !names_user(rb.subjects.as_ref(), user) {
            continue;
        }
        let Some((tenant, project)) = rb.namespace().and_then(|ns| scopes.get(&ns).copied())
        else {
            continue;
        };
        match project {
            Some(project) => {
                projects.insert(ProjectInfo {
                    project: project.to_string(),
                    tenant: tenant.to_string(),
                });
            }
            None => {
                tenants.insert(tenant.to_string());
            }
        }
    }

    let platform_admin = cluster_role_bindings.iter().any(|crb| {
        crb.role_ref.kind == "ClusterRole"
            && crb.role_ref.name == PLATFORM_ADMIN_ROLE
            && names_user(crb.subjects.as_ref(), user)
    });

    UserStatus {
        belong_tenants: tenants.into_iter().collect(),
        belong_project_infos: projects.into_iter().collect(),
        platform_admin,
        ..Default::default()
    }
}

/// Reconcile one User's memberships
pub async fn reconcile(user: Arc<User>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = user.name_any();
    debug!(user = %name, "reconciling user");

    let tenant_selector = ListParams::default().match_any().labels(HNC_TENANT_LABEL);
    let all = ListParams::default().match_any();
    let namespaces: Api<Namespace> = Api::all(ctx.client.clone());
    let role_bindings: Api<RoleBinding> = Api::all(ctx.client.clone());
    let cluster_role_bindings: Api<ClusterRoleBinding> = Api::all(ctx.client.clone());
    let (namespaces, role_bindings, cluster_role_bindings) = tokio::try_join!(
        namespaces.list(&tenant_selector),
        role_bindings.list(&all),
        cluster_role_bindings.list(&all),
    )?;

    let computed = compute_membership(
        &name,
        &namespaces.items,
        &role_bindings.items,
        &cluster_role_bindings.items,
    );

    let current = user.status.clone().unwrap_or_default();
    if current.same_membership(&computed) {
        debug!(user = %name, "memberships unchanged, skipping status update");
        return Ok(Action::requeue(RESYNC_INTERVAL));
    }

    let status = UserStatus {
        last_login_time: current.last_login_time,
        last_login_ip: current.last_login_ip,
        ..computed
    };
    let users: Api<User> = Api::all(ctx.client.clone());
    users
        .patch_status(
            &name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&serde_json::json!({ "status": status })),
        )
        .await?;

    info!(
        user = %name,
        tenants = status.belong_tenants.len(),
        projects = status.belong_project_infos.len(),
        "updated user memberships"
    );
    Ok(Action::requeue(RESYNC_INTERVAL))
}

/// Requeue a failed reconcile after a short delay
pub fn error_policy(user: Arc<User>, err: &Error, _ctx: Arc<Context>) -> Action {
    if err.is_retryable() {
        warn!(user = %user.name_any(), error = %err, "user reconcile failed, retrying");
    } else {
        error!(user = %user.name_any(), error = %err, "user reconcile failed");
    }
    Action::requeue(ERROR_REQUEUE)
}

/// Run the User controller until shutdown
///
/// Besides its own User watch, the controller is triggered by namespace
/// changes mapped to the users they concern.
pub async fn run_user_controller(client: Client) {
    let users: Api<User> = Api::all(client.clone());
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let watcher_config = || WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);

    let controller = Controller::new(users, watcher_config());
    let mapper = NamespaceMapper::new(Arc::new(controller.store()));
    let triggers = namespace_changes(namespaces, watcher_config())
        .flat_map(move |event| stream::iter(mapper.map(&event)));

    info!("- User controller");
    controller
        .reconcile_on(triggers)
        .shutdown_on_signal()
        .run(reconcile, error_policy, Arc::new(Context::new(client)))
        .for_each(|result| {
            match result {
                Ok(action) => debug!(?action, "User reconciliation completed"),
                Err(e) => error!(error = ?e, "User reconciliation error"),
            }
            std::future::ready(())
        })
        .await;
}
