//! Namespace-driven User reconciliation

mod mapper;
pub mod user;

pub use mapper::{
    is_eligible, namespace_changes, related_users, tenant_and_project, ChangeEvent,
    NamespaceMapper, NamespaceTracker, UserLister,
};
pub use user::{compute_membership, run_user_controller};
