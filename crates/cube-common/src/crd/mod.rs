//! Custom Resource Definitions used by the fleet control plane

mod cluster;
mod subnamespace;
mod user;

pub use cluster::{decode_base64_text, Cluster, ClusterSpec, ClusterState, ClusterStatus};
pub use subnamespace::{
    MetaKeyValue, SubnamespaceAnchor, SubnamespaceAnchorSpec, SubnamespaceAnchorStatus,
};
pub use user::{LoginType, ProjectInfo, User, UserSpec, UserState, UserStatus};
