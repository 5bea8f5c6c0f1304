//! Ownership fields of inventory records, as far as authorization needs them.

use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterKind {
    Cluster,
    /// Day-2 record for hosts joining an installed cluster.
    AddHostsCluster,
}

impl ClusterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterKind::Cluster => "Cluster",
            ClusterKind::AddHostsCluster => "AddHostsCluster",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ClusterOwnership {
    pub id: String,
    pub user_name: String,
    pub org_id: String,
    pub ams_subscription_id: Option<String>,
    pub kind: String,
    pub openshift_cluster_id: Option<String>,
}

impl ClusterOwnership {
    pub fn kind(&self) -> ClusterKind {
        if self.kind == ClusterKind::AddHostsCluster.as_str() {
            ClusterKind::AddHostsCluster
        } else {
            ClusterKind::Cluster
        }
    }

    pub fn is_day2(&self) -> bool {
        self.kind() == ClusterKind::AddHostsCluster
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct InfraEnvOwnership {
    pub id: String,
    pub user_name: String,
    pub org_id: String,
    pub cluster_id: Option<String>,
    /// Per-infra-env secret that signs image download tokens.
    #[serde(skip)]
    pub image_token_key: Option<String>,
}

impl InfraEnvOwnership {
    pub fn bound_cluster(&self) -> Option<&str> {
        self.cluster_id.as_deref().filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct HostOwnership {
    pub id: String,
    pub infra_env_id: String,
    pub cluster_id: Option<String>,
}

impl HostOwnership {
    pub fn bound_cluster(&self) -> Option<&str> {
        self.cluster_id.as_deref().filter(|id| !id.is_empty())
    }
}
