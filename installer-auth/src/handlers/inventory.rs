//! Read-only views of inventory ownership, gated per request.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

use crate::AppState;
use crate::middleware::AuthPrincipal;
use crate::models::{ClusterOwnership, HostOwnership, InfraEnvOwnership};
use crate::services::{Action, EntityRef};

#[derive(Debug, Deserialize)]
pub struct ListClustersQuery {
    /// Narrows the listing to clusters created by this user.
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Permissions {
    pub read: bool,
    pub update: bool,
    pub delete: bool,
}

#[derive(Debug, Serialize)]
pub struct FeatureGate {
    pub capability: String,
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct ImageAccess {
    pub infra_env_id: String,
    pub authorized: bool,
}

pub async fn list_clusters(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Query(query): Query<ListClustersQuery>,
) -> Result<Json<Vec<ClusterOwnership>>, AppError> {
    let owner = query.owner.unwrap_or_default();
    let filter = state.authorizer.owned_by_user(&principal, &owner);
    let clusters = state.entities.list_clusters(&filter).await?;
    Ok(Json(clusters))
}

pub async fn get_cluster(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
) -> Result<Json<ClusterOwnership>, AppError> {
    state
        .entities
        .find_cluster(&cluster_id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found("cluster", &cluster_id))
}

/// What the caller may do with one cluster.
pub async fn cluster_permissions(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(cluster_id): Path<String>,
) -> Result<Json<Permissions>, AppError> {
    let entity = EntityRef::Cluster(cluster_id);
    let authorizer = &state.authorizer;

    Ok(Json(Permissions {
        read: authorizer.has_access_to(&principal, &entity, Action::Read).await?,
        update: authorizer.has_access_to(&principal, &entity, Action::Update).await?,
        delete: authorizer.has_access_to(&principal, &entity, Action::Delete).await?,
    }))
}

pub async fn get_infra_env(
    State(state): State<AppState>,
    Path(infra_env_id): Path<String>,
) -> Result<Json<InfraEnvOwnership>, AppError> {
    state
        .entities
        .find_infra_env(&infra_env_id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found("infra env", &infra_env_id))
}

pub async fn get_host(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path((infra_env_id, host_id)): Path<(String, String)>,
) -> Result<Json<HostOwnership>, AppError> {
    let entity = EntityRef::Host(host_id.clone());
    if !state
        .authorizer
        .has_access_to(&principal, &entity, Action::Read)
        .await?
    {
        return Err(not_found("host", &host_id));
    }

    state
        .entities
        .find_host(&host_id)
        .await?
        .filter(|host| host.infra_env_id == infra_env_id)
        .map(Json)
        .ok_or_else(|| not_found("host", &host_id))
}

/// Confirms an image token is valid for the infra env in the path.
pub async fn image_access(
    AuthPrincipal(principal): AuthPrincipal,
    Path(infra_env_id): Path<String>,
) -> Json<ImageAccess> {
    Json(ImageAccess {
        infra_env_id,
        authorized: principal.is_authorized,
    })
}

pub async fn feature_gate(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(capability): Path<String>,
) -> Result<Json<FeatureGate>, AppError> {
    let enabled = state
        .authorizer
        .has_org_based_capability(&principal, &capability)
        .await?;
    Ok(Json(FeatureGate {
        capability,
        enabled,
    }))
}

fn not_found(kind: &str, id: &str) -> AppError {
    AppError::NotFound(anyhow::anyhow!("{} {} not found", kind, id))
}
