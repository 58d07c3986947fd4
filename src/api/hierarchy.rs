//! Organizational hierarchy endpoints.
//!
//! Read endpoints shape users and live hierarchy edges for the graph editor.
//! `POST /save` is a transactional full replace: every active edge is
//! deactivated, then the submitted set is inserted. An edge missing from the
//! payload therefore ends up deactivated; that destructive contract is what
//! the editor relies on.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::db::{
    notification_types, HierarchyEdge, HierarchyEdgeRow, HierarchyNode, HierarchyUserRow,
    NotificationType, UserSummary,
};
use crate::AppState;

use super::auth::AuthSession;
use super::entra::ListResponse;
use super::error::ApiError;

const USERS_SQL: &str = r#"
    SELECT u.id, u.jmeno, u.prijmeni, u.email, u.pozice,
           l.nazev AS lokalita, us.nazev AS usek
    FROM erdms_users u
    LEFT JOIN `25_lokality` l ON u.lokalita_id = l.id
    LEFT JOIN `25_useky` us ON u.usek_id = us.id
    WHERE u.aktivni = 1
    ORDER BY u.prijmeni, u.jmeno
"#;

/// Live edges only: active and currently inside the validity window
const LIVE_EDGES_SQL: &str = r#"
    SELECT * FROM `25_uzivatele_hierarchie` h
    WHERE h.aktivni = 1
      AND (h.dt_od IS NULL OR h.dt_od <= CURDATE())
      AND (h.dt_do IS NULL OR h.dt_do >= CURDATE())
"#;

/// GET /api/hierarchy/users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
) -> Result<Json<ListResponse<UserSummary>>, ApiError> {
    let rows: Vec<HierarchyUserRow> = sqlx::query_as(USERS_SQL).fetch_all(&state.db).await?;
    let users = rows.into_iter().map(UserSummary::from).collect();
    Ok(ListResponse::new(users))
}

#[derive(Debug, Serialize)]
pub struct LocationInfo {
    pub id: String,
    pub name: String,
    pub address: Option<String>,
    pub user_count: i64,
}

/// GET /api/hierarchy/locations
pub async fn list_locations(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
) -> Result<Json<ListResponse<LocationInfo>>, ApiError> {
    let rows: Vec<crate::db::LocationRow> = sqlx::query_as(
        r#"
        SELECT l.id, l.nazev, l.adresa, COUNT(u.id) AS user_count
        FROM `25_lokality` l
        LEFT JOIN erdms_users u ON u.lokalita_id = l.id AND u.aktivni = 1
        GROUP BY l.id, l.nazev, l.adresa
        ORDER BY l.nazev
        "#,
    )
    .fetch_all(&state.db)
    .await?;

    let locations = rows
        .into_iter()
        .map(|row| LocationInfo {
            id: row.id.to_string(),
            name: row.nazev,
            address: row.adresa,
            user_count: row.user_count,
        })
        .collect();
    Ok(ListResponse::new(locations))
}

#[derive(Debug, Serialize)]
pub struct DepartmentInfo {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub user_count: i64,
}

/// GET /api/hierarchy/departments
pub async fn list_departments(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
) -> Result<Json<ListResponse<DepartmentInfo>>, ApiError> {
    let rows: Vec<crate::db::DepartmentRow> = sqlx::query_as(
        r#"
        SELECT us.id, us.nazev, us.popis, COUNT(u.id) AS user_count
        FROM `25_useky` us
        LEFT JOIN erdms_users u ON u.usek_id = us.id AND u.aktivni = 1
        GROUP BY us.id, us.nazev, us.popis
        ORDER BY us.nazev
        "#,
    )
    .fetch_all(&state.db)
    .await?;

    let departments = rows
        .into_iter()
        .map(|row| DepartmentInfo {
            id: row.id.to_string(),
            name: row.nazev,
            description: row.popis,
            user_count: row.user_count,
        })
        .collect();
    Ok(ListResponse::new(departments))
}

#[derive(Debug, Serialize)]
pub struct StructureData {
    pub nodes: Vec<HierarchyNode>,
    pub edges: Vec<HierarchyEdge>,
}

#[derive(Debug, Serialize)]
pub struct StructureCounts {
    pub users: usize,
    pub relationships: usize,
}

#[derive(Debug, Serialize)]
pub struct StructureResponse {
    pub success: bool,
    pub data: StructureData,
    pub counts: StructureCounts,
}

/// GET /api/hierarchy/structure
pub async fn get_structure(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
) -> Result<Json<StructureResponse>, ApiError> {
    let user_rows: Vec<HierarchyUserRow> =
        sqlx::query_as(USERS_SQL).fetch_all(&state.db).await?;
    let edge_rows: Vec<HierarchyEdgeRow> =
        sqlx::query_as(LIVE_EDGES_SQL).fetch_all(&state.db).await?;

    let nodes: Vec<HierarchyNode> = user_rows.into_iter().map(HierarchyNode::from).collect();
    let edges: Vec<HierarchyEdge> = edge_rows.into_iter().map(HierarchyEdge::from).collect();

    Ok(Json(StructureResponse {
        counts: StructureCounts {
            users: nodes.len(),
            relationships: edges.len(),
        },
        data: StructureData { nodes, edges },
        success: true,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SaveHierarchyRequest {
    /// Node positions are kept client-side; the payload is accepted but only
    /// the edge set is persisted.
    #[serde(default)]
    #[allow(dead_code)]
    pub nodes: Vec<serde_json::Value>,
    #[serde(default)]
    pub edges: Vec<HierarchyEdge>,
}

#[derive(Debug, Serialize)]
pub struct SavedCounts {
    pub relationships: usize,
}

#[derive(Debug, Serialize)]
pub struct SaveResponse {
    pub success: bool,
    pub message: String,
    pub saved: SavedCounts,
}

/// POST /api/hierarchy/save (admin only)
///
/// Full replace inside one transaction; rolls back on any failure.
pub async fn save_structure(
    State(state): State<Arc<AppState>>,
    auth: AuthSession,
    Json(request): Json<SaveHierarchyRequest>,
) -> Result<Json<SaveResponse>, ApiError> {
    auth.require_admin()?;

    // Validate endpoints before touching the database
    let mut prepared = Vec::with_capacity(request.edges.len());
    for edge in &request.edges {
        let (supervisor_id, subordinate_id) = edge.endpoints().ok_or_else(|| {
            ApiError::validation_field(
                "edges",
                format!(
                    "Edge {} -> {} does not reference numeric user ids",
                    edge.source, edge.target
                ),
            )
        })?;
        prepared.push((supervisor_id, subordinate_id, edge));
    }

    let mut tx = state.db.begin().await?;

    sqlx::query(
        r#"
        UPDATE `25_uzivatele_hierarchie`
        SET aktivni = 0, upravil_user_id = ?, dt_upraveno = NOW()
        WHERE aktivni = 1
        "#,
    )
    .bind(auth.user.id)
    .execute(&mut *tx)
    .await?;

    for (supervisor_id, subordinate_id, edge) in &prepared {
        let permissions = &edge.permissions;
        let types_json = serde_json::to_string(&permissions.notifications.types)
            .map_err(|e| ApiError::internal(e.to_string()))?;
        let locations_json = serde_json::to_string(&permissions.extended.locations)
            .map_err(|e| ApiError::internal(e.to_string()))?;
        let departments_json = serde_json::to_string(&permissions.extended.departments)
            .map_err(|e| ApiError::internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO `25_uzivatele_hierarchie` (
                nadrizeny_id, podrizeny_id, typ_vztahu, uroven_opravneni,
                viditelnost_objednavky, viditelnost_faktury, viditelnost_smlouvy,
                viditelnost_pokladna, viditelnost_uzivatele, viditelnost_lp,
                notifikace_email, notifikace_inapp, notifikace_typy,
                rozsirene_lokality, rozsirene_useky,
                dt_od, dt_do, aktivni, upravil_user_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
            "#,
        )
        .bind(supervisor_id)
        .bind(subordinate_id)
        .bind(&edge.edge_type)
        .bind(permissions.level)
        .bind(permissions.visibility.objednavky)
        .bind(permissions.visibility.faktury)
        .bind(permissions.visibility.smlouvy)
        .bind(permissions.visibility.pokladna)
        .bind(permissions.visibility.uzivatele)
        .bind(permissions.visibility.lp)
        .bind(permissions.notifications.email)
        .bind(permissions.notifications.inapp)
        .bind(&types_json)
        .bind(&locations_json)
        .bind(&departments_json)
        .bind(edge.validity.from)
        .bind(edge.validity.to)
        .bind(auth.user.id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    info!(
        user = %auth.user.username,
        relationships = prepared.len(),
        "Hierarchy saved"
    );

    Ok(Json(SaveResponse {
        success: true,
        message: "Hierarchy saved".to_string(),
        saved: SavedCounts {
            relationships: prepared.len(),
        },
    }))
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

/// DELETE /api/hierarchy/relationship/:supervisor_id/:subordinate_id (admin only)
pub async fn delete_relationship(
    State(state): State<Arc<AppState>>,
    auth: AuthSession,
    Path((supervisor_id, subordinate_id)): Path<(u32, u32)>,
) -> Result<Json<DeleteResponse>, ApiError> {
    auth.require_admin()?;

    let result = sqlx::query(
        r#"
        UPDATE `25_uzivatele_hierarchie`
        SET aktivni = 0, upravil_user_id = ?, dt_upraveno = NOW()
        WHERE nadrizeny_id = ? AND podrizeny_id = ? AND aktivni = 1
        "#,
    )
    .bind(auth.user.id)
    .bind(supervisor_id)
    .bind(subordinate_id)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Relationship not found"));
    }

    info!(
        supervisor_id = supervisor_id,
        subordinate_id = subordinate_id,
        "Hierarchy relationship removed"
    );

    Ok(Json(DeleteResponse {
        success: true,
        message: "Relationship removed".to_string(),
    }))
}

/// GET /api/hierarchy/notification-types
pub async fn list_notification_types(
    _auth: AuthSession,
) -> Json<ListResponse<NotificationType>> {
    ListResponse::new(notification_types())
}
