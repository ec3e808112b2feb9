//! Board access checks against the external data service.
//!
//! A user may watch a board when they hold a role on it:
//! 1. an explicit `board_members` row
//! 2. otherwise the board's creator counts as `admin`
//! 3. otherwise a public board grants `viewer`

use async_trait::async_trait;
use frames::{ErrorCode, Role, Visibility};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("access check failed: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for AccessError {
    fn error_code(&self) -> &'static str {
        "E_ACCESS_CHECK_FAILED"
    }

    fn retryable(&self) -> bool {
        true
    }
}

#[async_trait]
pub trait BoardAccess: Send + Sync {
    /// The user's effective role on the board, or `None` when the board does
    /// not exist or grants the user nothing.
    async fn member_role(&self, user_id: Uuid, board_id: Uuid) -> Result<Option<Role>, AccessError>;
}

// =============================================================================
// POSTGRES
// =============================================================================

pub struct PgBoardAccess {
    pool: PgPool,
}

impl PgBoardAccess {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BoardAccess for PgBoardAccess {
    async fn member_role(&self, user_id: Uuid, board_id: Uuid) -> Result<Option<Role>, AccessError> {
        let row = sqlx::query_as::<_, (Option<String>, Option<Uuid>, Option<String>)>(
            "SELECT bm.role, b.created_by, b.visibility \
             FROM boards b \
             LEFT JOIN board_members bm ON bm.board_id = b.id AND bm.user_id = $2 \
             WHERE b.id = $1",
        )
        .bind(board_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|(member_role, created_by, visibility)| {
            effective_role(
                user_id,
                member_role.as_deref().and_then(parse_role),
                created_by,
                visibility.as_deref().and_then(parse_visibility).unwrap_or_default(),
            )
        }))
    }
}

// =============================================================================
// RULES
// =============================================================================

pub(crate) fn effective_role(
    user_id: Uuid,
    member_role: Option<Role>,
    created_by: Option<Uuid>,
    visibility: Visibility,
) -> Option<Role> {
    if member_role.is_some() {
        return member_role;
    }
    if created_by == Some(user_id) {
        return Some(Role::Admin);
    }
    (visibility == Visibility::Public).then_some(Role::Viewer)
}

fn parse_role(raw: &str) -> Option<Role> {
    serde_json::from_value(serde_json::Value::String(raw.to_ascii_lowercase())).ok()
}

fn parse_visibility(raw: &str) -> Option<Visibility> {
    serde_json::from_value(serde_json::Value::String(raw.to_ascii_lowercase())).ok()
}

#[cfg(test)]
#[path = "access_test.rs"]
mod tests;
