use std::str::FromStr;

use async_trait::async_trait;
use keyward_application::{AccessRowFilter, PermissionQuery, PermissionStore};
use keyward_core::{AppError, AppResult, PolicyId, RoleId, UserId};
use keyward_domain::{AccessRow, Filter, Permission, PermissionAction, Policy};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

use crate::PermissionFixture;

/// PostgreSQL-backed store of policies, access rows and permissions.
#[derive(Clone)]
pub struct PostgresPermissionStore {
    pool: PgPool,
}

impl PostgresPermissionStore {
    /// Creates a store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Writes the fixture's policies, access rows and permissions in one transaction.
    ///
    /// Policies are upserted; access rows and permissions are appended.
    pub async fn import_fixture(&self, fixture: &PermissionFixture) -> AppResult<()> {
        let mut transaction = self
            .pool
            .begin()
            .await
            .map_err(|error| AppError::Store(format!("failed to begin transaction: {error}")))?;

        for row in &fixture.access {
            sqlx::query(
                r#"
                INSERT INTO keyward_policies (id, admin_access, app_access, ip_access)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (id) DO UPDATE
                SET admin_access = EXCLUDED.admin_access,
                    app_access = EXCLUDED.app_access,
                    ip_access = EXCLUDED.ip_access
                "#,
            )
            .bind(row.policy.id.as_uuid())
            .bind(row.policy.admin_access)
            .bind(row.policy.app_access)
            .bind(row.policy.ip_access.as_ref())
            .execute(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Store(format!("failed to save policy '{}': {error}", row.policy.id))
            })?;

            sqlx::query(
                r#"
                INSERT INTO keyward_access (policy_id, role_id, user_id, sort)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(row.policy.id.as_uuid())
            .bind(row.role.map(|role| role.as_uuid()))
            .bind(row.user.map(|user| user.as_uuid()))
            .bind(row.sort)
            .execute(&mut *transaction)
            .await
            .map_err(|error| AppError::Store(format!("failed to save access row: {error}")))?;
        }

        for permission in &fixture.permissions {
            sqlx::query(
                r#"
                INSERT INTO keyward_policies (id)
                VALUES ($1)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(permission.policy.as_uuid())
            .execute(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Store(format!(
                    "failed to save policy '{}': {error}",
                    permission.policy
                ))
            })?;

            sqlx::query(
                r#"
                INSERT INTO keyward_permissions
                    (policy_id, collection, action, rule, validation, presets, fields)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(permission.policy.as_uuid())
            .bind(permission.collection.as_str())
            .bind(permission.action.as_str())
            .bind(permission.rule.as_ref().map(Json))
            .bind(permission.validation.as_ref().map(Json))
            .bind(permission.presets.as_ref().map(Json))
            .bind(permission.fields.as_slice())
            .execute(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Store(format!(
                    "failed to save permission for '{}': {error}",
                    permission.collection
                ))
            })?;
        }

        transaction
            .commit()
            .await
            .map_err(|error| AppError::Store(format!("failed to commit fixture import: {error}")))?;

        debug!(
            access_rows = fixture.access.len(),
            permissions = fixture.permissions.len(),
            "imported permission fixture"
        );
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct AccessRecord {
    policy_id: Uuid,
    role_id: Option<Uuid>,
    user_id: Option<Uuid>,
    sort: Option<i32>,
    admin_access: bool,
    app_access: bool,
    ip_access: Option<Vec<String>>,
}

impl From<AccessRecord> for AccessRow {
    fn from(record: AccessRecord) -> Self {
        Self {
            policy: Policy {
                id: PolicyId::from_uuid(record.policy_id),
                admin_access: record.admin_access,
                app_access: record.app_access,
                ip_access: record.ip_access,
            },
            role: record.role_id.map(RoleId::from_uuid),
            user: record.user_id.map(UserId::from_uuid),
            sort: record.sort,
        }
    }
}

#[derive(Debug, FromRow)]
struct PermissionRecord {
    policy_id: Uuid,
    collection: String,
    action: String,
    rule: Option<Json<Value>>,
    validation: Option<Json<Value>>,
    presets: Option<Json<Map<String, Value>>>,
    fields: Vec<String>,
}

impl TryFrom<PermissionRecord> for Permission {
    type Error = AppError;

    fn try_from(record: PermissionRecord) -> Result<Self, Self::Error> {
        let action = PermissionAction::from_str(record.action.as_str()).map_err(|error| {
            AppError::Store(format!(
                "failed to decode permission action for '{}': {error}",
                record.collection
            ))
        })?;

        Ok(Self {
            policy: PolicyId::from_uuid(record.policy_id),
            collection: record.collection,
            action,
            rule: record.rule.map(|Json(rule)| Filter::new(rule)),
            validation: record.validation.map(|Json(validation)| Filter::new(validation)),
            presets: record.presets.map(|Json(presets)| presets),
            fields: record.fields,
        })
    }
}

#[async_trait]
impl PermissionStore for PostgresPermissionStore {
    async fn list_access_rows(&self, filter: &AccessRowFilter) -> AppResult<Vec<AccessRow>> {
        let roles: Vec<Uuid> = filter.roles.iter().map(|role| role.as_uuid()).collect();

        let records = sqlx::query_as::<_, AccessRecord>(
            r#"
            SELECT
                access.policy_id,
                access.role_id,
                access.user_id,
                access.sort,
                policies.admin_access,
                policies.app_access,
                policies.ip_access
            FROM keyward_access AS access
            INNER JOIN keyward_policies AS policies
                ON policies.id = access.policy_id
            WHERE (
                    cardinality($1::uuid[]) = 0
                    AND access.role_id IS NULL
                    AND access.user_id IS NULL
                )
                OR access.role_id = ANY($1)
                OR ($2::uuid IS NOT NULL AND access.user_id = $2)
            ORDER BY access.id
            "#,
        )
        .bind(roles)
        .bind(filter.user.map(|user| user.as_uuid()))
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Store(format!("failed to load access rows: {error}")))?;

        Ok(records.into_iter().map(AccessRow::from).collect())
    }

    async fn list_permissions(&self, query: &PermissionQuery) -> AppResult<Vec<Permission>> {
        let policies: Vec<Uuid> = query
            .policies
            .iter()
            .map(|policy| policy.as_uuid())
            .collect();

        let records = sqlx::query_as::<_, PermissionRecord>(
            r#"
            SELECT policy_id, collection, action, rule, validation, presets, fields
            FROM keyward_permissions
            WHERE policy_id = ANY($1)
                AND action = $2
                AND ($3::text[] IS NULL OR collection = ANY($3))
            ORDER BY id
            "#,
        )
        .bind(policies)
        .bind(query.action.as_str())
        .bind(query.collections.as_ref())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Store(format!("failed to load permissions: {error}")))?;

        records.into_iter().map(Permission::try_from).collect()
    }
}

#[cfg(test)]
mod tests;
