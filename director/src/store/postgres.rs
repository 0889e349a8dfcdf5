//! Postgres-backed store.

use armada_id::{DeploymentId, InstanceId, VmId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;

use crate::models::{NewVmRecord, VmRecord};

use super::{DirectorStore, StoreError};

/// Schema owned by the provisioning core.
///
/// The `instances` table is shared with the wider system; only the
/// columns the core writes are declared here.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS vms (
    id            TEXT PRIMARY KEY,
    cid           TEXT NOT NULL UNIQUE,
    agent_id      TEXT NOT NULL UNIQUE,
    deployment_id TEXT NOT NULL,
    env           JSONB NOT NULL,
    credentials   JSONB,
    created_at    TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS instances (
    id                   TEXT PRIMARY KEY,
    vm_id                TEXT REFERENCES vms (id),
    apply_spec           JSONB,
    cloud_properties     JSONB,
    trusted_certs_sha256 TEXT
);

CREATE INDEX IF NOT EXISTS vms_deployment_idx ON vms (deployment_id);
"#;

/// [`DirectorStore`] over a Postgres pool.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the core's schema (idempotent).
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct VmRow {
    id: String,
    cid: String,
    agent_id: String,
    deployment_id: String,
    env: Value,
    credentials: Option<Value>,
    created_at: DateTime<Utc>,
}

impl VmRow {
    fn into_record(self) -> Result<VmRecord, StoreError> {
        let corrupt = |e: String| StoreError::Database(format!("corrupt vm row: {e}"));

        let credentials = match self.credentials {
            Some(raw) => Some(serde_json::from_value(raw).map_err(|e| corrupt(e.to_string()))?),
            None => None,
        };

        Ok(VmRecord {
            id: self.id.parse().map_err(|e: armada_id::IdError| corrupt(e.to_string()))?,
            cid: self.cid,
            agent_id: self
                .agent_id
                .parse()
                .map_err(|e: armada_id::IdError| corrupt(e.to_string()))?,
            deployment_id: self
                .deployment_id
                .parse()
                .map_err(|e: armada_id::IdError| corrupt(e.to_string()))?,
            env: self.env,
            credentials,
            created_at: self.created_at,
        })
    }
}

const SELECT_VM: &str =
    "SELECT id, cid, agent_id, deployment_id, env, credentials, created_at FROM vms";

#[async_trait]
impl DirectorStore for PgStore {
    async fn insert_vm(&self, vm: NewVmRecord) -> Result<VmRecord, StoreError> {
        if vm.cid.is_empty() {
            return Err(StoreError::Conflict("vm cid must not be empty".to_string()));
        }

        let record = VmRecord {
            id: VmId::new(),
            cid: vm.cid,
            agent_id: vm.agent_id,
            deployment_id: vm.deployment_id,
            env: vm.env,
            credentials: vm.credentials,
            created_at: Utc::now(),
        };

        let credentials = record
            .credentials
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StoreError::Database(e.to_string()))?;

        sqlx::query(
            "INSERT INTO vms (id, cid, agent_id, deployment_id, env, credentials, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.id.to_string())
        .bind(&record.cid)
        .bind(record.agent_id.to_string())
        .bind(record.deployment_id.to_string())
        .bind(&record.env)
        .bind(credentials)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StoreError::Conflict(db.to_string())
            }
            other => other.into(),
        })?;

        Ok(record)
    }

    async fn delete_vm(&self, id: VmId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM vms WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn find_vm(&self, id: VmId) -> Result<VmRecord, StoreError> {
        let row: Option<VmRow> = sqlx::query_as(&format!("{SELECT_VM} WHERE id = $1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| StoreError::NotFound(id.to_string()))?
            .into_record()
    }

    async fn find_vm_by_cid(&self, cid: &str) -> Result<Option<VmRecord>, StoreError> {
        let row: Option<VmRow> = sqlx::query_as(&format!("{SELECT_VM} WHERE cid = $1"))
            .bind(cid)
            .fetch_optional(&self.pool)
            .await?;

        row.map(VmRow::into_record).transpose()
    }

    async fn vms_for_deployment(
        &self,
        deployment: DeploymentId,
    ) -> Result<Vec<VmRecord>, StoreError> {
        let rows: Vec<VmRow> = sqlx::query_as(&format!("{SELECT_VM} WHERE deployment_id = $1"))
            .bind(deployment.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(VmRow::into_record).collect()
    }

    async fn bind_instance_vm(
        &self,
        instance: InstanceId,
        vm: Option<VmId>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO instances (id, vm_id) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET vm_id = EXCLUDED.vm_id",
        )
        .bind(instance.to_string())
        .bind(vm.map(|id| id.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_instance_apply_spec(
        &self,
        instance: InstanceId,
        spec: &Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO instances (id, apply_spec) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET apply_spec = EXCLUDED.apply_spec",
        )
        .bind(instance.to_string())
        .bind(spec)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_instance_cloud_properties(
        &self,
        instance: InstanceId,
        properties: &Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO instances (id, cloud_properties) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET cloud_properties = EXCLUDED.cloud_properties",
        )
        .bind(instance.to_string())
        .bind(properties)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_instance_trusted_certs(
        &self,
        instance: InstanceId,
        digest: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO instances (id, trusted_certs_sha256) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET trusted_certs_sha256 = EXCLUDED.trusted_certs_sha256",
        )
        .bind(instance.to_string())
        .bind(digest)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
