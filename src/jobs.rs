use crate::entities;
use crate::errors::GatehouseError;
use crate::rbac::Gatehouse;
use crate::storage::now_millis;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, DatabaseConnection, EntityTrait,
    IntoActiveModel, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

pub const RECONCILE_AUDIT_TRAIL: &str = "reconcile_audit_trail";

/// Initialize and start the job scheduler with all background tasks
pub async fn init_scheduler(
    gatehouse: Gatehouse,
    reconcile_schedule: &str,
) -> Result<JobScheduler, GatehouseError> {
    let sched = JobScheduler::new()
        .await
        .map_err(|e| GatehouseError::Other(format!("Failed to create job scheduler: {}", e)))?;

    let reconcile_job = Job::new_async(reconcile_schedule, move |_uuid, _l| {
        let gatehouse = gatehouse.clone();
        Box::pin(async move {
            info!("Running {} job", RECONCILE_AUDIT_TRAIL);
            if let Err(e) = run_job(&gatehouse, RECONCILE_AUDIT_TRAIL).await {
                error!("Failed to record {} run: {}", RECONCILE_AUDIT_TRAIL, e);
            }
        })
    })
    .map_err(|e| GatehouseError::Other(format!("Failed to create reconcile job: {}", e)))?;

    sched
        .add(reconcile_job)
        .await
        .map_err(|e| GatehouseError::Other(format!("Failed to add reconcile job: {}", e)))?;

    sched
        .start()
        .await
        .map_err(|e| GatehouseError::Other(format!("Failed to start job scheduler: {}", e)))?;

    info!(schedule = reconcile_schedule, "Job scheduler started with {} jobs", 1);

    Ok(sched)
}

/// Run a job by name and record the execution. The returned row reflects
/// the outcome; only bookkeeping failures are errors.
async fn run_job(
    gatehouse: &Gatehouse,
    job_name: &str,
) -> Result<entities::job_execution::Model, GatehouseError> {
    let db = gatehouse.db();
    let execution_id;

    let result = match job_name {
        RECONCILE_AUDIT_TRAIL => {
            execution_id = start_job_execution(db, job_name).await?;
            gatehouse
                .reconcile()
                .await
                .map(|report| report.records_checked() as i64)
        }
        _ => {
            return Err(GatehouseError::Other(format!("Unknown job name: {}", job_name)));
        }
    };

    match result {
        Ok(count) => {
            info!("Job {} completed: {} records", job_name, count);
            complete_job_execution(db, execution_id, true, None, Some(count)).await
        }
        Err(e) => {
            error!("Job {} failed: {}", job_name, e);
            complete_job_execution(db, execution_id, false, Some(e.to_string()), None).await
        }
    }
}

/// Record the start of a job execution
pub async fn start_job_execution(
    db: &DatabaseConnection,
    job_name: &str,
) -> Result<i64, GatehouseError> {
    use entities::job_execution;

    let execution = job_execution::ActiveModel {
        id: NotSet,
        job_name: Set(job_name.to_string()),
        started_at: Set(now_millis()),
        completed_at: Set(None),
        success: Set(None),
        error_message: Set(None),
        records_processed: Set(None),
    };

    let result = execution.insert(db).await?;
    Ok(result.id)
}

/// Record the completion of a job execution
pub async fn complete_job_execution(
    db: &DatabaseConnection,
    execution_id: i64,
    success: bool,
    error_message: Option<String>,
    records_processed: Option<i64>,
) -> Result<entities::job_execution::Model, GatehouseError> {
    use entities::job_execution::{Column, Entity};

    let execution = Entity::find()
        .filter(Column::Id.eq(execution_id))
        .one(db)
        .await?
        .ok_or_else(|| {
            GatehouseError::Other(format!("Job execution {} disappeared", execution_id))
        })?;

    let mut active: entities::job_execution::ActiveModel = execution.into_active_model();
    active.completed_at = Set(Some(now_millis()));
    active.success = Set(Some(if success { 1 } else { 0 }));
    active.error_message = Set(error_message);
    active.records_processed = Set(records_processed);
    Ok(active.update(db).await?)
}

/// Manually trigger a job by name (admin API)
pub async fn trigger_job_manually(
    gatehouse: &Gatehouse,
    job_name: &str,
) -> Result<JobLog, GatehouseError> {
    info!("Manually triggering job: {}", job_name);
    Ok(run_job(gatehouse, job_name).await?.into())
}

/// Information about an available job
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub name: &'static str,
    pub description: &'static str,
}

/// Get list of available jobs that can be triggered
pub fn available_jobs() -> Vec<JobInfo> {
    vec![JobInfo {
        name: RECONCILE_AUDIT_TRAIL,
        description: "Verify every grant and assignment against the audit trail",
    }]
}

/// Job log entry
#[derive(Debug, Clone, Serialize)]
pub struct JobLog {
    pub id: i64,
    pub job_name: String,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub success: Option<bool>,
    pub error_message: Option<String>,
    pub records_processed: Option<i64>,
}

impl From<entities::job_execution::Model> for JobLog {
    fn from(model: entities::job_execution::Model) -> Self {
        Self {
            id: model.id,
            job_name: model.job_name,
            started_at: model.started_at,
            completed_at: model.completed_at,
            success: model.success.map(|s| s == 1),
            error_message: model.error_message,
            records_processed: model.records_processed,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobLogQuery {
    /// Filter by job name
    pub job_name: Option<String>,
    #[serde(default = "default_job_limit")]
    pub limit: u64,
    /// Only show failed jobs
    #[serde(default)]
    pub only_failures: bool,
}

fn default_job_limit() -> u64 {
    100
}

impl Default for JobLogQuery {
    fn default() -> Self {
        Self {
            job_name: None,
            limit: default_job_limit(),
            only_failures: false,
        }
    }
}

/// Recent job executions, most recent first
pub async fn list_job_executions(
    db: &DatabaseConnection,
    query: &JobLogQuery,
) -> Result<Vec<JobLog>, GatehouseError> {
    use entities::job_execution::{Column, Entity};

    let mut select = Entity::find();
    if let Some(name) = &query.job_name {
        select = select.filter(Column::JobName.eq(name.as_str()));
    }
    if query.only_failures {
        select = select.filter(Column::Success.eq(0));
    }

    let rows = select
        .order_by_desc(Column::StartedAt)
        .order_by_desc(Column::Id)
        .limit(query.limit.clamp(1, 1000))
        .all(db)
        .await?;
    Ok(rows.into_iter().map(JobLog::from).collect())
}
