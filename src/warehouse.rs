use crate::error::Error;
use crate::storage::{ObjectPath, ObjectStore};
use bytes::Bytes;
use futures::{stream, StreamExt};
use gcp_bigquery_client::error::BQError;
use gcp_bigquery_client::model::job::Job;
use gcp_bigquery_client::model::table::Table;
use gcp_bigquery_client::yup_oauth2::ServiceAccountKey;
use gcp_bigquery_client::Client;
use log::{debug, info};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const JOB_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Fully qualified warehouse table: project, dataset and table id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableRef {
    pub fn new(project_id: &str, dataset_id: &str, table_id: &str) -> Self {
        TableRef {
            project_id: project_id.to_string(),
            dataset_id: dataset_id.to_string(),
            table_id: table_id.to_string(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

/// Table metadata as returned by a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub table: TableRef,
    pub num_rows: u64,
}

/// One column of a warehouse table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: &'static str,
    pub mode: &'static str,
}

impl FieldSchema {
    pub fn nullable(name: &str, field_type: &'static str) -> Self {
        FieldSchema {
            name: name.to_string(),
            field_type,
            mode: "NULLABLE",
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Warehouse: Send + Sync + 'static {
    /// Looks up a table. A missing table is reported as [`Error::TableNotFound`].
    async fn get_table(&self, table: &TableRef) -> Result<TableInfo, Error>;

    /// Deletes a table together with its rows and schema.
    async fn delete_table(&self, table: &TableRef) -> Result<(), Error>;

    /// Creates an empty table with the given schema.
    async fn create_table(&self, table: &TableRef, schema: &[FieldSchema]) -> Result<(), Error>;

    /// Appends CSV rows (with a header line) to an existing table.
    async fn append_csv(
        &self,
        table: &TableRef,
        schema: &[FieldSchema],
        csv: Bytes,
    ) -> Result<(), Error>;
}

/// BigQuery through `gcp-bigquery-client`. Appends run as CSV load jobs
/// reading from a staging object, one job per chunk.
pub struct BigQueryClient {
    client: Client,
    storage: Arc<dyn ObjectStore>,
    staging_bucket: String,
}

enum JobProgress {
    Running {
        job_id: String,
        location: Option<String>,
    },
    Done,
}

impl BigQueryClient {
    pub async fn connect(
        key: ServiceAccountKey,
        storage: Arc<dyn ObjectStore>,
        staging_bucket: &str,
    ) -> Result<Self, Error> {
        let client = Client::from_service_account_key(key, false).await?;

        Ok(BigQueryClient {
            client,
            storage,
            staging_bucket: staging_bucket.to_string(),
        })
    }

    async fn wait_for_job(&self, table: &TableRef, job: Job) -> Result<(), Error> {
        let mut job = job;

        loop {
            match job_progress(table, &job)? {
                JobProgress::Done => return Ok(()),
                JobProgress::Running { job_id, location } => {
                    debug!("load job {} into {} still running", job_id, table);
                    tokio::time::sleep(JOB_POLL_INTERVAL).await;
                    job = self
                        .client
                        .job()
                        .get_job(&table.project_id, &job_id, location.as_deref())
                        .await?;
                }
            }
        }
    }
}

/// Staging object each chunk is written to before its load job runs.
/// Chunks for one table are loaded one at a time, so the name is reused.
fn staging_object(bucket: &str, table: &TableRef) -> ObjectPath {
    ObjectPath::new(
        bucket,
        &format!("load-staging/{}.{}.csv", table.dataset_id, table.table_id),
    )
}

fn table_resource(table: &TableRef, schema: &[FieldSchema]) -> Result<Table, Error> {
    Ok(serde_json::from_value(json!({
        "tableReference": {
            "projectId": table.project_id,
            "datasetId": table.dataset_id,
            "tableId": table.table_id,
        },
        "schema": { "fields": schema },
    }))?)
}

fn load_job(table: &TableRef, schema: &[FieldSchema], source: &ObjectPath) -> Result<Job, Error> {
    Ok(serde_json::from_value(json!({
        "configuration": {
            "load": {
                "sourceUris": [source.to_string()],
                "destinationTable": {
                    "projectId": table.project_id,
                    "datasetId": table.dataset_id,
                    "tableId": table.table_id,
                },
                "schema": { "fields": schema },
                "sourceFormat": "CSV",
                "skipLeadingRows": 1,
                "allowQuotedNewlines": true,
                "writeDisposition": "WRITE_APPEND",
                "createDisposition": "CREATE_NEVER",
            }
        }
    }))?)
}

/// A 404 on a table call means the table is missing; anything else is passed through.
fn table_error(table: &TableRef, err: BQError) -> Error {
    match err {
        BQError::ResponseError { error } if error.error.code == 404 => Error::TableNotFound {
            table: table.to_string(),
        },
        other => Error::BigQuery(other),
    }
}

fn row_count(table: &TableRef, num_rows: Option<&str>) -> Result<u64, Error> {
    match num_rows {
        Some(rows) => rows.parse::<u64>().map_err(|_| Error::ApiResponse {
            service: "BigQuery",
            status: 200,
            body: format!("invalid numRows '{}' for {}", rows, table),
        }),
        None => Ok(0),
    }
}

fn job_progress(table: &TableRef, job: &Job) -> Result<JobProgress, Error> {
    let reference = job.job_reference.as_ref();
    let job_id = reference
        .and_then(|reference| reference.job_id.clone())
        .ok_or_else(|| Error::LoadJobFailed {
            job_id: "unknown".to_string(),
            table: table.to_string(),
            message: "job response had no job id".to_string(),
        })?;

    let status = job.status.as_ref();
    if status.and_then(|status| status.state.as_deref()) != Some("DONE") {
        return Ok(JobProgress::Running {
            job_id,
            location: reference.and_then(|reference| reference.location.clone()),
        });
    }

    match status.and_then(|status| status.error_result.as_ref()) {
        Some(error) => {
            let message = match (&error.reason, &error.message) {
                (Some(reason), Some(message)) => format!("{}: {}", reason, message),
                (None, Some(message)) => message.clone(),
                (Some(reason), None) => reason.clone(),
                (None, None) => "unknown error".to_string(),
            };
            Err(Error::LoadJobFailed {
                job_id,
                table: table.to_string(),
                message,
            })
        }
        None => Ok(JobProgress::Done),
    }
}

#[async_trait::async_trait]
impl Warehouse for BigQueryClient {
    async fn get_table(&self, table: &TableRef) -> Result<TableInfo, Error> {
        let found = self
            .client
            .table()
            .get(&table.project_id, &table.dataset_id, &table.table_id, None)
            .await
            .map_err(|err| table_error(table, err))?;

        Ok(TableInfo {
            table: table.clone(),
            num_rows: row_count(table, found.num_rows.as_deref())?,
        })
    }

    async fn delete_table(&self, table: &TableRef) -> Result<(), Error> {
        self.client
            .table()
            .delete(&table.project_id, &table.dataset_id, &table.table_id)
            .await
            .map_err(|err| table_error(table, err))?;

        info!("deleted table {}", table);
        Ok(())
    }

    async fn create_table(&self, table: &TableRef, schema: &[FieldSchema]) -> Result<(), Error> {
        self.client
            .table()
            .create(table_resource(table, schema)?)
            .await?;

        info!("created table {} with {} columns", table, schema.len());
        Ok(())
    }

    async fn append_csv(
        &self,
        table: &TableRef,
        schema: &[FieldSchema],
        csv: Bytes,
    ) -> Result<(), Error> {
        let staged = staging_object(&self.staging_bucket, table);
        let size = csv.len();
        self.storage
            .write_stream(&staged, stream::iter(vec![Ok(csv)]).boxed())
            .await?;

        let job = self
            .client
            .job()
            .insert(&table.project_id, load_job(table, schema, &staged)?)
            .await?;

        debug!("started load job from {} ({} bytes) into {}", staged, size, table);
        self.wait_for_job(table, job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcp_bigquery_client::error::{NestedResponseError, ResponseError};

    fn table() -> TableRef {
        TableRef::new("project", "ads", "table_01")
    }

    fn response_error(code: i64, status: &str) -> BQError {
        BQError::ResponseError {
            error: ResponseError {
                error: NestedResponseError {
                    code,
                    message: format!("{} for project:ads.table_01", status),
                    status: status.to_string(),
                    errors: vec![],
                },
            },
        }
    }

    fn job(value: serde_json::Value) -> Job {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_table_ref_display() {
        let table = TableRef::new("project", "dataset", "table_01");
        assert_eq!(table.to_string(), "project.dataset.table_01");
    }

    #[test]
    fn test_field_schema_serialization() {
        let field = FieldSchema::nullable("average_cpc", "FLOAT");
        assert_eq!(
            serde_json::to_value(&field).unwrap(),
            json!({ "name": "average_cpc", "type": "FLOAT", "mode": "NULLABLE" })
        );
    }

    #[test]
    fn test_not_found_maps_to_table_not_found() {
        let err = table_error(&table(), response_error(404, "NOT_FOUND"));
        assert!(matches!(
            err,
            Error::TableNotFound { table } if table == "project.ads.table_01"
        ));
    }

    #[test]
    fn test_other_response_errors_pass_through() {
        let err = table_error(&table(), response_error(403, "PERMISSION_DENIED"));
        assert!(matches!(
            err,
            Error::BigQuery(BQError::ResponseError { error }) if error.error.code == 403
        ));
    }

    #[test]
    fn test_row_count() {
        assert_eq!(row_count(&table(), Some("1200")).unwrap(), 1200);
        assert_eq!(row_count(&table(), None).unwrap(), 0);
        assert!(matches!(
            row_count(&table(), Some("many")),
            Err(Error::ApiResponse { service: "BigQuery", .. })
        ));
    }

    #[test]
    fn test_running_job_keeps_location() {
        let running = job(json!({
            "jobReference": { "projectId": "project", "jobId": "job_1", "location": "EU" },
            "status": { "state": "RUNNING" }
        }));

        match job_progress(&table(), &running).unwrap() {
            JobProgress::Running { job_id, location } => {
                assert_eq!(job_id, "job_1");
                assert_eq!(location.as_deref(), Some("EU"));
            }
            JobProgress::Done => panic!("job is still running"),
        }
    }

    #[test]
    fn test_done_job_without_error() {
        let done = job(json!({
            "jobReference": { "projectId": "project", "jobId": "job_1" },
            "status": { "state": "DONE" }
        }));

        assert!(matches!(
            job_progress(&table(), &done),
            Ok(JobProgress::Done)
        ));
    }

    #[test]
    fn test_done_job_with_error_result() {
        let failed = job(json!({
            "jobReference": { "projectId": "project", "jobId": "job_1" },
            "status": {
                "state": "DONE",
                "errorResult": { "reason": "invalid", "message": "Too many errors" }
            }
        }));

        assert!(matches!(
            job_progress(&table(), &failed),
            Err(Error::LoadJobFailed { job_id, table, message })
                if job_id == "job_1"
                    && table == "project.ads.table_01"
                    && message == "invalid: Too many errors"
        ));
    }

    #[test]
    fn test_job_without_reference() {
        let orphan = job(json!({ "status": { "state": "DONE" } }));
        assert!(matches!(
            job_progress(&table(), &orphan),
            Err(Error::LoadJobFailed { .. })
        ));
    }

    #[test]
    fn test_load_job_reads_staging_object() {
        let staged = staging_object("staging-bucket", &table());
        assert_eq!(
            staged.to_string(),
            "gs://staging-bucket/load-staging/ads.table_01.csv"
        );

        let schema = vec![
            FieldSchema::nullable("campaign", "STRING"),
            FieldSchema::nullable("clicks", "INTEGER"),
        ];
        let job = load_job(&table(), &schema, &staged).unwrap();
        let load = &serde_json::to_value(&job).unwrap()["configuration"]["load"];

        assert_eq!(
            load["sourceUris"],
            json!(["gs://staging-bucket/load-staging/ads.table_01.csv"])
        );
        assert_eq!(load["destinationTable"]["tableId"], "table_01");
        assert_eq!(load["sourceFormat"], "CSV");
        assert_eq!(load["writeDisposition"], "WRITE_APPEND");
        assert_eq!(load["schema"]["fields"][1]["name"], "clicks");
    }

    #[test]
    fn test_table_resource() {
        let schema = vec![FieldSchema::nullable("day", "DATE")];
        let resource = serde_json::to_value(table_resource(&table(), &schema).unwrap()).unwrap();

        assert_eq!(resource["tableReference"]["datasetId"], "ads");
        assert_eq!(resource["schema"]["fields"][0]["name"], "day");
        assert_eq!(resource["schema"]["fields"][0]["type"], "DATE");
    }
}
