//! In-memory stand-ins for the three external services, used by the
//! pipeline and server tests.

use crate::api_client::{AdsApi, DownloadOptions, ReportQuery};
use crate::error::Error;
use crate::storage::{ByteStream, ObjectPath, ObjectStore};
use crate::warehouse::{FieldSchema, TableInfo, TableRef, Warehouse};
use bytes::Bytes;
use futures::{stream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Default)]
pub struct InMemoryStore {
    objects: Mutex<HashMap<ObjectPath, Bytes>>,
}

impl InMemoryStore {
    pub fn object_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .map(|path| path.to_string())
            .collect();
        names.sort();
        names
    }
}

#[async_trait::async_trait]
impl ObjectStore for InMemoryStore {
    async fn write_stream(&self, path: &ObjectPath, body: ByteStream) -> Result<(), Error> {
        // Whatever arrived before a failed chunk stays written.
        let mut body = body;
        let mut written = Vec::new();
        let mut outcome = Ok(());
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(chunk) => written.extend_from_slice(&chunk),
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            }
        }

        self.objects
            .lock()
            .unwrap()
            .insert(path.clone(), Bytes::from(written));
        outcome
    }

    async fn read(&self, path: &ObjectPath) -> Result<Bytes, Error> {
        self.objects
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::ApiResponse {
                service: "Cloud Storage",
                status: 404,
                body: format!("No such object: {}", path),
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FakeTable {
    pub schema: Vec<FieldSchema>,
    pub rows: u64,
    pub appends: usize,
}

#[derive(Default)]
pub struct InMemoryWarehouse {
    tables: Mutex<HashMap<TableRef, FakeTable>>,
    deleted: Mutex<Vec<TableRef>>,
    failing_appends: Mutex<Vec<TableRef>>,
}

impl InMemoryWarehouse {
    pub fn with_table(self, table: &TableRef, rows: u64) -> Self {
        self.tables.lock().unwrap().insert(
            table.clone(),
            FakeTable {
                schema: vec![FieldSchema::nullable("legacy", "STRING")],
                rows,
                appends: 0,
            },
        );
        self
    }

    /// Makes every append into `table` fail.
    pub fn failing_appends_to(self, table: &TableRef) -> Self {
        self.failing_appends.lock().unwrap().push(table.clone());
        self
    }

    pub fn table(&self, table: &TableRef) -> Option<FakeTable> {
        self.tables.lock().unwrap().get(table).cloned()
    }

    pub fn deleted(&self) -> Vec<TableRef> {
        self.deleted.lock().unwrap().clone()
    }
}

fn not_found(table: &TableRef) -> Error {
    Error::TableNotFound {
        table: table.to_string(),
    }
}

#[async_trait::async_trait]
impl Warehouse for InMemoryWarehouse {
    async fn get_table(&self, table: &TableRef) -> Result<TableInfo, Error> {
        let tables = self.tables.lock().unwrap();
        let found = tables.get(table).ok_or_else(|| not_found(table))?;
        Ok(TableInfo {
            table: table.clone(),
            num_rows: found.rows,
        })
    }

    async fn delete_table(&self, table: &TableRef) -> Result<(), Error> {
        self.tables
            .lock()
            .unwrap()
            .remove(table)
            .ok_or_else(|| not_found(table))?;
        self.deleted.lock().unwrap().push(table.clone());
        Ok(())
    }

    async fn create_table(&self, table: &TableRef, schema: &[FieldSchema]) -> Result<(), Error> {
        let mut tables = self.tables.lock().unwrap();
        if tables.contains_key(table) {
            return Err(Error::ApiResponse {
                service: "BigQuery",
                status: 409,
                body: format!("Already Exists: Table {}", table),
            });
        }
        tables.insert(
            table.clone(),
            FakeTable {
                schema: schema.to_vec(),
                rows: 0,
                appends: 0,
            },
        );
        Ok(())
    }

    async fn append_csv(
        &self,
        table: &TableRef,
        _schema: &[FieldSchema],
        csv: Bytes,
    ) -> Result<(), Error> {
        if self.failing_appends.lock().unwrap().contains(table) {
            return Err(Error::LoadJobFailed {
                job_id: "job_fake".to_string(),
                table: table.to_string(),
                message: "invalid: Too many errors".to_string(),
            });
        }

        // Header line excluded; test reports carry no quoted newlines.
        let rows = csv
            .split(|byte| *byte == b'\n')
            .filter(|line| !line.is_empty())
            .count()
            .saturating_sub(1) as u64;

        let mut tables = self.tables.lock().unwrap();
        let target = tables.get_mut(table).ok_or_else(|| not_found(table))?;
        target.rows += rows;
        target.appends += 1;
        Ok(())
    }
}

/// Serves queued report bodies in request order and records each request.
#[derive(Default)]
pub struct FakeAds {
    responses: Mutex<VecDeque<Result<Bytes, Error>>>,
    requests: Mutex<Vec<(ReportQuery, DownloadOptions)>>,
}

impl FakeAds {
    pub fn with_report(self, csv: Bytes) -> Self {
        self.responses.lock().unwrap().push_back(Ok(csv));
        self
    }

    pub fn with_failure(self, error: Error) -> Self {
        self.responses.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn requests(&self) -> Vec<(ReportQuery, DownloadOptions)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AdsApi for FakeAds {
    async fn download_report(
        &self,
        query: &ReportQuery,
        options: &DownloadOptions,
    ) -> Result<ByteStream, Error> {
        self.requests
            .lock()
            .unwrap()
            .push((query.clone(), *options));

        let csv = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(Error::NoData {
                    message: "no report queued".to_string(),
                })
            })?;

        // Split the body so consumers see more than one chunk.
        let middle = csv.len() / 2;
        let chunks = vec![Ok(csv.slice(..middle)), Ok(csv.slice(middle..))];
        Ok(stream::iter(chunks).boxed())
    }
}

/// A report CSV with a display-name header and `rows` data rows.
pub fn report_csv(rows: usize) -> Bytes {
    let mut csv = String::from("Campaign,Offer ID,Impressions,Clicks,Avg. CPC,Cost (USD),Day\n");
    for row in 0..rows {
        csv.push_str(&format!(
            "Campaign {},sku-{},{},{},0.{},{}.5,2024-01-0{}\n",
            row % 3,
            row,
            100 + row,
            row % 7,
            row % 9 + 1,
            row % 11,
            row % 7 + 1
        ));
    }
    Bytes::from(csv)
}
