use crate::api_client::{AdWordsClient, AdsApi, DateRange, ReportQuery};
use crate::auth::service_account_key;
use crate::config::Config;
use crate::deadline::with_timeout;
use crate::error::Error;
use crate::report::{conversion_query, fetch_report, performance_query};
use crate::storage::{GcsStore, ObjectPath, ObjectStore};
use crate::table_cleaner::remove_table;
use crate::warehouse::{BigQueryClient, TableRef, Warehouse};
use crate::warehouse_loader::CsvWarehouseLoader;
use log::{error, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// One report's path through the pipeline: query, staged object, table.
struct ReportStream {
    label: &'static str,
    query: ReportQuery,
    staged: ObjectPath,
    table: TableRef,
}

/// Row counts of both destination tables after a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub rows_01: u64,
    pub rows_02: u64,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Loaded for table 01 {} rows.\nLoaded for table 02 {} rows",
            self.rows_01, self.rows_02
        )
    }
}

/// Drop, fetch and load for both shopping reports.
///
/// A run is two-phase: the destination tables are dropped first, then each is
/// reloaded or the run fails. Nothing is rolled back, so a failed run can
/// leave dropped tables absent until the next successful run; the error says
/// which step failed and which dropped tables had not been reloaded yet.
pub struct Pipeline {
    storage: Arc<dyn ObjectStore>,
    warehouse: Arc<dyn Warehouse>,
    ads: Arc<dyn AdsApi>,
    loader: CsvWarehouseLoader,
    streams: [ReportStream; 2],
    remove_existing_tables: bool,
    call_timeout: Duration,
    run_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        storage: Arc<dyn ObjectStore>,
        warehouse: Arc<dyn Warehouse>,
        ads: Arc<dyn AdsApi>,
    ) -> Self {
        let during = DateRange::from_config(config);
        let table =
            |table_id: &str| TableRef::new(&config.project_id, &config.dataset_id, table_id);

        let streams = [
            ReportStream {
                label: "01",
                query: performance_query(during),
                staged: ObjectPath::new(&config.bucket, &config.object_name_01),
                table: table(&config.table_id_01),
            },
            ReportStream {
                label: "02",
                query: conversion_query(during),
                staged: ObjectPath::new(&config.bucket, &config.object_name_02),
                table: table(&config.table_id_02),
            },
        ];

        Pipeline {
            loader: CsvWarehouseLoader::new(
                storage.clone(),
                warehouse.clone(),
                config.chunk_row_size,
                config.call_timeout(),
            ),
            storage,
            warehouse,
            ads,
            streams,
            remove_existing_tables: !config.keep_existing_tables,
            call_timeout: config.call_timeout(),
            run_lock: Mutex::new(()),
        }
    }

    /// Builds the production clients: storage and warehouse from the
    /// service-account key, ads reporting from the local credentials file.
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        let storage: Arc<dyn ObjectStore> =
            Arc::new(GcsStore::connect(&config.credentials_path).await?);
        let key = service_account_key(&config.credentials_path)?;
        let warehouse =
            Arc::new(BigQueryClient::connect(key, storage.clone(), &config.bucket).await?);
        let ads = Arc::new(AdWordsClient::new(config)?);

        Ok(Pipeline::new(config, storage, warehouse, ads))
    }

    /// Runs every step in order. Concurrent callers wait for the run in
    /// progress to finish before starting their own.
    pub async fn run(&self) -> Result<RunSummary, Error> {
        let _guard = self.run_lock.lock().await;
        let mut dropped: Vec<String> = Vec::new();

        if self.remove_existing_tables {
            for stream in &self.streams {
                let step = format!("removing table {}", stream.table);
                let removed = self
                    .call(&step, remove_table(self.warehouse.as_ref(), &stream.table))
                    .await
                    .map_err(|err| aborted(&step, &dropped, err))?;
                if removed {
                    dropped.push(stream.table.to_string());
                }
            }
            info!("dropped {} existing table(s)", dropped.len());
        } else {
            warn!("keeping existing tables, new rows will be appended to them");
        }

        for stream in &self.streams {
            let step = format!("fetching report {} into {}", stream.label, stream.staged);
            self.call(
                &step,
                fetch_report(
                    self.ads.as_ref(),
                    self.storage.as_ref(),
                    &stream.query,
                    &stream.staged,
                ),
            )
            .await
            .map_err(|err| aborted(&step, &dropped, err))?;
        }

        for stream in &self.streams {
            let step = format!("loading {} into {}", stream.staged, stream.table);
            info!("{}", step);
            self.loader
                .load(&stream.staged, &stream.table)
                .await
                .map_err(|err| aborted(&step, &dropped, err))?;

            let reloaded = stream.table.to_string();
            dropped.retain(|table| *table != reloaded);
        }

        let mut counts = [0u64; 2];
        for (count, stream) in counts.iter_mut().zip(&self.streams) {
            let step = format!("counting rows in {}", stream.table);
            let table_info = self
                .call(&step, self.warehouse.get_table(&stream.table))
                .await
                .map_err(|err| aborted(&step, &dropped, err))?;
            info!("{} holds {} rows", table_info.table, table_info.num_rows);
            *count = table_info.num_rows;
        }

        let summary = RunSummary {
            rows_01: counts[0],
            rows_02: counts[1],
        };
        info!("{}", summary.to_string().replace('\n', " "));
        Ok(summary)
    }

    async fn call<T>(
        &self,
        step: &str,
        call: impl std::future::Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        info!("{}", step);
        with_timeout(step, self.call_timeout, call).await
    }
}

fn aborted(step: &str, dropped: &[String], source: Error) -> Error {
    let dropped = dropped.join(", ");
    error!(
        "run aborted while {}: {} (dropped and not reloaded: [{}])",
        step, source, dropped
    );

    Error::RunAborted {
        step: step.to_string(),
        dropped,
        source: Box::new(source),
    }
}
