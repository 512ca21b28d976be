use crate::data::TabularDataset;
use crate::deadline::with_timeout;
use crate::error::Error;
use crate::storage::{ObjectPath, ObjectStore};
use crate::table_cleaner::table_exists;
use crate::warehouse::{TableRef, Warehouse};
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

/// Appends staged CSV reports to warehouse tables, `chunk_row_size` rows per load.
#[derive(Clone)]
pub struct CsvWarehouseLoader {
    storage: Arc<dyn ObjectStore>,
    warehouse: Arc<dyn Warehouse>,
    chunk_row_size: usize,
    call_timeout: Duration,
}

impl CsvWarehouseLoader {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        warehouse: Arc<dyn Warehouse>,
        chunk_row_size: usize,
        call_timeout: Duration,
    ) -> Self {
        CsvWarehouseLoader {
            storage,
            warehouse,
            chunk_row_size,
            call_timeout,
        }
    }

    /// Reads `source`, normalizes its column names and appends every row to
    /// `table`, creating the table from the inferred schema when it is missing.
    /// Rows already in the table are kept, so loading twice duplicates them.
    ///
    /// # Returns
    /// The number of rows appended.
    pub async fn load(&self, source: &ObjectPath, table: &TableRef) -> Result<usize, Error> {
        let csv = with_timeout(
            &format!("reading {}", source),
            self.call_timeout,
            self.storage.read(source),
        )
        .await?;

        let dataset = TabularDataset::from_csv(&csv)?;
        let schema = dataset.warehouse_schema();
        debug!(
            "parsed {} rows from {} with columns [{}]",
            dataset.num_rows(),
            source,
            dataset.column_names().join(", ")
        );

        let exists = with_timeout(
            &format!("looking up {}", table),
            self.call_timeout,
            table_exists(self.warehouse.as_ref(), table),
        )
        .await?;
        if !exists {
            with_timeout(
                &format!("creating {}", table),
                self.call_timeout,
                self.warehouse.create_table(table, &schema),
            )
            .await?;
        }

        let total = dataset.num_rows();
        let mut offset = 0;
        while offset < total {
            let chunk = dataset.csv_chunk(offset, self.chunk_row_size).await?;
            let end = total.min(offset + self.chunk_row_size);

            with_timeout(
                &format!("appending rows {}..{} to {}", offset, end, table),
                self.call_timeout,
                self.warehouse.append_csv(table, &schema, chunk),
            )
            .await?;

            offset = end;
        }

        info!("loaded {} rows from {} into {}", total, source, table);
        Ok(total)
    }
}
