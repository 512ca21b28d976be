use crate::error::Error;
use crate::warehouse::{TableRef, Warehouse};
use log::debug;

/// Whether `table` exists. Only a not-found lookup counts as "no"; every
/// other failure is returned unchanged.
pub async fn table_exists(warehouse: &dyn Warehouse, table: &TableRef) -> Result<bool, Error> {
    match warehouse.get_table(table).await {
        Ok(_) => Ok(true),
        Err(Error::TableNotFound { .. }) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Deletes `table` if it exists. Returns whether a deletion was issued.
pub async fn remove_table(warehouse: &dyn Warehouse, table: &TableRef) -> Result<bool, Error> {
    if !table_exists(warehouse, table).await? {
        debug!("table {} does not exist, nothing to remove", table);
        return Ok(false);
    }

    warehouse.delete_table(table).await?;
    Ok(true)
}
