//! Dataset, table and column listing
//!
//! Thin logging wrappers over the client's listing calls. Failures are
//! logged and reported as `None`; they never reach the caller as errors.

use crate::client::{ClientHandle, DatasetRef, TableRef, TableSchema};

/// Log every dataset of `project_id` (the handle's project when `None`)
pub async fn list_datasets(
    client: &ClientHandle,
    project_id: Option<&str>,
    page_size: u32,
) -> Option<Vec<DatasetRef>> {
    let project_id = project_id.unwrap_or(client.project_id());
    match client.list_datasets(project_id, page_size).await {
        Ok(datasets) if datasets.is_empty() => {
            log::info!("Project {} does not contain any datasets", project_id);
            Some(datasets)
        }
        Ok(datasets) => {
            for dataset in &datasets {
                log::info!(
                    "DatasetName:{}, FriendlyName:{}",
                    dataset.dataset_id,
                    dataset.friendly_name.as_deref().unwrap_or("null")
                );
            }
            Some(datasets)
        }
        Err(e) => {
            log::warn!("Project {} does not contain any datasets \n{}", project_id, e);
            None
        }
    }
}

/// Log every table of `dataset_id` in the handle's project
pub async fn list_tables(
    client: &ClientHandle,
    dataset_id: &str,
    page_size: u32,
) -> Option<Vec<TableRef>> {
    match client.list_tables(dataset_id, page_size).await {
        Ok(tables) => {
            for table in &tables {
                log::info!("TableName: {}", table.table_id);
            }
            log::info!("Tables listed successfully.");
            Some(tables)
        }
        Err(e) => {
            log::warn!("Tables were not listed. Error occurred: {}", e);
            None
        }
    }
}

/// Log the top-level fields of a table's schema
pub async fn list_table_columns(
    client: &ClientHandle,
    dataset_id: &str,
    table_id: &str,
) -> Option<TableSchema> {
    log::info!("List table columns - start");
    let table = TableRef::new(client.project_id(), dataset_id, table_id);
    let schema = match client.get_table_schema(&table).await {
        Ok(Some(schema)) => {
            for field in &schema.fields {
                log::info!("Field: {} = {}", field.name, field.field_type);
            }
            Some(schema)
        }
        Ok(None) => {
            log::info!("Cannot retrieve table schema");
            None
        }
        Err(e) => {
            log::warn!("Failed to retrieve table schema. Error: {}", e);
            None
        }
    };
    log::info!("List table columns - finish");
    schema
}
