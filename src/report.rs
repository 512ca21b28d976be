use crate::api_client::{AdsApi, DateRange, DownloadOptions, ReportQuery};
use crate::error::Error;
use crate::storage::{ObjectPath, ObjectStore};
use log::info;

const SHOPPING_PERFORMANCE_REPORT: &str = "SHOPPING_PERFORMANCE_REPORT";
const ENABLED_ONLY: [(&str, &str); 2] = [
    ("CampaignStatus", "ENABLED"),
    ("AdGroupStatus", "ENABLED"),
];

/// Campaign and offer level metrics with the product type hierarchy, per day.
pub fn performance_query(during: DateRange) -> ReportQuery {
    ReportQuery {
        fields: vec![
            "CampaignName",
            "OfferId",
            "Impressions",
            "Clicks",
            "AverageCpc",
            "Cost",
            "Ctr",
            "Conversions",
            "ConversionValue",
            "ProductTypeL1",
            "ProductTypeL2",
            "ProductTypeL3",
            "ProductTypeL4",
            "ProductTypeL5",
            "Date",
        ],
        report: SHOPPING_PERFORMANCE_REPORT,
        conditions: ENABLED_ONLY.to_vec(),
        during,
    }
}

/// Offer and product details with conversion attribution.
pub fn conversion_query(during: DateRange) -> ReportQuery {
    ReportQuery {
        fields: vec![
            "OfferId",
            "ProductTitle",
            "ConversionTypeName",
            "ConversionCategoryName",
            "ExternalConversionSource",
        ],
        report: SHOPPING_PERFORMANCE_REPORT,
        conditions: ENABLED_ONLY.to_vec(),
        during,
    }
}

/// Streams the CSV result of `query` into `destination`. A failed download
/// can leave a partially written object behind.
pub async fn fetch_report(
    ads: &dyn AdsApi,
    storage: &dyn ObjectStore,
    query: &ReportQuery,
    destination: &ObjectPath,
) -> Result<(), Error> {
    let body = ads
        .download_report(query, &DownloadOptions::CSV_ROWS_ONLY)
        .await?;
    storage.write_stream(destination, body).await?;

    info!("staged report at {}", destination);
    Ok(())
}
