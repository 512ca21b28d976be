use crate::error::Error;
use chrono::NaiveDate;
use clap::Args as ClapArgs;
use std::time::Duration;

const DEFAULT_ADS_CONFIG_PATH: &str = "./googleads.yaml";
const DEFAULT_OBJECT_01: &str = "shopping_performance_report_01.csv";
const DEFAULT_OBJECT_02: &str = "shopping_performance_report_02.csv";
const DEFAULT_TABLE_01: &str = "google_shopping_performance_table_01";
const DEFAULT_TABLE_02: &str = "google_shopping_performance_table_02";
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_CHUNK_ROW_SIZE: usize = 2_000_000;
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 300;

#[derive(ClapArgs, Clone, Debug)]
pub struct Config {
    #[arg(long, env = "PROJECT_ID")]
    pub(crate) project_id: String,

    #[arg(long, env = "DATASET_ID")]
    pub(crate) dataset_id: String,

    #[arg(long, env = "GCLOUD_BUCKET_NAME")]
    pub(crate) bucket: String,

    #[arg(long, default_value = DEFAULT_TABLE_01, env = "TABLE_ID_01")]
    pub(crate) table_id_01: String,

    #[arg(long, default_value = DEFAULT_TABLE_02, env = "TABLE_ID_02")]
    pub(crate) table_id_02: String,

    #[arg(long, default_value = DEFAULT_OBJECT_01, env = "DESTINATION_FILE_NAME_01")]
    pub(crate) object_name_01: String,

    #[arg(long, default_value = DEFAULT_OBJECT_02, env = "DESTINATION_FILE_NAME_02")]
    pub(crate) object_name_02: String,

    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    pub(crate) credentials_path: String,

    #[arg(long, default_value = DEFAULT_ADS_CONFIG_PATH, env = "ADS_CONFIG_PATH")]
    pub(crate) ads_config_path: String,

    #[arg(long, default_value_t = DEFAULT_CHUNK_ROW_SIZE, env = "CHUNK_ROW_SIZE")]
    pub(crate) chunk_row_size: usize,

    /// Append to the destination tables instead of dropping them first.
    #[arg(long, env = "KEEP_EXISTING_TABLES")]
    pub(crate) keep_existing_tables: bool,

    #[arg(long, default_value_t = DEFAULT_CALL_TIMEOUT_SECS, env = "CALL_TIMEOUT_SECS")]
    pub(crate) call_timeout_secs: u64,

    #[arg(long, help = "Report window start, YYYY-MM-DD", env = "REPORT_START", value_parser = validate_date, requires = "report_end")]
    pub(crate) report_start: Option<NaiveDate>,

    #[arg(long, help = "Report window end, YYYY-MM-DD", env = "REPORT_END", value_parser = validate_date, requires = "report_start")]
    pub(crate) report_end: Option<NaiveDate>,

    #[arg(long, default_value = DEFAULT_LISTEN_ADDR, env = "LISTEN_ADDR")]
    pub(crate) listen_addr: String,
}

impl Config {
    /// Checks the settings clap cannot express on its own.
    pub fn validate(&self) -> Result<(), Error> {
        if self.chunk_row_size == 0 {
            return Err(Error::InvalidConfig {
                message: "chunk row size must be greater than zero".to_string(),
            });
        }

        if self.call_timeout_secs == 0 {
            return Err(Error::InvalidConfig {
                message: "call timeout must be greater than zero".to_string(),
            });
        }

        if let (Some(start), Some(end)) = (self.report_start, self.report_end) {
            if start > end {
                return Err(Error::StartDateAfterEndDate {
                    start_date: start.to_string(),
                    end_date: end.to_string(),
                });
            }
        }

        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

fn validate_date(s: &str) -> Result<NaiveDate, String> {
    let error_message = "Invalid date, expected YYYY-MM-DD";

    let parts = s
        .split("-")
        .map(|part| part.parse::<u16>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| error_message)?;

    match parts.as_slice() {
        &[year, month, day] if month <= 12 && day <= 31 => {
            Ok(
                NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                    .ok_or(error_message)?,
            )
        }
        _ => Err(error_message.to_string()),
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        project_id: "test-project".to_string(),
        dataset_id: "ads".to_string(),
        bucket: "staging-bucket".to_string(),
        table_id_01: DEFAULT_TABLE_01.to_string(),
        table_id_02: DEFAULT_TABLE_02.to_string(),
        object_name_01: DEFAULT_OBJECT_01.to_string(),
        object_name_02: DEFAULT_OBJECT_02.to_string(),
        credentials_path: "/dev/null".to_string(),
        ads_config_path: "/dev/null".to_string(),
        chunk_row_size: DEFAULT_CHUNK_ROW_SIZE,
        keep_existing_tables: false,
        call_timeout_secs: 5,
        report_start: None,
        report_end: None,
        listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
    }
}
