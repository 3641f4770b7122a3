pub mod get_job;

pub use get_job::{GetImportJobError, GetImportJobQuery, ImportJobResponse};
