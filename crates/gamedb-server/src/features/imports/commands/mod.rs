pub mod process;
pub mod upload;

pub use process::ProcessImportCommand;
pub use upload::{UploadArchiveCommand, UploadArchiveResponse};
