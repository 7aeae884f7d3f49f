//! Local persistence: libsql cache, install stamp, report files.

pub mod install_stamp;
pub mod report_store;
pub mod sqlite_repo;

pub use install_stamp::JsonInstallStamp;
pub use report_store::{FsReportStore, frame_to_csv};
pub use sqlite_repo::SqliteCache;
