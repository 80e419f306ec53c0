//! exFAT filesystem module

pub mod format;
pub mod ops;
pub mod unicode;

pub use format::format_exfat;
pub use ops::{ExfatFileReader, ExfatFileWriter, ExfatFs, FileInfo};
