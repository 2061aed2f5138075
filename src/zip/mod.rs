mod parser;
mod records;

pub use parser::CentralDirectoryParser;
pub use records::{mode_for, msdos_time, CdLocation, Cdr, Compression, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG};
