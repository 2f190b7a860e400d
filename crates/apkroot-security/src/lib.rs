mod checksum;
mod fingerprint;

pub use checksum::{sha256_file_hex, sha256_hex, sha256_reader_hex};
pub use fingerprint::{certificate_fingerprint, display_fingerprint, normalize_fingerprint};
