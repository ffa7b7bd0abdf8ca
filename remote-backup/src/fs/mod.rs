pub mod identity;
pub mod walker;

pub use identity::{same_file, FileIdentity};
pub use walker::{calculate_total_size, walk_directory, walk_directory_with_callback, FileInfo};
