//! SQLite access to the Kobo and Calibre databases.

mod calibre;
mod kobo;
mod pool;

pub use calibre::{list_custom_columns, CalibreLibraries};
pub use kobo::KoboDatabase;
