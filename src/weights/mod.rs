//! MOS weight (factor) loading.
//!
//! Factor files hold regression coefficients for one station, analysis hour,
//! season and target parameter. Each forecast step of a file becomes one
//! `mos_weight` row whose coefficients are stored as an `hstore`.
//!
//! - **`factor_csv`**: file format, file-name metadata and the term table.
//! - **`lookup`**: version, parameter and station ids, loaded once per run.
//! - **`upsert`**: insert-or-update of the rows of one file.
//! - **`delete`**: filtered removal.
//! - **`loader`**: walks the input files and owns the commit cadence.

pub mod delete;
pub mod factor_csv;
pub mod loader;
pub mod lookup;
pub mod upsert;

pub use delete::{DeleteFilter, delete_weights};
pub use factor_csv::{FactorFileMeta, FactorTable};
pub use loader::{FactorLoader, collect_factor_files};
pub use lookup::LookupTables;
pub use upsert::{WeightTarget, upsert_weights};
