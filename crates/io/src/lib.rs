// File I/O operations

pub mod columnar;
pub mod csv;
pub mod inputs;
pub mod persist;

pub use columnar::{read_columnar, write_columnar, Manifest, WriteOptions, COLUMNAR_FORMAT_VERSION};
pub use crate::csv::{read_entity_table, read_hierarchy, write_table_csv, TableSpec};
pub use inputs::{check_inputs, load_run_inputs, RunInputs};
pub use persist::{ensure_dir, persist_table, write_atomic};
