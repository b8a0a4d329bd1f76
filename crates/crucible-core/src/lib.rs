#![deny(missing_docs)]
#![doc = "Core value model, schemas, records, and errors for the crucible experiment manager."]

pub mod errors;
pub mod record;
pub mod schema;
pub mod value;

pub use errors::{CrucibleError, ErrorInfo};
pub use record::{fields, metadata_keys, Metadata, Params, PendingRecord, ResultRecord, Results};
pub use schema::{Field, Schema, SchemaChange};
pub use value::{Complex, Kind, Value};
