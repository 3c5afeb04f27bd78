mod build_index;
mod collection;
mod config;
mod ingest;
mod search;
mod status;

pub use build_index::BuildIndexArgs;
pub use collection::CollectionCommand;
pub use config::ConfigCommand;
pub use ingest::IngestArgs;
pub use search::SearchArgs;

pub use build_index::handle_build_index;
pub use collection::{ensure_collection, handle_collection};
pub use config::handle_config;
pub use ingest::handle_ingest;
pub use search::handle_search;
pub use status::handle_status;
