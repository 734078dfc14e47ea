//! Catalogue - schema store, descriptors and the lazily loaded index

mod descriptor;
mod index;
mod store;

pub use descriptor::{
    BindingRef, ServerDescriptor, ServerIndex, ServerSummary, ShapeRef, ToolDescriptor, ToolSummary, TransportConfig,
};
pub use index::{CatalogueIndex, SearchHit};
pub use store::{FsSchemaStore, INDEX_FILE, SchemaStore, TOOLS_DIR, parse_descriptor, parse_index};
