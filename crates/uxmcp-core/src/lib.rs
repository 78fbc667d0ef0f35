//! Registry, document store, memory subsystem, completion boundary, MCP
//! view and log sink shared by the rest of this workspace.

pub mod completion;
pub mod doc_store;
pub mod error;
pub mod log_sink;
pub mod mcp_surface;
pub mod memory;
pub mod model;
pub mod registry;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use error::{ErrorKind, UxmcpError};
pub use registry::Registry;
