//! Canonical artifact filename generation/parsing and the lineage index
//! over generated names (C7).
//!
//! Grounded in the source's approach to deterministic, sortable file
//! naming for generated artifacts; the short-ID encoding reuses the `ulid`
//! crate's own Crockford base32 alphabet rather than introducing a second
//! one.

pub mod filename;
pub mod index;

pub use filename::{generate, parse, snake_case_description, task_short, workflow_short, ParseNameError, ParsedName};
pub use index::{NamedArtifact, NamingRegistry};
