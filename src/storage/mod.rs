//! Tracebin Storage Layer
//!
//! Durable representation of one dataset:
//!
//! - **node**: hierarchy node model and its text record format
//! - **node_store**: SQLite-backed fixed-capacity node store
//! - **manifest**: attribute, track and root manifests
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Build:
//!   IndexWriter → WriteTxn.put(node) → nodes.db
//!               → attributes.dict / tracks.dict / roots.manifest
//!
//! Serve:
//!   IndexReader → manifests → ReaderPool → ReadTxn.get(id) → Node
//! ```

pub mod error;
pub mod manifest;
pub mod node;
pub mod node_store;

pub use error::{StorageError, StorageResult};
pub use manifest::{DatasetPaths, RootManifest};
pub use node::{AttributeSets, Node, NodeId, TimeSpan, TrackSpan, ATTR_ID, ATTR_PRIMITIVE};
pub use node_store::{NodeSource, NodeStore, PooledReader, ReadTxn, ReaderPool, WriteTxn};
