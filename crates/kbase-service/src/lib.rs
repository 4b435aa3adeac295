#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

//! Ingestion and retrieval over a shared, swappable index.
//!
//! [`KnowledgeBase`] wires the configured embedder and index backend into an
//! [`IngestionCoordinator`] (the single writer) and a [`RetrievalService`]
//! (any number of readers). Both see the live index through an
//! [`IndexHandle`], which a refresh swaps atomically.

pub mod context;
pub mod coordinator;
pub mod handle;
pub mod policy;
pub mod retrieval;

pub use context::{KnowledgeBase, StartupOutcome};
pub use coordinator::IngestionCoordinator;
pub use handle::IndexHandle;
pub use policy::EmbedPolicy;
pub use retrieval::{Retrieve, RetrievalService, Retriever};
