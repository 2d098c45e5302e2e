//! TMF Open API resource services for Rust.
//!
//! Provides multi-tenant, async-first services for TMF resources (Trouble
//! Ticket, Product Order, Cancel Product Order, Shopping Cart and Product)
//! with a generic JSON Patch Query engine, merge-patch support, `If-Match`
//! optimistic locking and event notification through webhooks.
//!
//! # Core Components
//!
//! - [`TmfServer`] - Dispatches operations to the registered resource types
//! - [`ResourceService`] - Create, get, list, patch and remove for one resource
//! - [`patch`] - Path grammars, element matching and operation application
//! - [`StorageProvider`] - Trait for pluggable record storage
//! - [`events`] - Event envelopes, the internal bus and webhook delivery
//!
//! # Quick Start
//!
//! ```rust
//! use serde_json::json;
//! use tmf_server::{RequestContext, ServerConfig, TmfServer};
//! use tmf_server::storage::InMemoryStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = TmfServer::in_memory(InMemoryStorage::new(), ServerConfig::from_env());
//! let ctx = RequestContext::for_tenant("tenant1");
//!
//! let ticket = server
//!     .create_resource(
//!         "TroubleTicket",
//!         json!({"description": "No dial tone", "severity": "major", "ticketType": "incident"}),
//!         &ctx,
//!     )
//!     .await?;
//!
//! let id = ticket["id"].as_str().unwrap_or_default();
//! let resolved = server
//!     .patch_resource(
//!         "TroubleTicket",
//!         id,
//!         json!([{"op": "replace", "path": "$.status", "value": "resolved"}]),
//!         &ctx,
//!     )
//!     .await?;
//! assert_eq!(resolved["status"], "resolved");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod patch;
pub mod resource;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::{ServerConfig, WebhookConfig};
pub use error::{TmfError, TmfResult};
pub use events::{EventEnvelope, EventKind, EventPublisher};
pub use patch::{PatchOperation, PatchRequest};
pub use resource::{
    ListRequest, Page, RequestContext, ResourceDefinition, ResourceService, VersionedEntity,
};
pub use server::TmfServer;
pub use storage::{InMemoryStorage, StorageProvider};
