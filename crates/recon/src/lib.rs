//! `srm-recon` — reconciliation core for the social-services record pipeline.
//!
//! Pure engine crate: source reconciliation, curation promotion and taxonomy
//! closure over an abstract record store. No CLI or file IO.

pub mod config;
pub mod error;
pub mod evidence;
pub mod identity;
pub mod model;
pub mod promote;
pub mod reconcile;
pub mod source;
pub mod store;
pub mod taxonomy;

pub use config::{PromotionConfig, SourceConfig};
pub use error::{FetchError, MapError, ReconError, RewriteError, StoreError};
pub use identity::IdentityMapping;
pub use model::{CanonicalRecord, Decision, EntityKind, Fields, SourceRecord, Status};
pub use promote::{promote_all, CurationBase, Promoter};
pub use reconcile::{reconcile, reconcile_with, ReconcileOptions, ReconcileTarget};
pub use source::{content_id, ColumnMapper, FieldCopyMapper, Fetcher, Mapper};
pub use store::{MemoryStore, RecordStore};
pub use taxonomy::close;
