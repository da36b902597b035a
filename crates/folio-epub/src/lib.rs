//! Book resource model for the Folio plugin execution core.
//!
//! The `folio-epub` crate owns everything the plugin machinery needs to know
//! about an open book: the typed resource records tracked by the
//! [`BookStore`], the media-type constants that act as wire values in the
//! plugin result protocol, the well-formedness checker applied to candidate
//! markup documents, and the best-effort auto-repair pass applied to
//! auxiliary XML documents.
//!
//! The store is deliberately dual-natured: it tracks an in-memory view of
//! each resource (cached text for editable kinds) while mirroring the book
//! root directory on disk, because plugins operate on the on-disk snapshot
//! and their accepted changes must be absorbed back into both layers.

pub mod mediatype;
pub mod repair;
pub mod resource;
pub mod store;
pub mod wellformed;

pub use self::resource::{Resource, ResourceKind};
pub use self::store::{BookStore, StoreError};
pub use self::wellformed::WellFormedError;
