//! Domain models shared across services

mod fragment;
mod retrieval;

pub use fragment::{Fragment, FragmentId, IndexedFragment};
pub use retrieval::{
    rank_order, OverrideFilters, RetrievalDiagnostics, RetrievalResult, RetrievedFragment, Tier,
};
