pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod ranking;

pub use domain::catalog::{CatalogLookup, CatalogProduct, Price, DEFAULT_CURRENCY};
pub use domain::customer::{Customer, CustomerId};
pub use domain::item::{ItemRole, ItemSet, RelatedItem};
pub use domain::product::ProductId;
pub use domain::record::{CoPurchasedPolicy, RecommendationRecord};
pub use domain::region::{Region, RegionScore, RegionScoreSet};
pub use engine::{
    BlendingEngine, PreparedRecommendation, RecommendationRequest, SignificancePolicy,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use ranking::{rank_by_count, rank_by_location};
