pub mod compat;
pub mod config;
pub mod error;
pub mod gateway;
pub mod items;
pub mod retry;

pub use compat::{AggregateCopyRequest, CompatibilitySet};
pub use error::{CallError, CallFailure, is_dimension_rejection};
pub use gateway::{HttpGateway, MarketplaceGateway};
pub use items::{ItemDetail, NewListingPayload, UpdateItemRequest};
pub use retry::{Attempted, RetryPolicy};
