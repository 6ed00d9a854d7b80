//! Domain models shared by the cache store, the API client, and the sync engines

mod attraction;
mod review;
mod tombstone;

pub use attraction::{Attraction, AttractionId, RemoteAttraction};
pub use review::{
    LocalReviewState, NewReview, Reaction, RemoteReview, Review, ReviewId, ReviewStatus,
};
pub use tombstone::{Tombstone, ENTITY_TYPE_ATTRACTION};
