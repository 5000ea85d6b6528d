//! Read models for the front end, built from a session snapshot plus the
//! contract facade.
//!
//! Every refresh takes the [`ll_api_types::Session`] it should act on. Views
//! never keep a facade around; they re-derive it from the snapshot each time.

mod access;
mod crises;
mod dashboard;
mod identity;

pub use access::{ACCESS_CHECK_LIMIT, AccessSnapshot, AccessView};
pub use crises::CrisisListView;
pub use dashboard::{DashboardSnapshot, DashboardView};
pub use identity::{IdentitySnapshot, IdentityView};
