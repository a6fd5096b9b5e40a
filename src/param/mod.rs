//! Parameter Store (spec.md §4.1): typed groups with schema validation,
//! atomic on-disk persistence, and subscribe-on-change.

pub mod defaults;
pub mod schema;
pub mod store;
pub mod value;

pub use store::{ParameterStore, SubscriptionId};
pub use value::{ParamGroup, ParamValue};
