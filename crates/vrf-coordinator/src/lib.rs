mod error;
pub use error::CoordinatorError;

mod config;
pub use config::CoordinatorConfig;

pub mod primitives;

pub mod cache;

pub mod events;

pub mod log_poller;

pub mod contract;

mod coordinator;
pub use coordinator::{
    VrfCoordinator,
    is_eligible,
};

#[cfg(any(test, feature = "test"))]
pub mod test_utils;
