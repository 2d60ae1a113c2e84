pub mod money;
pub mod payment;
pub mod service;
pub mod status;
pub mod sweeper;
