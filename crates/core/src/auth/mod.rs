//! Auth-failure recovery services.

pub mod coordinator;
