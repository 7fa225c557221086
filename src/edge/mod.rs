pub mod agent;
pub mod delivery;
pub mod inbox;
pub mod outbox;
