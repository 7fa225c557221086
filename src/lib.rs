pub mod application;
pub mod domain;
pub mod edge;
pub mod gateway;
pub mod interfaces;
pub mod protocol;
pub mod security;
pub mod storage;
