pub mod dispatch;
pub mod ingress;
pub mod notify;
pub mod session;
