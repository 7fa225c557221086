#[path = "relay_integration/commands.rs"]
mod commands;
#[path = "relay_integration/ingress.rs"]
mod ingress;
#[path = "relay_integration/pipeline.rs"]
mod pipeline;
#[path = "relay_integration/push.rs"]
mod push;
#[path = "relay_integration/support.rs"]
mod support;
