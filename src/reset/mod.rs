pub mod events;
pub mod locks;
pub mod protocol;
pub mod workflow;
