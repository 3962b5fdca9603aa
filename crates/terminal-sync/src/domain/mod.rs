pub mod instance_state;

pub use instance_state::InstanceState;
