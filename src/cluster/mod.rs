pub mod actor_ref;
pub mod cluster_config;
pub mod cluster_control;
pub mod cluster_events;
pub mod cluster_system;
pub mod death_watch;
pub mod downing;
pub mod membership;
pub mod unique_node;
