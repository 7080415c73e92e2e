//! Persistent prompt material: knowledge text and behaviour overrides.

pub mod behaviour;
pub mod knowledge;

pub use behaviour::BehaviourStore;
pub use knowledge::read_knowledge;
