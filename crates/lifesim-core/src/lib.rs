pub mod character;
pub mod config;
pub mod conversation;
pub mod dialogue;
pub mod llm;
pub mod minigame;
pub mod mood;
pub mod task;
pub mod world;

pub use world::World;
