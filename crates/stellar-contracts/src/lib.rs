pub mod board;
pub mod chat;
pub mod conversation;
pub mod events;
pub mod gallery;
pub mod instructions;
pub mod models;
pub mod render;
pub mod settings;
