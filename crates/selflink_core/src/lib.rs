pub mod api;
pub mod bot;
pub mod choice;
pub mod config;
pub mod guard;
pub mod interaction;
pub mod local;
pub mod pagegen;
pub mod title;
pub mod unlink;
pub mod wikilink;
