//! Domain logic and service clients for the AI chef Telegram bot.

pub mod bot;
pub mod chef;
pub mod images;
pub mod intent;
pub mod keyboards;
pub mod llm;
pub mod logging;
pub mod recipe;
pub mod store;
pub mod telegram;
pub mod text;
pub mod validate;

mod multipart;

pub use logging::init_logging;
