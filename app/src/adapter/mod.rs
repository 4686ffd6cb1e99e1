pub mod api;
pub mod homeassistant;
