pub mod str;
pub mod time;
