pub mod items;
pub mod queue;
pub mod resources;
pub mod template;
pub mod worker;
