pub mod business;
pub mod flow;
pub mod identity;
pub mod instance;
pub mod stock;
pub mod task;
