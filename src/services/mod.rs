pub mod catalog;
pub mod delivery;
