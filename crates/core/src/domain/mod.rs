pub mod catalog;
pub mod customer;
pub mod item;
pub mod product;
pub mod record;
pub mod region;
