pub mod bue;
pub mod prod_db;
