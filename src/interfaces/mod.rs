pub mod csv;
pub mod setup;
