pub mod models;
pub mod numeric;
pub mod scaling;
