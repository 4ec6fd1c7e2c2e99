pub mod bias;
pub mod colvar;
