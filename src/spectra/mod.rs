pub mod binning;
pub mod filters;
pub mod poly;
pub mod power;
