pub mod caller;
pub mod solution;
