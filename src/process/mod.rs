pub mod runner;
pub mod tree;
