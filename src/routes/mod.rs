pub mod audits;
pub mod health;
pub mod pages;
