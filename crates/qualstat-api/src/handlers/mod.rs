pub mod cache;
pub mod databases;
pub mod export;
pub mod health;
pub mod stats;
