pub mod aggregate;
pub mod cluster;
pub mod collect;
pub mod config;
pub mod confluence;
pub mod pipeline;
pub mod publish;
pub mod render;
pub mod search;
pub mod tokenize;
