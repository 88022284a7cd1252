#[path = "../common/mod.rs"]
mod common;

mod migrations_test;
mod pipeline_test;
