#![allow(dead_code)]

pub mod polling;
pub mod server;
