// src/analysis/mod.rs

pub mod lab;
pub mod pattern;
pub mod risk;
pub mod shape;
