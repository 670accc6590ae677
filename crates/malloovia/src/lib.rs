#![doc = include_str!("../readme.md")]

pub mod error;
pub mod histogram;
pub mod lp;
pub mod model;
pub mod phases;
pub mod solution;
pub mod solver;
pub mod yamlio;
