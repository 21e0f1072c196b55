#![allow(dead_code)]

pub mod input_builder;
