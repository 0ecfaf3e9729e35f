//! Basic types shared by tessel crates.

pub mod counter;
mod data;
pub mod literal;
mod value;

pub use crate::{
    data::Data,
    literal::{parse_float, parse_literal, parse_literal_list, LiteralError},
    value::{format_number, Array, Object, Opaque, Value},
};
