//! Value codec.
//!
//! Converts between raw holding-register words and decoded sensor values.

pub mod value;

pub use value::{
    check_bitmask, combine_registers, decode, decode_math, encode, patch_bitmask, raw_math_term,
    round2, signed16, signed32, TEMPERATURE_OFFSET,
};
