//! Shared building blocks: grids, bit masks, keyed collections, logging and
//! file helpers.

pub mod bit_buffer2;
pub mod buffer2;
pub mod file_utils;
pub mod float_ext;
pub mod key_index_vec;
pub mod log_setup;
pub mod test_utils;

pub const EPSILON: f64 = 1e-6;

pub fn is_debug() -> bool {
    cfg!(debug_assertions)
}
