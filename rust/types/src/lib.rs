mod mat_file;
mod matrix;

pub use mat_file::*;
pub use matrix::*;
