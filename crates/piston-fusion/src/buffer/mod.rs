mod allocation;
mod assignment;
mod error;

pub use allocation::*;
pub use assignment::*;
pub use error::*;
