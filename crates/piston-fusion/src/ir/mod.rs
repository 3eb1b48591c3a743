mod computation;
mod fusion_instruction;
mod legacy;
mod opcode;

pub use computation::*;
pub use fusion_instruction::*;
pub use legacy::*;
pub use opcode::*;
