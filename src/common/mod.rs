//! Building blocks shared by the hardware modules

pub mod chunk_file;
pub mod flag;
pub mod waitable_flag;
