pub mod args;
pub mod op;
pub mod ops;

pub use ops::{Get, Init, Ls, Mkdir, Mv, Put, Refresh, Rm, Stat, Version};
