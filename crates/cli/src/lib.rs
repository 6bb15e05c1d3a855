//! chl library - exports command modules for testing

pub mod cmd;
pub mod render;
pub mod util;
