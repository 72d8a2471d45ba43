mod command;
mod runner;
mod util;

pub use command::Command;
pub use runner::{OutputMode, Workspace, render, run};
pub use util::{parse_bool, parse_pairs};
