pub mod config;
pub mod environment;
pub mod errors;
pub mod git;
pub mod lifecycle;
pub mod logging;
pub mod naming;
pub mod options;
pub mod ports;
pub mod process;
pub mod remote;
pub mod resolve;
pub mod runtime;
pub mod session;
pub mod state;
pub mod stop;
pub mod ui;
