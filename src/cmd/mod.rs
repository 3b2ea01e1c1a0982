//! CLI command implementations.
//!
//! | Module    | Commands handled        |
//! |-----------|-------------------------|
//! | `session` | `Run`, `Shell`, `Exec`  |
//! | `stop`    | `Stop`                  |

pub mod session;
pub mod stop;

pub use session::cmd_session;
pub use stop::cmd_stop;
