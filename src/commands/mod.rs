//! CLI commands implementation

pub mod actions;
pub mod auth;
pub mod check;
pub mod init;
pub mod pages;
pub mod status;
pub mod watch;

pub use actions::*;
pub use auth::*;
pub use check::*;
pub use init::*;
pub use pages::*;
pub use status::*;
pub use watch::*;
