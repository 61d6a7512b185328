pub mod asyncutil;
pub mod bootstrap;
pub mod commands;
pub mod config;
pub mod health;
pub mod launcher;
pub mod teardown;
pub mod url;

use thiserror::Error;

pub use bootstrap::{Bootstrapper, SetupRequest, SetupResult};
pub use teardown::{Teardown, TeardownRegistry};

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to load config")]
    LoadConfig,
    #[error("failed to load instance config template")]
    Template,
    #[error("failed to bootstrap the attestor pool")]
    Bootstrap,
    #[error("health probe failed")]
    Probe,
    #[error("failed to listen for shutdown signals")]
    Signal,
    #[error("failed to render output")]
    Output,
}
