//! Configuration resolved from the environment.
//!
//! Values are read from environment variables; the `dockfix` binary loads a
//! `.env` file first via dotenvy.

mod fixture;
pub(crate) mod helpers;

pub use fixture::FixtureSettings;
