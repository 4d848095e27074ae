pub mod connection;
pub mod hotel_store;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_settings, DbPool};
pub use hotel_store::FixtureHotelStore;
pub use repositories::{InMemorySessionRepository, RepositoryError, SqlSessionRepository};
