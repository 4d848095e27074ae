pub mod hotel;

pub use hotel::{Hotel, HotelId, Review};
