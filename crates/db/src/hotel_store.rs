use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tracing::debug;

use concierge_core::domain::{Hotel, HotelId, Review};
use concierge_core::search::{HotelSearch, SearchError};

const HOTELS_PER_SEARCH: usize = 5;
const REVIEWS_PER_SEARCH: usize = 5;

const REVIEW_TITLES: [&str; 7] = [
    "“Very Good”",
    "“Great Location”",
    "“Excellent”",
    "“Terrible”",
    "“Great Service”",
    "“Disappointing”",
    "“Would Come Back”",
];

const REVIEW_TEXT: &str = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. Mauris odio magna, sodales vel ligula sit amet, vulputate vehicula velit. Nulla quis consectetur neque, sed commodo metus.";
const REVIEWER_IMAGE: &str = "https://upload.wikimedia.org/wikipedia/en/e/ee/Unknown-person.gif";

/// Stand-in for a hotel inventory backend. Results are derived from the query
/// so the same destination always yields the same hotels, and every call
/// waits `latency` to behave like a remote service.
#[derive(Clone, Debug)]
pub struct FixtureHotelStore {
    latency: Duration,
}

impl Default for FixtureHotelStore {
    fn default() -> Self {
        Self::new(Duration::from_millis(1_000))
    }
}

impl FixtureHotelStore {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }

    pub fn instant() -> Self {
        Self::new(Duration::ZERO)
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

fn seed_for(query: &str) -> u64 {
    // FNV-1a over the normalised query.
    query.trim().to_lowercase().bytes().fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

fn hotels_for(destination: &str) -> Vec<Hotel> {
    let mut rng = StdRng::seed_from_u64(seed_for(destination));
    (1..=HOTELS_PER_SEARCH)
        .map(|index| Hotel {
            id: HotelId(format!("{}-{index}", destination.to_lowercase().replace(' ', "-"))),
            name: format!("{destination} Hotel {index}"),
            location: destination.to_owned(),
            rating: rng.gen_range(1..=5),
            number_of_reviews: rng.gen_range(1..=5_000),
            price_starting: Decimal::from(rng.gen_range(80..530_u32)),
            image: format!(
                "https://placeholdit.imgix.net/~text?txtsize=35&txt=Hotel+{index}&w=500&h=260"
            ),
        })
        .collect()
}

fn reviews_for(hotel_name: &str) -> Vec<Review> {
    let mut rng = StdRng::seed_from_u64(seed_for(hotel_name));
    (0..REVIEWS_PER_SEARCH)
        .map(|_| Review {
            hotel_name: hotel_name.to_owned(),
            title: REVIEW_TITLES[rng.gen_range(0..REVIEW_TITLES.len())].to_owned(),
            text: REVIEW_TEXT.to_owned(),
            image: REVIEWER_IMAGE.to_owned(),
        })
        .collect()
}

#[async_trait]
impl HotelSearch for FixtureHotelStore {
    async fn search_hotels(&self, destination: &str) -> Result<Vec<Hotel>, SearchError> {
        let destination = destination.trim();
        self.simulate_latency().await;
        if destination.is_empty() {
            return Ok(Vec::new());
        }

        let hotels = hotels_for(destination);
        debug!(
            event_name = "search.hotels.completed",
            destination = %destination,
            results = hotels.len(),
            "fixture hotel search completed"
        );
        Ok(hotels)
    }

    async fn search_reviews(&self, hotel_name: &str) -> Result<Vec<Review>, SearchError> {
        let hotel_name = hotel_name.trim();
        self.simulate_latency().await;
        if hotel_name.is_empty() {
            return Ok(Vec::new());
        }

        let reviews = reviews_for(hotel_name);
        debug!(
            event_name = "search.reviews.completed",
            hotel = %hotel_name,
            results = reviews.len(),
            "fixture review search completed"
        );
        Ok(reviews)
    }
}
