//! Display cards for resolved domain objects.
//!
//! A card is transport-neutral; channel adapters decide how to serialize it.

use serde::{Deserialize, Serialize};

use crate::domain::{Hotel, Review};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardKind {
    Hero,
    Thumbnail,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardAction {
    pub title: String,
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub kind: CardKind,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<CardAction>,
}

pub trait Presentable {
    fn to_card(&self) -> Card;
}

impl Presentable for Hotel {
    fn to_card(&self) -> Card {
        Card {
            kind: CardKind::Hero,
            title: self.name.clone(),
            subtitle: Some(format!(
                "{} stars. {} reviews. From ${} per night.",
                self.rating,
                self.number_of_reviews,
                self.price_starting.trunc()
            )),
            text: None,
            image_url: Some(self.image.clone()),
            action: Some(CardAction {
                title: "More details".to_owned(),
                url: hotel_details_url(&self.location),
            }),
        }
    }
}

impl Presentable for Review {
    fn to_card(&self) -> Card {
        Card {
            kind: CardKind::Thumbnail,
            title: self.title.clone(),
            subtitle: None,
            text: Some(self.text.clone()),
            image_url: Some(self.image.clone()),
            action: None,
        }
    }
}

/// One card per item, in input order.
pub fn carousel<T: Presentable>(items: &[T]) -> Vec<Card> {
    items.iter().map(Presentable::to_card).collect()
}

fn hotel_details_url(location: &str) -> String {
    let encoded = url::form_urlencoded::byte_serialize(location.as_bytes()).collect::<String>();
    format!("https://www.bing.com/search?q=hotels+in+{encoded}")
}
