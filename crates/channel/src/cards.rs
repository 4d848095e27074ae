//! Bot Framework wire shapes for outbound activities.

use serde::Serialize;

use concierge_core::cards::{Card, CardKind};
use concierge_core::outbox::Activity;

pub const HERO_CONTENT_TYPE: &str = "application/vnd.microsoft.card.hero";
pub const THUMBNAIL_CONTENT_TYPE: &str = "application/vnd.microsoft.card.thumbnail";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CardImage {
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CardButton {
    #[serde(rename = "type")]
    pub action_type: String,
    pub title: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CardContent {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<CardImage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<CardButton>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub content_type: String,
    pub content: CardContent,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireActivity {
    #[serde(rename = "type")]
    pub activity_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_layout: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

pub fn attachment(card: &Card) -> Attachment {
    let content_type = match card.kind {
        CardKind::Hero => HERO_CONTENT_TYPE,
        CardKind::Thumbnail => THUMBNAIL_CONTENT_TYPE,
    };
    Attachment {
        content_type: content_type.to_owned(),
        content: CardContent {
            title: card.title.clone(),
            subtitle: card.subtitle.clone(),
            text: card.text.clone(),
            images: card.image_url.iter().map(|url| CardImage { url: url.clone() }).collect(),
            buttons: card
                .action
                .iter()
                .map(|action| CardButton {
                    action_type: "openUrl".to_owned(),
                    title: action.title.clone(),
                    value: action.url.clone(),
                })
                .collect(),
        },
    }
}

pub fn wire_activity(activity: &Activity) -> WireActivity {
    match activity {
        Activity::Typing => WireActivity {
            activity_type: "typing".to_owned(),
            text: None,
            attachment_layout: None,
            attachments: Vec::new(),
        },
        Activity::Text { text } => WireActivity {
            activity_type: "message".to_owned(),
            text: Some(text.clone()),
            attachment_layout: None,
            attachments: Vec::new(),
        },
        Activity::Carousel { cards } => WireActivity {
            activity_type: "message".to_owned(),
            text: None,
            attachment_layout: Some("carousel".to_owned()),
            attachments: cards.iter().map(attachment).collect(),
        },
    }
}

/// Plain-text rendering for terminals and logs.
pub fn plain_lines(activity: &Activity) -> Vec<String> {
    match activity {
        Activity::Typing => Vec::new(),
        Activity::Text { text } => vec![text.clone()],
        Activity::Carousel { cards } => cards
            .iter()
            .map(|card| {
                let mut line = format!("[{}]", card.title);
                for detail in [&card.subtitle, &card.text].into_iter().flatten() {
                    line.push(' ');
                    line.push_str(detail);
                }
                if let Some(action) = &card.action {
                    line.push_str(&format!(" <{}: {}>", action.title, action.url));
                }
                line
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use concierge_core::cards::{carousel, Presentable};
    use concierge_core::domain::{Hotel, HotelId, Review};
    use concierge_core::outbox::Activity;

    use super::{plain_lines, wire_activity};

    fn hotel() -> Hotel {
        Hotel {
            id: HotelId("H-1".to_owned()),
            name: "Lisbon Hotel 1".to_owned(),
            location: "Lisbon".to_owned(),
            rating: 3,
            number_of_reviews: 120,
            price_starting: Decimal::new(9_900, 2),
            image: "https://example.test/h1.png".to_owned(),
        }
    }

    #[test]
    fn hotel_carousel_renders_hero_attachments() {
        let activity = Activity::Carousel { cards: carousel(&[hotel()]) };

        let wire = serde_json::to_value(wire_activity(&activity)).expect("serialize");

        assert_eq!(
            wire,
            json!({
                "type": "message",
                "attachmentLayout": "carousel",
                "attachments": [{
                    "contentType": "application/vnd.microsoft.card.hero",
                    "content": {
                        "title": "Lisbon Hotel 1",
                        "subtitle": "3 stars. 120 reviews. From $99 per night.",
                        "images": [{ "url": "https://example.test/h1.png" }],
                        "buttons": [{
                            "type": "openUrl",
                            "title": "More details",
                            "value": "https://www.bing.com/search?q=hotels+in+Lisbon"
                        }]
                    }
                }]
            })
        );
    }

    #[test]
    fn review_renders_as_thumbnail_without_buttons() {
        let review = Review {
            hotel_name: "The Bot Resort".to_owned(),
            title: "Fantastic".to_owned(),
            text: "Would stay again.".to_owned(),
            image: "https://example.test/r.png".to_owned(),
        };
        let activity = Activity::Carousel { cards: vec![review.to_card()] };

        let wire = serde_json::to_value(wire_activity(&activity)).expect("serialize");

        assert_eq!(wire["attachments"][0]["contentType"], "application/vnd.microsoft.card.thumbnail");
        assert_eq!(wire["attachments"][0]["content"]["text"], "Would stay again.");
        assert!(wire["attachments"][0]["content"].get("buttons").is_none());
    }

    #[test]
    fn typing_and_text_render_without_attachments() {
        let typing = serde_json::to_value(wire_activity(&Activity::Typing)).expect("serialize");
        let text = serde_json::to_value(wire_activity(&Activity::text("hi"))).expect("serialize");

        assert_eq!(typing, json!({ "type": "typing" }));
        assert_eq!(text, json!({ "type": "message", "text": "hi" }));
    }

    #[test]
    fn plain_lines_list_one_line_per_card() {
        let activity = Activity::Carousel { cards: carousel(&[hotel(), hotel()]) };

        let lines = plain_lines(&activity);

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("[Lisbon Hotel 1] 3 stars."));
        assert!(plain_lines(&Activity::Typing).is_empty());
    }
}
