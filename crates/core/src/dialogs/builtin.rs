//! The dialogs the hotel concierge ships with.

use std::time::Duration;

use crate::cards::carousel;
use crate::dialogs::greeting::{greeting_for_hour, pick_welcome_line};
use crate::dialogs::registry::{DialogDefinition, DialogRegistry, RegistryError};
use crate::dialogs::states::{InterruptDecision, StepContext, StepInput, StepOutcome};
use crate::intent::{IntentResult, NONE_INTENT};
use crate::search::{LookupRequest, LookupResult};

pub const WELCOME: &str = "welcome";
pub const FALLBACK: &str = "None";
pub const OVERSEAS_FAIRS: &str = "Hktdc_Overseas_Fairs";
pub const HELP: &str = "Help";
pub const SEARCH_HOTELS: &str = "SearchHotels";
pub const SHOW_REVIEWS: &str = "ShowHotelsReviews";

pub const CITY_ENTITY: &str = "builtin.geography.city";
pub const AIRPORT_ENTITY: &str = "AirportCode";
pub const HOTEL_ENTITY: &str = "Hotel";

pub const HELP_TEXT: &str = "Hi! Try asking me things like 'search hotels in Seattle', 'search hotels near LAX airport' or 'show me the reviews of The Bot Resort'";
pub const FALLBACK_TEXT: &str = "Sorry, we can't understand. Message is sent to our support team via email. Thank you for your enquiry.";
pub const OVERSEAS_FAIRS_TEXT: &str = "You can find HKTDC Worldwide Trade Events by clicking [here](http://www.hktdc.com/info/trade-events/ci/TDCWORLD-upcoming/en/HKTDC-Worldwide-Trade-Events.html).";
pub const DESTINATION_PROMPT: &str = "Please enter your destination";
pub const DESTINATION_REMINDER: &str = "Please provide a destination";
pub const HOTEL_NAME_PROMPT: &str = "Which hotel would you like reviews for?";
pub const LOOKUP_FAILED_TEXT: &str =
    "Sorry, I could not find any results right now. Please try again later.";

const SEARCH_TYPE_KEY: &str = "searchType";
const DESTINATION_KEY: &str = "destination";
const HOTEL_NAME_KEY: &str = "hotelName";

pub fn default_registry() -> Result<DialogRegistry, RegistryError> {
    DialogRegistry::builder()
        .register(DialogDefinition::new(WELCOME, vec![welcome]))
        .register(DialogDefinition::new(FALLBACK, vec![not_understood]).triggered_by(NONE_INTENT))
        .register(
            DialogDefinition::new(OVERSEAS_FAIRS, vec![overseas_fairs]).triggered_by(OVERSEAS_FAIRS),
        )
        .register(DialogDefinition::new(HELP, vec![help]).triggered_by(HELP))
        .register(
            DialogDefinition::new(
                SEARCH_HOTELS,
                vec![search_destination, search_hotels, show_hotels],
            )
            .triggered_by(SEARCH_HOTELS)
            .on_interrupted(remind_destination),
        )
        .register(
            DialogDefinition::new(SHOW_REVIEWS, vec![review_target, search_reviews, show_reviews])
                .triggered_by(SHOW_REVIEWS)
                .on_interrupted(allow_topic_switch),
        )
        .fallback(FALLBACK)
        .build()
}

fn welcome(ctx: &mut StepContext<'_>, _input: StepInput) -> StepOutcome {
    let greeting = greeting_for_hour(ctx.local_hour);
    let line = pick_welcome_line(&mut *ctx.rng);
    ctx.outbox
        .typing()
        .pause(Duration::from_millis(2_000))
        .text(greeting)
        .typing()
        .pause(Duration::from_millis(3_000))
        .text(line);
    StepOutcome::end()
}

fn not_understood(ctx: &mut StepContext<'_>, _input: StepInput) -> StepOutcome {
    ctx.outbox.typing().text(FALLBACK_TEXT).pause(Duration::from_millis(3_000));
    StepOutcome::replace(WELCOME)
}

fn overseas_fairs(ctx: &mut StepContext<'_>, _input: StepInput) -> StepOutcome {
    ctx.outbox.typing().pause(Duration::from_millis(2_000)).text(OVERSEAS_FAIRS_TEXT);
    StepOutcome::end()
}

fn help(ctx: &mut StepContext<'_>, _input: StepInput) -> StepOutcome {
    ctx.outbox.text(HELP_TEXT);
    StepOutcome::end()
}

fn search_destination(ctx: &mut StepContext<'_>, input: StepInput) -> StepOutcome {
    ctx.outbox.text(format!(
        "Welcome to the Hotels finder! We are analyzing your message: '{}'",
        ctx.message.text
    ));

    let intent = input.intent();
    let matched = [(CITY_ENTITY, "city"), (AIRPORT_ENTITY, "airport")]
        .into_iter()
        .find_map(|(entity_type, search_type)| {
            intent.and_then(|intent| intent.entity(entity_type)).map(|entity| (entity, search_type))
        });

    match matched {
        Some((entity, search_type)) => {
            ctx.data.set(SEARCH_TYPE_KEY, search_type);
            StepOutcome::next_with(entity.value.clone())
        }
        None => StepOutcome::Prompt(DESTINATION_PROMPT.to_owned()),
    }
}

fn search_hotels(ctx: &mut StepContext<'_>, input: StepInput) -> StepOutcome {
    let destination = input.response().map(str::trim).unwrap_or_default().to_owned();
    if destination.is_empty() {
        ctx.outbox.text("I need a destination to look for hotels.");
        return StepOutcome::end();
    }

    let message = if ctx.data.get_str(SEARCH_TYPE_KEY) == Some("airport") {
        format!("Looking for hotels near {destination} airport...")
    } else {
        format!("Looking for hotels in {destination}...")
    };
    ctx.outbox.text(message);
    ctx.data.set(DESTINATION_KEY, destination.clone());

    StepOutcome::Lookup(LookupRequest::Hotels { destination })
}

fn show_hotels(ctx: &mut StepContext<'_>, input: StepInput) -> StepOutcome {
    match input {
        StepInput::Lookup(LookupResult::Hotels(hotels)) => {
            ctx.outbox.text(format!("I found {} hotels:", hotels.len()));
            if !hotels.is_empty() {
                ctx.outbox.carousel(carousel(&hotels));
            }
        }
        _ => {
            ctx.outbox.text(LOOKUP_FAILED_TEXT);
        }
    }
    StepOutcome::end()
}

fn remind_destination(ctx: &mut StepContext<'_>, _intent: &IntentResult) -> InterruptDecision {
    ctx.outbox.text(DESTINATION_REMINDER);
    InterruptDecision::Defer
}

fn review_target(_ctx: &mut StepContext<'_>, input: StepInput) -> StepOutcome {
    match input.intent().and_then(|intent| intent.entity(HOTEL_ENTITY)) {
        Some(hotel) => StepOutcome::next_with(hotel.value.clone()),
        None => StepOutcome::Prompt(HOTEL_NAME_PROMPT.to_owned()),
    }
}

fn search_reviews(ctx: &mut StepContext<'_>, input: StepInput) -> StepOutcome {
    let hotel_name = input.response().map(str::trim).unwrap_or_default().to_owned();
    if hotel_name.is_empty() {
        ctx.outbox.text("I need a hotel name to look for reviews.");
        return StepOutcome::end();
    }

    ctx.outbox.text(format!("Looking for reviews of '{hotel_name}'..."));
    ctx.data.set(HOTEL_NAME_KEY, hotel_name.clone());

    StepOutcome::Lookup(LookupRequest::Reviews { hotel_name })
}

fn show_reviews(ctx: &mut StepContext<'_>, input: StepInput) -> StepOutcome {
    match input {
        StepInput::Lookup(LookupResult::Reviews(reviews)) if reviews.is_empty() => {
            let hotel_name = ctx.data.get_str(HOTEL_NAME_KEY).unwrap_or("that hotel").to_owned();
            ctx.outbox.text(format!("I could not find any reviews for '{hotel_name}'."));
        }
        StepInput::Lookup(LookupResult::Reviews(reviews)) => {
            ctx.outbox.carousel(carousel(&reviews));
        }
        _ => {
            ctx.outbox.text(LOOKUP_FAILED_TEXT);
        }
    }
    StepOutcome::end()
}

fn allow_topic_switch(_ctx: &mut StepContext<'_>, _intent: &IntentResult) -> InterruptDecision {
    InterruptDecision::Proceed
}
