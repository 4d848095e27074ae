use chrono::Timelike;
use rand::{Rng, RngCore};

pub const WELCOME_LINES: [&str; 3] = [
    "Welcome to the HKTDC bot. How can I help you?",
    "I am HKTDC Bot. Let me help you.",
    "What would you like to look for?",
];

pub fn greeting_for_hour(hour: u32) -> &'static str {
    match hour {
        0..=11 => "Good Morning ! ",
        12..=17 => "Good Afternoon ! ",
        _ => "Good Evening ! ",
    }
}

/// Uniform pick over [`WELCOME_LINES`]; the random source is supplied by the caller.
pub fn pick_welcome_line(rng: &mut dyn RngCore) -> &'static str {
    WELCOME_LINES[rng.gen_range(0..WELCOME_LINES.len())]
}

pub trait Clock: Send + Sync {
    fn local_hour(&self) -> u32;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn local_hour(&self) -> u32 {
        chrono::Local::now().hour()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub u32);

impl Clock for FixedClock {
    fn local_hour(&self) -> u32 {
        self.0
    }
}
