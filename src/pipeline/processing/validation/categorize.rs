//! Keyword tables assigning category and event type to accepted listings.

use crate::domain::{contains_phrase, normalize_text};

pub const DEFAULT_CATEGORY: &str = "community";

pub struct CategoryRule {
    pub category: &'static str,
    pub keywords: &'static [&'static str],
}

pub struct EventTypeRule {
    pub event_type: &'static str,
    pub keywords: &'static [&'static str],
}

/// Checked in order; earlier rules win on ties ("kids yoga" is kids).
pub const CATEGORY_RULES: &[CategoryRule] = &[
    CategoryRule { category: "kids", keywords: &["kids", "kid's", "children", "toddler", "toddlers", "family", "teen", "teens", "youth", "baby", "parent and child"] },
    CategoryRule { category: "yoga", keywords: &["yoga", "vinyasa", "hatha", "yin", "ashtanga", "kundalini", "flow", "restorative", "asana", "iyengar"] },
    CategoryRule { category: "pilates", keywords: &["pilates", "reformer", "barre", "mat pilates"] },
    CategoryRule { category: "dance", keywords: &["dance", "salsa", "bachata", "ballet", "hip hop", "zumba", "tango", "swing", "contemporary", "jazz dance"] },
    CategoryRule { category: "martial-arts", keywords: &["karate", "jiu jitsu", "jiu-jitsu", "bjj", "judo", "taekwondo", "kickboxing", "muay thai", "boxing", "kung fu", "aikido", "self defense", "self-defense"] },
    CategoryRule { category: "fitness", keywords: &["hiit", "bootcamp", "boot camp", "spin", "cycling", "strength", "conditioning", "crossfit", "cardio", "circuit", "core", "run club", "sculpt"] },
    CategoryRule { category: "wellness", keywords: &["meditation", "breathwork", "sound bath", "reiki", "massage", "mindfulness", "wellness", "healing", "acupuncture", "sauna"] },
    CategoryRule { category: "music", keywords: &["music", "concert", "guitar", "piano", "choir", "drum", "drumming", "singing", "vocal", "dj", "jam"] },
    CategoryRule { category: "arts", keywords: &["art", "arts", "painting", "pottery", "ceramics", "drawing", "craft", "crafts", "sewing", "knitting", "photography", "printmaking", "watercolor"] },
    CategoryRule { category: "education", keywords: &["lecture", "course", "seminar", "training", "certification", "teacher training", "study", "language", "coding", "talk"] },
    CategoryRule { category: "community", keywords: &["market", "meetup", "social", "potluck", "fundraiser", "festival", "celebration", "open house", "party", "gathering"] },
];

pub const EVENT_TYPE_RULES: &[EventTypeRule] = &[
    EventTypeRule { event_type: "deal", keywords: &["deal", "discount", "% off", "special offer", "promo", "sale", "free trial", "intro offer", "bogo"] },
    EventTypeRule { event_type: "camp", keywords: &["camp", "day camp", "summer camp", "march break"] },
    EventTypeRule { event_type: "workshop", keywords: &["workshop", "masterclass", "master class", "intensive", "retreat", "immersion", "clinic", "seminar", "teacher training"] },
    EventTypeRule { event_type: "event", keywords: &["market", "festival", "party", "concert", "fundraiser", "open house", "celebration", "social", "meetup", "potluck", "show"] },
    EventTypeRule { event_type: "class", keywords: &["class", "classes", "lesson", "lessons", "session", "drop-in", "practice"] },
];

/// Categories whose unlabelled listings are classes rather than one-off events.
const CLASS_CATEGORIES: &[&str] = &["yoga", "pilates", "fitness", "dance", "martial-arts"];

/// Returns `(category, event_type)` for a listing.
pub fn categorize(title: &str, description: Option<&str>) -> (&'static str, &'static str) {
    let title = normalize_text(title);
    let description = description.map(normalize_text).unwrap_or_default();

    // title keywords outrank description keywords
    let category = [title.as_str(), description.as_str()]
        .iter()
        .find_map(|text| {
            CATEGORY_RULES
                .iter()
                .find(|rule| rule.keywords.iter().any(|kw| contains_phrase(text, kw)))
                .map(|rule| rule.category)
        })
        .unwrap_or(DEFAULT_CATEGORY);

    let event_type = [title.as_str(), description.as_str()]
        .iter()
        .find_map(|text| {
            EVENT_TYPE_RULES
                .iter()
                .find(|rule| rule.keywords.iter().any(|kw| contains_phrase(text, kw)))
                .map(|rule| rule.event_type)
        })
        .unwrap_or(if CLASS_CATEGORIES.contains(&category) { "class" } else { "event" });

    (category, event_type)
}
