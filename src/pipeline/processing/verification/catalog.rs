//! Forbidden title patterns. Adding a pattern is a data change here, nothing else.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ForbiddenKind {
    /// Generic shapes language models produce when they invent a listing
    Hallucination,
    /// Site chrome and service copy mistaken for a listing
    Navigation,
}

#[derive(Debug, Clone, Copy)]
pub struct ForbiddenPattern {
    /// Matched against the normalized (lowercased, whitespace-collapsed) title
    pub pattern: &'static str,
    pub kind: ForbiddenKind,
    pub label: &'static str,
}

pub const FORBIDDEN_TITLES: &[ForbiddenPattern] = &[
    ForbiddenPattern {
        pattern: r"^(?:beginner|beginners|intermediate|advanced|all levels|gentle|power|hot|morning|evening|weekend|community|restorative|basic|general|regular|daily|weekly)'?s? (?:yoga|pilates|fitness|dance|barre|spin|meditation)(?: class(?:es)?| session(?:s)?)?$",
        kind: ForbiddenKind::Hallucination,
        label: "qualifier + discipline",
    },
    ForbiddenPattern {
        pattern: r"^(?:yoga|pilates|fitness|dance|barre|spin|meditation|group|private|drop-in|trial|intro) (?:class|classes|session|sessions|lesson|lessons)$",
        kind: ForbiddenKind::Hallucination,
        label: "generic class",
    },
    ForbiddenPattern {
        pattern: r"^open (?:gym|studio|mat|floor)$",
        kind: ForbiddenKind::Hallucination,
        label: "open facility",
    },
    ForbiddenPattern {
        pattern: r"^(?:yoga|pilates|fitness|dance|class|classes|event|events|workshop|workshops|session|sessions|training|schedule|program|programs|activity|activities|lesson|lessons|tbd|tba|untitled)$",
        kind: ForbiddenKind::Hallucination,
        label: "single generic word",
    },
    ForbiddenPattern {
        pattern: r"^(?:upcoming|sample|example|various|special|featured|new) (?:events?|classes|class|workshops?|sessions?)$",
        kind: ForbiddenKind::Hallucination,
        label: "placeholder listing",
    },
    ForbiddenPattern {
        pattern: r"^(?:contact(?: us)?|get in touch|our team|meet (?:the|our) (?:team|teachers|instructors|staff)|about(?: us)?|our story|work with us|careers|join (?:our|the) team|we'?re hiring)$",
        kind: ForbiddenKind::Navigation,
        label: "about/contact",
    },
    ForbiddenPattern {
        pattern: r"^(?:home|menu|pricing|prices|rates|memberships?|faqs?|gift cards?|shop|store|blog|news|newsletter|subscribe|sign ?up|sign ?in|log ?in|register|book now|book online|view (?:the )?schedule|full schedule|see all|learn more|read more)$",
        kind: ForbiddenKind::Navigation,
        label: "site navigation",
    },
    ForbiddenPattern {
        pattern: r"^(?:privacy(?: policy)?|terms(?: (?:of service|and conditions|& conditions))?|cancellation policy|accessibility|cookie policy)$",
        kind: ForbiddenKind::Navigation,
        label: "legal",
    },
];

static COMPILED: Lazy<Vec<(Regex, &'static ForbiddenPattern)>> = Lazy::new(|| {
    FORBIDDEN_TITLES
        .iter()
        .filter_map(|fp| match Regex::new(fp.pattern) {
            Ok(re) => Some((re, fp)),
            Err(e) => {
                tracing::error!("Invalid forbidden-title pattern '{}': {}", fp.label, e);
                None
            }
        })
        .collect()
});

/// First catalog entry matching an already-normalized title.
pub fn match_forbidden(normalized_title: &str) -> Option<&'static ForbiddenPattern> {
    COMPILED
        .iter()
        .find(|(re, _)| re.is_match(normalized_title))
        .map(|(_, fp)| *fp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_pattern_compiles() {
        assert_eq!(COMPILED.len(), FORBIDDEN_TITLES.len());
    }

    #[test]
    fn test_hallucination_shapes() {
        for title in ["beginner yoga class", "open gym", "workshop", "all levels pilates", "upcoming events"] {
            let hit = match_forbidden(title).unwrap_or_else(|| panic!("{title} should be forbidden"));
            assert_eq!(hit.kind, ForbiddenKind::Hallucination, "{title}");
        }
    }

    #[test]
    fn test_navigation_text() {
        for title in ["contact us", "our team", "work with us", "book now", "privacy policy"] {
            let hit = match_forbidden(title).unwrap_or_else(|| panic!("{title} should be forbidden"));
            assert_eq!(hit.kind, ForbiddenKind::Navigation, "{title}");
        }
    }

    #[test]
    fn test_real_titles_pass() {
        for title in ["sunrise flow", "yin & sound bath", "christmas market", "hot yoga 26+2 with jane", "barre basics"] {
            assert!(match_forbidden(title).is_none(), "{title} should be allowed");
        }
    }
}
