//! Booking-system signatures. The first capture group of a pattern is the provider's
//! identifier for the business; patterns without a group only prove presence.

#[derive(Debug, Clone, Copy)]
pub struct ProviderSignature {
    pub system_key: &'static str,
    pub detect_patterns: &'static [&'static str],
    pub priority: i32,
}

pub const PROVIDER_SIGNATURES: &[ProviderSignature] = &[
    ProviderSignature {
        system_key: "mindbody",
        detect_patterns: &[
            r#"(?i)healcode-widget[^>]*?data-widget-id=["']([a-z0-9]+)"#,
            r#"(?i)clients\.mindbodyonline\.com/[^"'\s]*?[?&]studioid=(\d+)"#,
            r#"(?i)brandedweb\.mindbodyonline\.com/[^"'\s]*?[?&]studioid=(\d+)"#,
            r#"(?i)widgets\.mindbodyonline\.com/widgets/[a-z_]+/([a-z0-9]+)"#,
            r"(?i)mindbodyonline\.com",
        ],
        priority: 100,
    },
    ProviderSignature {
        system_key: "wellnessliving",
        detect_patterns: &[
            r#"(?i)wellnessliving\.com/[^"'\s]*?[?&]k_business=(\d+)"#,
            r#"(?i)data-business-id=["'](\d+)["'][^>]*wellnessliving"#,
            r#"(?i)wellnessliving\.com/(?:schedule|catalog|appointment)/([a-z0-9_-]+)"#,
            r"(?i)wellnessliving\.com",
        ],
        priority: 95,
    },
    ProviderSignature {
        system_key: "janeapp",
        detect_patterns: &[r"(?i)https?://([a-z0-9-]+)\.janeapp\.com"],
        priority: 90,
    },
    ProviderSignature {
        system_key: "momence",
        detect_patterns: &[
            r#"(?i)momence\.com/plugin/[^"']*?["'][^>]*?data-host-id=["'](\d+)"#,
            r#"(?i)data-momence-host-id=["'](\d+)"#,
            r"(?i)momence\.com/s/(\d+)",
            r"(?i)momence\.com",
        ],
        priority: 85,
    },
    ProviderSignature {
        system_key: "marianatek",
        detect_patterns: &[
            r"(?i)https?://([a-z0-9-]+)\.marianatek\.com",
            r#"(?i)data-mariana-tenant=["']([a-z0-9-]+)"#,
        ],
        priority: 80,
    },
    ProviderSignature {
        system_key: "glofox",
        detect_patterns: &[r"(?i)app\.glofox\.com/portal/#/branch/([a-f0-9]+)"],
        priority: 75,
    },
    ProviderSignature {
        system_key: "acuity",
        detect_patterns: &[
            r"(?i)app\.acuityscheduling\.com/schedule\.php\?owner=(\d+)",
            r"(?i)https?://([a-z0-9-]+)\.as\.me",
        ],
        priority: 70,
    },
    ProviderSignature {
        system_key: "punchpass",
        detect_patterns: &[r"(?i)app\.punchpass\.com/org/(\d+)"],
        priority: 65,
    },
    ProviderSignature {
        system_key: "teamup",
        detect_patterns: &[r"(?i)goteamup\.com/p/(\d+)"],
        priority: 65,
    },
    ProviderSignature {
        system_key: "zenplanner",
        detect_patterns: &[r"(?i)https?://([a-z0-9-]+)\.sites\.zenplanner\.com"],
        priority: 60,
    },
    ProviderSignature {
        system_key: "vagaro",
        detect_patterns: &[r"(?i)vagaro\.com/([a-z0-9-]+)"],
        priority: 60,
    },
    ProviderSignature {
        system_key: "square",
        detect_patterns: &[r"(?i)squareup\.com/appointments/book/([a-z0-9]+)"],
        priority: 55,
    },
    ProviderSignature {
        system_key: "eventbrite",
        detect_patterns: &[r"(?i)eventbrite\.(?:com|ca|co\.uk)/[eo]/[a-z0-9-]+-(\d+)"],
        priority: 50,
    },
    ProviderSignature {
        system_key: "calendly",
        detect_patterns: &[r"(?i)calendly\.com/([a-z0-9_-]+)"],
        priority: 40,
    },
];
