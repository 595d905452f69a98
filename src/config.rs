use chrono::Duration;
use validator::Validate;

use crate::bookings::rules::BookingRules;

#[derive(Deserialize, Debug, Validate)]
pub struct Config {
    #[validate(length(min = 1))]
    database_url: String,
    api_host: Option<String>,
    api_port: Option<u16>,
    #[serde(default = "default_max_connections")]
    #[validate(range(min = 1, max = 100))]
    database_max_connections: u32,
    redis_url: Option<String>,
    /// the lifetime of cached courts in seconds
    #[serde(default = "default_cache_ttl")]
    cache_ttl: usize,
    sentry_dsn: Option<String>,
    /// defaults to localhost, which shouldn't cause issues if you're using udp
    opentelemetry_endpoint: Option<String>,
    /// how long an access token stays valid
    #[serde(default = "default_token_ttl_hours")]
    #[validate(range(min = 1))]
    token_ttl_hours: i64,
    #[serde(default = "default_password_reset_ttl_minutes")]
    #[validate(range(min = 1))]
    password_reset_ttl_minutes: i64,
    #[serde(default = "default_booking_min_minutes")]
    #[validate(range(min = 1))]
    booking_min_minutes: i64,
    #[serde(default = "default_booking_max_minutes")]
    #[validate(range(min = 1))]
    booking_max_minutes: i64,
    #[serde(default = "default_booking_slot_minutes")]
    #[validate(range(min = 1, max = 60))]
    booking_slot_minutes: i64,
    #[serde(default = "default_booking_max_advance_days")]
    #[validate(range(min = 1))]
    booking_max_advance_days: i64,
    #[serde(default = "default_booking_cancellation_cutoff_hours")]
    #[validate(range(min = 0))]
    booking_cancellation_cutoff_hours: i64,
    #[serde(default = "default_max_shuttlecocks_per_booking")]
    max_shuttlecocks_per_booking: i32,
    /// the maximum amount of people in a queue session at once
    #[serde(default = "default_queue_max_entries")]
    #[validate(range(min = 2))]
    queue_max_entries: i64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_cache_ttl() -> usize {
    courtside_cache::DEFAULT_TTL
}

fn default_token_ttl_hours() -> i64 {
    24 * 30
}

fn default_password_reset_ttl_minutes() -> i64 {
    60
}

fn default_booking_min_minutes() -> i64 {
    BookingRules::default().min_minutes
}

fn default_booking_max_minutes() -> i64 {
    BookingRules::default().max_minutes
}

fn default_booking_slot_minutes() -> i64 {
    BookingRules::default().slot_minutes
}

fn default_booking_max_advance_days() -> i64 {
    BookingRules::default().max_advance_days
}

fn default_booking_cancellation_cutoff_hours() -> i64 {
    BookingRules::default().cancellation_cutoff_hours
}

fn default_max_shuttlecocks_per_booking() -> i32 {
    BookingRules::default().max_shuttlecocks
}

fn default_queue_max_entries() -> i64 {
    64
}

lazy_static! {
    static ref CONFIG: Config = match envy::from_env::<Config>() {
        Ok(config) => {
            match config.validate() {
                Ok(()) if config.booking_min_minutes > config.booking_max_minutes => {
                    panic!("BOOKING_MIN_MINUTES can't be larger than BOOKING_MAX_MINUTES")
                }
                Ok(()) => config,
                Err(e) => panic!("invalid environment variable: {}", e),
            }
        }
        Err(error) => panic!("Missing or incorrect environment variable: {}", error),
    };
}

impl Config {
    /// Load and validate the configuration, panics on a bad environment
    pub fn init() {
        lazy_static::initialize(&CONFIG);
    }

    pub fn database_url() -> &'static str {
        CONFIG.database_url.as_ref()
    }

    pub fn api_host() -> &'static str {
        match &CONFIG.api_host {
            Some(host) => host.as_ref(),
            None => "localhost",
        }
    }

    pub fn api_port() -> u16 {
        CONFIG.api_port.unwrap_or(8080)
    }

    pub fn database_max_connections() -> u32 {
        CONFIG.database_max_connections
    }

    pub fn redis_url() -> Option<&'static str> {
        CONFIG.redis_url.as_deref()
    }

    pub fn cache_ttl() -> usize {
        CONFIG.cache_ttl
    }

    pub fn sentry_dsn() -> Option<&'static str> {
        CONFIG.sentry_dsn.as_deref()
    }

    pub fn opentelemetry_endpoint() -> &'static str {
        match &CONFIG.opentelemetry_endpoint {
            Some(endpoint) => endpoint.as_ref(),
            None => "127.0.0.1:6831",
        }
    }

    pub fn token_ttl() -> Duration {
        Duration::hours(CONFIG.token_ttl_hours)
    }

    pub fn password_reset_ttl() -> Duration {
        Duration::minutes(CONFIG.password_reset_ttl_minutes)
    }

    pub fn booking_rules() -> BookingRules {
        BookingRules {
            min_minutes: CONFIG.booking_min_minutes,
            max_minutes: CONFIG.booking_max_minutes,
            slot_minutes: CONFIG.booking_slot_minutes,
            max_advance_days: CONFIG.booking_max_advance_days,
            cancellation_cutoff_hours: CONFIG.booking_cancellation_cutoff_hours,
            max_shuttlecocks: CONFIG.max_shuttlecocks_per_booking,
        }
    }

    pub fn queue_max_entries() -> i64 {
        CONFIG.queue_max_entries
    }
}
