use serde::{Deserialize, Serialize};

/// Shown for event types that come back without a name
pub const UNNAMED_EVENT_TYPE: &str = "Untitled event";

/// Used as `event_name` in a booking when the event type has no name
pub const DEFAULT_EVENT_NAME: &str = "Appointment";

/// `{"resource": ...}` wrapper used by single-object endpoints
#[derive(Debug, Deserialize)]
pub struct Resource<T> {
    pub resource: T,
}

/// `{"collection": [...]}` wrapper used by list endpoints
#[derive(Debug, Deserialize)]
pub struct Collection<T> {
    #[serde(default = "Vec::new")]
    pub collection: Vec<T>,
}

/// Calendly user, as returned by `/users/me`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct User {
    #[serde(default)]
    pub uri: Option<String>,
}

/// Calendly event type
///
/// Everything is optional here; defaults are applied when projecting into
/// [`EventTypeSummary`] or [`BookingIntent`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EventType {
    #[serde(default)]
    pub uri: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Minutes
    #[serde(default)]
    pub duration: Option<u32>,

    #[serde(default)]
    pub scheduling_url: Option<String>,
}

/// The five fields `list_event_types` reports per event type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventTypeSummary {
    pub name: String,
    pub description: String,
    pub duration: u32,
    pub scheduling_url: String,
    pub uri: String,
}

impl From<EventType> for EventTypeSummary {
    fn from(event_type: EventType) -> Self {
        Self {
            name: event_type
                .name
                .unwrap_or_else(|| UNNAMED_EVENT_TYPE.to_string()),
            description: event_type.description.unwrap_or_default(),
            duration: event_type.duration.unwrap_or(0),
            scheduling_url: event_type.scheduling_url.unwrap_or_default(),
            uri: event_type.uri.unwrap_or_default(),
        }
    }
}

/// Arguments of `book_appointment`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingRequest {
    pub event_type_uri: String,
    pub name: String,
    pub email: String,

    #[serde(default)]
    pub phone: String,

    /// YYYY-MM-DD
    #[serde(default)]
    pub date: String,

    /// HH:MM
    #[serde(default)]
    pub time: String,

    #[serde(default)]
    pub notes: String,
}

impl BookingRequest {
    /// `"<date> <time>"` when both are given, empty otherwise.
    pub fn preferred_time(&self) -> String {
        if self.date.is_empty() || self.time.is_empty() {
            String::new()
        } else {
            format!("{} {}", self.date, self.time)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// What `book_appointment` hands back on success.
///
/// Nothing is booked upstream. The participant follows `booking_link` to pick
/// the actual slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingIntent {
    pub success: bool,
    pub message: String,
    pub booking_link: String,
    pub event_name: String,
    pub participant: Participant,
    pub preferred_time: String,
    pub notes: String,
}

impl BookingIntent {
    pub fn new(request: BookingRequest, event_name: Option<String>, booking_link: String) -> Self {
        let preferred_time = request.preferred_time();
        Self {
            success: true,
            message: format!("Appointment for {} ({}) noted", request.name, request.email),
            booking_link,
            event_name: event_name.unwrap_or_else(|| DEFAULT_EVENT_NAME.to_string()),
            participant: Participant {
                name: request.name,
                email: request.email,
                phone: request.phone,
            },
            preferred_time,
            notes: request.notes,
        }
    }
}
