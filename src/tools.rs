use jsonschema::JSONSchema;
use log::{error, info};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::calendly::{event_type_id, CalendlyApi};
use crate::config::Credentials;
use crate::error::{CalendlyError, ErrorKind, Result};
use crate::models::{BookingIntent, BookingRequest, EventTypeSummary};

pub const LIST_EVENT_TYPES: &str = "list_event_types";
pub const BOOK_APPOINTMENT: &str = "book_appointment";

/// Envelope id used when a tool runs outside of a JSON-RPC request
pub const DEFAULT_ENVELOPE_ID: &str = "1";

/// Name, description and input schema of one tool, as listed by `tools/list`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// All tools this server offers
pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: LIST_EVENT_TYPES,
            description: "Returns all event types of the authenticated Calendly account.",
            input_schema: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        },
        ToolDefinition {
            name: BOOK_APPOINTMENT,
            description: "Prepares an appointment for an event type and returns the scheduling link \
                          the participant uses to confirm it.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "event_type_uri": {
                        "type": "string",
                        "title": "Event Type URI",
                        "description": "URI of the event type, e.g. https://api.calendly.com/event_types/123."
                    },
                    "name": {
                        "type": "string",
                        "title": "Name",
                        "description": "Participant name."
                    },
                    "email": {
                        "type": "string",
                        "title": "Email",
                        "description": "Participant email address."
                    },
                    "phone": {
                        "type": "string",
                        "title": "Phone",
                        "description": "Participant phone number (optional)."
                    },
                    "date": {
                        "type": "string",
                        "title": "Date",
                        "description": "Preferred date as YYYY-MM-DD (optional)."
                    },
                    "time": {
                        "type": "string",
                        "title": "Time",
                        "description": "Preferred time as HH:MM (optional)."
                    },
                    "notes": {
                        "type": "string",
                        "title": "Notes",
                        "description": "Notes for the appointment (optional)."
                    }
                },
                "required": ["event_type_uri", "name", "email"]
            }),
        },
    ]
}

/// Why a `tools/call` could not run the tool at all
#[derive(Debug, Error)]
pub enum ToolCallError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for {tool}: {}", .errors.join("; "))]
    InvalidArguments { tool: String, errors: Vec<String> },
}

/// Envelope produced by a tool, plus whether it reports a failure
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub payload: Value,
    pub is_error: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
}

impl From<&CalendlyError> for ErrorBody {
    fn from(err: &CalendlyError) -> Self {
        Self {
            message: err.to_string(),
            kind: err.kind(),
            status: err.status(),
        }
    }
}

/// `{"jsonrpc": "2.0", "result": [...], "id": ...}` or the same with `error`.
pub fn list_envelope(id: Value, outcome: Result<Vec<EventTypeSummary>>) -> ToolOutput {
    match outcome {
        Ok(event_types) => ToolOutput {
            payload: json!({ "jsonrpc": "2.0", "result": event_types, "id": id }),
            is_error: false,
        },
        Err(err) => ToolOutput {
            payload: json!({ "jsonrpc": "2.0", "error": ErrorBody::from(&err), "id": id }),
            is_error: true,
        },
    }
}

/// The booking intent itself, or `{"error": "...", "kind": "...", "status"?: ...}`.
pub fn booking_envelope(outcome: Result<BookingIntent>) -> ToolOutput {
    match outcome {
        Ok(intent) => ToolOutput {
            payload: json!(intent),
            is_error: false,
        },
        Err(err) => {
            let body = ErrorBody::from(&err);
            let mut payload = json!({ "error": body.message, "kind": body.kind });
            if let Some(status) = body.status {
                payload["status"] = json!(status);
            }
            ToolOutput {
                payload,
                is_error: true,
            }
        }
    }
}

/// Tool handlers on top of a [`CalendlyApi`]
pub struct CalendlyTools<A> {
    api: A,
    credentials: Credentials,
    definitions: Vec<ToolDefinition>,
    schemas: Vec<(&'static str, JSONSchema)>,
}

impl<A: CalendlyApi> CalendlyTools<A> {
    pub fn new(api: A, credentials: Credentials) -> Result<Self> {
        let definitions = definitions();
        let schemas = definitions
            .iter()
            .map(|def| {
                JSONSchema::compile(&def.input_schema)
                    .map(|schema| (def.name, schema))
                    .map_err(|e| CalendlyError::Config {
                        msg: format!("input schema of {} does not compile: {}", def.name, e),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            api,
            credentials,
            definitions,
            schemas,
        })
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    /// Check `arguments` against the tool's input schema.
    pub fn validate(&self, name: &str, arguments: &Value) -> Result<(), ToolCallError> {
        let (_, schema) = self
            .schemas
            .iter()
            .find(|(tool, _)| *tool == name)
            .ok_or_else(|| ToolCallError::UnknownTool(name.to_string()))?;

        if let Err(errors) = schema.validate(arguments) {
            let errors = errors.map(|e| e.to_string()).collect();
            return Err(ToolCallError::InvalidArguments {
                tool: name.to_string(),
                errors,
            });
        }
        Ok(())
    }

    /// Validate, run and wrap a tool call. `id` ends up in the list envelope.
    pub async fn call(
        &self,
        name: &str,
        arguments: Option<Value>,
        id: Value,
    ) -> Result<ToolOutput, ToolCallError> {
        let arguments = match arguments {
            None | Some(Value::Null) => json!({}),
            Some(arguments) => arguments,
        };
        self.validate(name, &arguments)?;

        info!("Running tool {}", name);
        let output = match name {
            LIST_EVENT_TYPES => list_envelope(id, self.list_event_types().await),
            BOOK_APPOINTMENT => {
                let request: BookingRequest = serde_json::from_value(arguments).map_err(|e| {
                    ToolCallError::InvalidArguments {
                        tool: name.to_string(),
                        errors: vec![e.to_string()],
                    }
                })?;
                booking_envelope(self.book_appointment(request).await)
            }
            other => return Err(ToolCallError::UnknownTool(other.to_string())),
        };
        Ok(output)
    }

    /// Event types of the account the token belongs to.
    pub async fn list_event_types(&self) -> Result<Vec<EventTypeSummary>> {
        let token = self.credentials.token().map_err(log_failure)?;

        let user = self.api.current_user(token).await.map_err(log_failure)?;
        let user_uri = user
            .uri
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| {
                log_failure(CalendlyError::MissingField {
                    field: "uri",
                    context: "current user".to_string(),
                })
            })?;
        info!("Fetching event types for user {}", user_uri);

        let event_types = self
            .api
            .event_types(token, &user_uri)
            .await
            .map_err(log_failure)?;
        info!("Found {} event types", event_types.len());

        Ok(event_types.into_iter().map(EventTypeSummary::from).collect())
    }

    /// Resolve the scheduling link for the requested event type.
    ///
    /// This does not create a booking in Calendly.
    pub async fn book_appointment(&self, request: BookingRequest) -> Result<BookingIntent> {
        let token = self.credentials.token().map_err(log_failure)?;

        let id = event_type_id(&request.event_type_uri).map_err(log_failure)?;
        let event_type = self.api.event_type(token, id).await.map_err(log_failure)?;

        let booking_link = event_type
            .scheduling_url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                log_failure(CalendlyError::MissingField {
                    field: "scheduling_url",
                    context: format!("event type {id}"),
                })
            })?;

        info!("Prepared booking link for event type {}", id);
        Ok(BookingIntent::new(request, event_type.name, booking_link))
    }
}

fn log_failure(err: CalendlyError) -> CalendlyError {
    error!("Tool failed ({:?}): {}", err.kind(), err);
    err
}
