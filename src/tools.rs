use crate::cal_types::{BookAppointmentArgs, CheckAvailabilityArgs};
use crate::realtime_types::ToolDefinition;
use crate::scheduling::SchedulingClient;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{info, warn};

pub const CHECK_AVAILABILITY: &str = "check_availability";
pub const BOOK_APPOINTMENT: &str = "book_appointment";

/// The scheduling operations exposed to the model as callable tools.
#[derive(Clone)]
pub struct SchedulingTools {
    client: SchedulingClient,
}

impl SchedulingTools {
    pub fn new(client: SchedulingClient) -> Self {
        Self { client }
    }

    pub fn definitions() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                kind: "function".to_string(),
                name: CHECK_AVAILABILITY.to_string(),
                description: "Check Michele's free slots for a video call within a time window."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "start_time": {
                            "type": "string",
                            "description": "Window start, ISO-8601 with Europe/Rome offset"
                        },
                        "end_time": {
                            "type": "string",
                            "description": "Window end, ISO-8601 with Europe/Rome offset"
                        }
                    },
                    "required": ["start_time", "end_time"]
                }),
            },
            ToolDefinition {
                kind: "function".to_string(),
                name: BOOK_APPOINTMENT.to_string(),
                description: "Book a video call with Michele once the client confirmed \
                              slot and email."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "name": { "type": "string", "description": "Client full name" },
                        "email": { "type": "string", "description": "Confirmed client email" },
                        "start_time": {
                            "type": "string",
                            "description": "Chosen slot start, ISO-8601 with Europe/Rome offset"
                        }
                    },
                    "required": ["name", "email", "start_time"]
                }),
            },
        ]
    }

    /// Run the tool the model asked for.  The result is always a JSON value to hand back to the
    /// model, errors included.
    pub async fn dispatch(&self, name: &str, arguments: &str) -> Value {
        info!(tool=%name, "model requested tool call");
        match name {
            CHECK_AVAILABILITY => match parse_args::<CheckAvailabilityArgs>(name, arguments) {
                Ok(args) => {
                    self.client
                        .check_availability(&args.start_time, &args.end_time)
                        .await
                }
                Err(e) => e,
            },
            BOOK_APPOINTMENT => match parse_args::<BookAppointmentArgs>(name, arguments) {
                Ok(args) => {
                    self.client
                        .book_appointment(&args.name, &args.email, &args.start_time)
                        .await
                }
                Err(e) => e,
            },
            _ => {
                warn!(tool=%name, "model requested unknown tool");
                json!({ "error": format!("Unknown tool {name}") })
            }
        }
    }
}

fn parse_args<T: DeserializeOwned>(name: &str, arguments: &str) -> Result<T, Value> {
    serde_json::from_str(arguments).map_err(|e| {
        warn!(tool=%name, error=%e, arguments=%arguments, "failed to parse tool arguments");
        json!({ "error": format!("Invalid arguments for {name}") })
    })
}
