use crate::cal_types::{Attendee, AvailabilityQuery, BookingRequest};
use crate::config::SchedulingConfig;
use crate::consts::{ATTENDEE_LANGUAGE, SCHEDULING_TIMEOUT, TIME_ZONE};

use serde_json::{json, Value};
use tracing::{debug, error};

/// Client for the two cal.com endpoints the assistant needs.  Neither call ever fails: whatever
/// goes wrong is logged and handed back to the model as `{"error": ...}` so the conversation can
/// carry on.  Nothing is retried.
#[derive(Clone)]
pub struct SchedulingClient {
    http_client: reqwest::Client,
    config: SchedulingConfig,
}

impl SchedulingClient {
    pub fn new(http_client: reqwest::Client, config: SchedulingConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }

    pub async fn check_availability(&self, start_time: &str, end_time: &str) -> Value {
        let url = format!("{}/v1/slots", self.config.api_base.trim_end_matches('/'));
        let query = AvailabilityQuery {
            api_key: &self.config.api_key,
            event_type_id: self.config.event_type_id.to_string(),
            start_time,
            end_time,
            time_zone: TIME_ZONE,
        };
        let request = self
            .http_client
            .get(url)
            .query(&query)
            .timeout(SCHEDULING_TIMEOUT);
        match send_for_json(request).await {
            Ok(body) => {
                debug!(response=%body, "availability api response");
                body
            }
            Err(e) => {
                error!(
                    error=%e,
                    start_time=%start_time,
                    end_time=%end_time,
                    "failed to check availability"
                );
                json!({ "error": "Unable to check availability" })
            }
        }
    }

    pub async fn book_appointment(&self, name: &str, email: &str, start_time: &str) -> Value {
        let url = format!("{}/v2/bookings", self.config.api_base.trim_end_matches('/'));
        let payload = BookingRequest {
            start: start_time,
            attendee: Attendee {
                name,
                email,
                time_zone: TIME_ZONE,
                language: ATTENDEE_LANGUAGE,
            },
            event_type_id: self.config.event_type_id,
            event_type_slug: &self.config.event_type_slug,
            organization_slug: &self.config.organization_slug,
        };
        let request = self
            .http_client
            .post(url)
            .header("cal-api-version", &self.config.api_version)
            .json(&payload)
            .timeout(SCHEDULING_TIMEOUT);
        match send_for_json(request).await {
            Ok(body) => {
                debug!(response=%body, "booking api response");
                body
            }
            Err(e) => {
                error!(error=%e, start_time=%start_time, "failed to book appointment");
                json!({ "error": "Unable to book appointment" })
            }
        }
    }
}

async fn send_for_json(request: reqwest::RequestBuilder) -> Result<Value, reqwest::Error> {
    request
        .send()
        .await?
        .error_for_status()?
        .json::<Value>()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(api_base: String) -> SchedulingClient {
        SchedulingClient::new(
            reqwest::Client::new(),
            SchedulingConfig {
                api_base,
                api_key: "cal_test".to_string(),
                event_type_id: 2_029_915,
                event_type_slug: "my-event-type".to_string(),
                organization_slug: "acme-corp".to_string(),
                api_version: "2024-08-13".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn availability_passes_response_through() {
        let server = MockServer::start().await;
        let slots = json!({ "slots": { "2026-10-20": [{ "time": "2026-10-20T09:00:00+02:00" }] } });
        Mock::given(method("GET"))
            .and(path("/v1/slots"))
            .and(query_param("apiKey", "cal_test"))
            .and(query_param("eventTypeId", "2029915"))
            .and(query_param("startTime", "2026-10-20T09:00:00+02:00"))
            .and(query_param("endTime", "2026-10-20T12:00:00+02:00"))
            .and(query_param("timeZone", "Europe/Rome"))
            .respond_with(ResponseTemplate::new(200).set_body_json(slots.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let body = client_for(server.uri())
            .check_availability("2026-10-20T09:00:00+02:00", "2026-10-20T12:00:00+02:00")
            .await;
        assert_eq!(body, slots);
    }

    #[tokio::test]
    async fn availability_error_status_becomes_error_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/slots"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let body = client_for(server.uri())
            .check_availability("2026-10-20T09:00:00+02:00", "2026-10-20T12:00:00+02:00")
            .await;
        assert_eq!(body, json!({ "error": "Unable to check availability" }));
    }

    #[tokio::test]
    async fn unreachable_provider_becomes_error_payload() {
        // nothing listens on the discard port
        let client = client_for("http://127.0.0.1:9".to_string());
        assert_eq!(
            client.check_availability("a", "b").await,
            json!({ "error": "Unable to check availability" })
        );
        assert_eq!(
            client.book_appointment("Mario", "mario@example.com", "c").await,
            json!({ "error": "Unable to book appointment" })
        );
    }

    #[tokio::test]
    async fn booking_sends_attendee_and_version_header() {
        let server = MockServer::start().await;
        let booked = json!({ "status": "success", "data": { "uid": "bk_1" } });
        Mock::given(method("POST"))
            .and(path("/v2/bookings"))
            .and(header("cal-api-version", "2024-08-13"))
            .and(body_json(json!({
                "start": "2026-10-20T09:00:00+02:00",
                "attendee": {
                    "name": "Mario Rossi",
                    "email": "mario.rossi@example.com",
                    "timeZone": "Europe/Rome",
                    "language": "it",
                },
                "eventTypeId": 2029915,
                "eventTypeSlug": "my-event-type",
                "organizationSlug": "acme-corp",
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(booked.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let body = client_for(server.uri())
            .book_appointment(
                "Mario Rossi",
                "mario.rossi@example.com",
                "2026-10-20T09:00:00+02:00",
            )
            .await;
        assert_eq!(body, booked);
    }

    #[tokio::test]
    async fn booking_rejection_becomes_error_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/bookings"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({ "message": "slot taken" })),
            )
            .mount(&server)
            .await;

        let body = client_for(server.uri())
            .book_appointment("Mario", "mario@example.com", "2026-10-20T09:00:00+02:00")
            .await;
        assert_eq!(body, json!({ "error": "Unable to book appointment" }));
    }
}
