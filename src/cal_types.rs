use serde::{Deserialize, Serialize};

/// Query string of `GET /v1/slots`.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityQuery<'a> {
    pub api_key: &'a str,
    pub event_type_id: String,
    pub start_time: &'a str,
    pub end_time: &'a str,
    pub time_zone: &'a str,
}

/// Body of `POST /v2/bookings`.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest<'a> {
    pub start: &'a str,
    pub attendee: Attendee<'a>,
    pub event_type_id: u64,
    pub event_type_slug: &'a str,
    pub organization_slug: &'a str,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Attendee<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub time_zone: &'a str,
    pub language: &'a str,
}

/// Arguments the model passes to `check_availability`.
#[derive(Deserialize, Debug)]
pub struct CheckAvailabilityArgs {
    pub start_time: String,
    pub end_time: String,
}

/// Arguments the model passes to `book_appointment`.
#[derive(Deserialize, Debug)]
pub struct BookAppointmentArgs {
    pub name: String,
    pub email: String,
    pub start_time: String,
}
