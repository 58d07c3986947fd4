//! Graph API resource shapes. Only the `$select`-ed fields are modeled;
//! everything is optional because Graph omits empty properties.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphUser {
    pub id: String,
    pub user_principal_name: Option<String>,
    pub display_name: Option<String>,
    pub given_name: Option<String>,
    pub surname: Option<String>,
    pub mail: Option<String>,
    pub job_title: Option<String>,
    pub department: Option<String>,
    pub office_location: Option<String>,
    pub mobile_phone: Option<String>,
    #[serde(default)]
    pub business_phones: Vec<String>,
    pub company_name: Option<String>,
    pub city: Option<String>,
    pub account_enabled: Option<bool>,
}

impl GraphUser {
    /// Best phone number available: mobile first, then the first business line.
    pub fn phone(&self) -> Option<&str> {
        self.mobile_phone
            .as_deref()
            .or_else(|| self.business_phones.first().map(|s| s.as_str()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphGroup {
    pub id: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub mail: Option<String>,
    pub mail_enabled: Option<bool>,
    pub security_enabled: Option<bool>,
    #[serde(default)]
    pub group_types: Vec<String>,
    pub visibility: Option<String>,
}

/// Paged Graph collection; `@odata.nextLink` is present while more pages remain.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphList<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    pub subject: Option<String>,
    pub start: Option<DateTimeTimeZone>,
    pub end: Option<DateTimeTimeZone>,
    pub location: Option<EventLocation>,
    pub organizer: Option<Recipient>,
    pub is_all_day: Option<bool>,
    pub web_link: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateTimeTimeZone {
    pub date_time: String,
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLocation {
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub email_address: Option<EmailAddress>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailAddress {
    pub name: Option<String>,
    pub address: Option<String>,
}

/// Aggregate profile: each part is fetched best-effort and failures are
/// reported alongside the data instead of failing the whole lookup.
#[derive(Debug, Clone, Serialize)]
pub struct FullProfile {
    pub user: Option<GraphUser>,
    pub groups: Vec<GraphGroup>,
    pub manager: Option<GraphUser>,
    pub direct_reports: Vec<GraphUser>,
    pub errors: FullProfileErrors,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FullProfileErrors {
    pub user: Option<String>,
    pub groups: Option<String>,
    pub manager: Option<String>,
    pub direct_reports: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_user_deserializes_camel_case() {
        let json = r#"{
            "id": "guid-1",
            "userPrincipalName": "u03924@example.org",
            "displayName": "Jana Novotná",
            "givenName": "Jana",
            "surname": "Novotná",
            "jobTitle": "Referent",
            "businessPhones": ["+420 123 456 789"]
        }"#;
        let user: GraphUser = serde_json::from_str(json).unwrap();
        assert_eq!(user.id, "guid-1");
        assert_eq!(user.user_principal_name.as_deref(), Some("u03924@example.org"));
        assert_eq!(user.phone(), Some("+420 123 456 789"));
        assert!(user.mail.is_none());
    }

    #[test]
    fn test_phone_prefers_mobile() {
        let json = r#"{
            "id": "guid-1",
            "mobilePhone": "+420 777 000 111",
            "businessPhones": ["+420 123 456 789"]
        }"#;
        let user: GraphUser = serde_json::from_str(json).unwrap();
        assert_eq!(user.phone(), Some("+420 777 000 111"));
    }

    #[test]
    fn test_graph_list_next_link() {
        let json = r#"{
            "@odata.nextLink": "https://graph.microsoft.com/v1.0/users?$skiptoken=abc",
            "value": [{"id": "g1", "displayName": "Ekonomika"}]
        }"#;
        let list: GraphList<GraphGroup> = serde_json::from_str(json).unwrap();
        assert_eq!(list.value.len(), 1);
        assert!(list.next_link.is_some());
    }

    #[test]
    fn test_calendar_event_deserializes() {
        let json = r#"{
            "id": "ev1",
            "subject": "Porada",
            "isAllDay": false,
            "start": {"dateTime": "2025-03-01T09:00:00.0000000", "timeZone": "UTC"},
            "end": {"dateTime": "2025-03-01T10:00:00.0000000", "timeZone": "UTC"},
            "location": {"displayName": "Zasedačka 2"},
            "organizer": {"emailAddress": {"name": "Jana", "address": "jana@example.org"}}
        }"#;
        let event: CalendarEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.subject.as_deref(), Some("Porada"));
        assert_eq!(
            event.start.as_ref().map(|s| s.time_zone.as_deref()),
            Some(Some("UTC"))
        );
    }
}
