//! Supervisor/subordinate hierarchy (`25_uzivatele_hierarchie`) plus the
//! lokality/useky reference tables.
//!
//! A hierarchy row is live when `aktivni = 1` and the current date falls
//! inside `[dt_od, dt_do]` (NULL bounds are open). The JSON-encoded columns
//! (notification types, extended scopes) are parsed into the edge DTO that
//! the graph UI consumes and written back verbatim on save.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Raw hierarchy row as stored
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HierarchyEdgeRow {
    pub nadrizeny_id: u32,
    pub podrizeny_id: u32,
    pub typ_vztahu: String,
    pub uroven_opravneni: i32,
    pub viditelnost_objednavky: bool,
    pub viditelnost_faktury: bool,
    pub viditelnost_smlouvy: bool,
    pub viditelnost_pokladna: bool,
    pub viditelnost_uzivatele: bool,
    pub viditelnost_lp: bool,
    pub notifikace_email: bool,
    pub notifikace_inapp: bool,
    pub notifikace_typy: Option<String>,
    pub rozsirene_lokality: Option<String>,
    pub rozsirene_useky: Option<String>,
    pub dt_od: Option<NaiveDate>,
    pub dt_do: Option<NaiveDate>,
}

/// User row shaped for hierarchy listings (lokalita/usek joined in)
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HierarchyUserRow {
    pub id: u32,
    pub jmeno: Option<String>,
    pub prijmeni: Option<String>,
    pub email: Option<String>,
    pub pozice: Option<String>,
    pub lokalita: Option<String>,
    pub usek: Option<String>,
}

impl HierarchyUserRow {
    pub fn name(&self) -> String {
        format!(
            "{} {}",
            self.jmeno.as_deref().unwrap_or_default(),
            self.prijmeni.as_deref().unwrap_or_default()
        )
        .trim()
        .to_string()
    }

    pub fn initials(&self) -> String {
        let initials: String = [self.jmeno.as_deref(), self.prijmeni.as_deref()]
            .into_iter()
            .flatten()
            .filter_map(|s| s.chars().next())
            .flat_map(|c| c.to_uppercase())
            .collect();
        if initials.is_empty() {
            "?".to_string()
        } else {
            initials
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LocationRow {
    pub id: u32,
    pub nazev: String,
    pub adresa: Option<String>,
    pub user_count: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DepartmentRow {
    pub id: u32,
    pub nazev: String,
    pub popis: Option<String>,
    pub user_count: i64,
}

// DTOs for the graph UI

#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub position: String,
    pub location: String,
    pub department: String,
    pub initials: String,
    pub email: Option<String>,
}

const UNSPECIFIED: &str = "Neuvedeno";

impl From<HierarchyUserRow> for UserSummary {
    fn from(row: HierarchyUserRow) -> Self {
        Self {
            id: row.id.to_string(),
            name: row.name(),
            position: row.pozice.clone().unwrap_or_else(|| UNSPECIFIED.to_string()),
            location: row.lokalita.clone().unwrap_or_else(|| UNSPECIFIED.to_string()),
            department: row.usek.clone().unwrap_or_else(|| UNSPECIFIED.to_string()),
            initials: row.initials(),
            email: row.email,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HierarchyNode {
    pub id: String,
    pub name: String,
    pub position: String,
    pub initials: String,
    pub metadata: NodeMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeMetadata {
    pub location: String,
    pub department: String,
}

impl From<HierarchyUserRow> for HierarchyNode {
    fn from(row: HierarchyUserRow) -> Self {
        Self {
            id: row.id.to_string(),
            name: row.name(),
            position: row.pozice.clone().unwrap_or_else(|| UNSPECIFIED.to_string()),
            initials: row.initials(),
            metadata: NodeMetadata {
                location: row.lokalita.clone().unwrap_or_else(|| UNSPECIFIED.to_string()),
                department: row.usek.clone().unwrap_or_else(|| UNSPECIFIED.to_string()),
            },
        }
    }
}

/// One supervisor -> subordinate edge with its permission payload, in the
/// shape the graph editor sends and receives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyEdge {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type", default = "default_relation_type")]
    pub edge_type: String,
    #[serde(default)]
    pub permissions: EdgePermissions,
    #[serde(default)]
    pub validity: Validity,
}

fn default_relation_type() -> String {
    "prime".to_string()
}

impl HierarchyEdge {
    /// Parse the (supervisor, subordinate) endpoints out of the UI's string ids.
    pub fn endpoints(&self) -> Option<(u32, u32)> {
        Some((self.source.parse().ok()?, self.target.parse().ok()?))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgePermissions {
    #[serde(default = "default_permission_level")]
    pub level: i32,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub notifications: Notifications,
    #[serde(default)]
    pub extended: ExtendedScope,
}

impl Default for EdgePermissions {
    fn default() -> Self {
        Self {
            level: default_permission_level(),
            visibility: Visibility::default(),
            notifications: Notifications::default(),
            extended: ExtendedScope::default(),
        }
    }
}

fn default_permission_level() -> i32 {
    1
}

/// Per-domain visibility flags for the supervisor over the subordinate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Visibility {
    #[serde(default)]
    pub objednavky: bool,
    #[serde(default)]
    pub faktury: bool,
    #[serde(default)]
    pub smlouvy: bool,
    #[serde(default)]
    pub pokladna: bool,
    #[serde(default)]
    pub uzivatele: bool,
    #[serde(default)]
    pub lp: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Notifications {
    #[serde(default)]
    pub email: bool,
    #[serde(default)]
    pub inapp: bool,
    #[serde(default)]
    pub types: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtendedScope {
    #[serde(default)]
    pub locations: Vec<serde_json::Value>,
    #[serde(default)]
    pub departments: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Validity {
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
}

impl From<HierarchyEdgeRow> for HierarchyEdge {
    fn from(row: HierarchyEdgeRow) -> Self {
        Self {
            id: format!("e{}-{}", row.nadrizeny_id, row.podrizeny_id),
            source: row.nadrizeny_id.to_string(),
            target: row.podrizeny_id.to_string(),
            edge_type: row.typ_vztahu,
            permissions: EdgePermissions {
                level: row.uroven_opravneni,
                visibility: Visibility {
                    objednavky: row.viditelnost_objednavky,
                    faktury: row.viditelnost_faktury,
                    smlouvy: row.viditelnost_smlouvy,
                    pokladna: row.viditelnost_pokladna,
                    uzivatele: row.viditelnost_uzivatele,
                    lp: row.viditelnost_lp,
                },
                notifications: Notifications {
                    email: row.notifikace_email,
                    inapp: row.notifikace_inapp,
                    types: parse_json_list(row.notifikace_typy.as_deref()),
                },
                extended: ExtendedScope {
                    locations: parse_json_list(row.rozsirene_lokality.as_deref()),
                    departments: parse_json_list(row.rozsirene_useky.as_deref()),
                },
            },
            validity: Validity {
                from: row.dt_od,
                to: row.dt_do,
            },
        }
    }
}

/// Parse a JSON-encoded list column; malformed or NULL content becomes empty.
fn parse_json_list<T: serde::de::DeserializeOwned + Default>(raw: Option<&str>) -> T {
    raw.and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default()
}

/// Notification type descriptor for the hierarchy editor
#[derive(Debug, Clone, Serialize)]
pub struct NotificationType {
    pub id: &'static str,
    pub name: &'static str,
    pub category: &'static str,
}

/// Static catalog of notification types the editor can subscribe an edge to.
pub fn notification_types() -> Vec<NotificationType> {
    vec![
        NotificationType { id: "order_created", name: "Nová objednávka", category: "orders" },
        NotificationType { id: "order_approved", name: "Schválená objednávka", category: "orders" },
        NotificationType { id: "order_rejected", name: "Zamítnutá objednávka", category: "orders" },
        NotificationType { id: "invoice_created", name: "Nová faktura", category: "invoices" },
        NotificationType { id: "invoice_approved", name: "Schválená faktura", category: "invoices" },
        NotificationType { id: "invoice_paid", name: "Zaplacená faktura", category: "invoices" },
        NotificationType { id: "contract_expiring", name: "Vypršení smlouvy", category: "contracts" },
        NotificationType { id: "contract_created", name: "Nová smlouva", category: "contracts" },
        NotificationType { id: "budget_warning", name: "Upozornění na rozpočet", category: "finance" },
        NotificationType { id: "approval_required", name: "Vyžaduje schválení", category: "general" },
        NotificationType { id: "mention", name: "Zmínka v komentáři", category: "general" },
        NotificationType { id: "task_assigned", name: "Přiřazený úkol", category: "general" },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> HierarchyEdgeRow {
        HierarchyEdgeRow {
            nadrizeny_id: 3,
            podrizeny_id: 9,
            typ_vztahu: "prime".to_string(),
            uroven_opravneni: 2,
            viditelnost_objednavky: true,
            viditelnost_faktury: false,
            viditelnost_smlouvy: false,
            viditelnost_pokladna: true,
            viditelnost_uzivatele: false,
            viditelnost_lp: false,
            notifikace_email: true,
            notifikace_inapp: false,
            notifikace_typy: Some(r#"["order_created","order_approved"]"#.to_string()),
            rozsirene_lokality: Some("[1,4]".to_string()),
            rozsirene_useky: None,
            dt_od: NaiveDate::from_ymd_opt(2025, 1, 1),
            dt_do: None,
        }
    }

    #[test]
    fn test_edge_row_to_dto() {
        let edge = HierarchyEdge::from(sample_row());
        assert_eq!(edge.id, "e3-9");
        assert_eq!(edge.source, "3");
        assert_eq!(edge.target, "9");
        assert_eq!(edge.permissions.level, 2);
        assert!(edge.permissions.visibility.objednavky);
        assert!(edge.permissions.visibility.pokladna);
        assert!(!edge.permissions.visibility.faktury);
        assert_eq!(
            edge.permissions.notifications.types,
            vec!["order_created", "order_approved"]
        );
        assert_eq!(edge.permissions.extended.locations.len(), 2);
        assert!(edge.permissions.extended.departments.is_empty());
        assert_eq!(edge.validity.from, NaiveDate::from_ymd_opt(2025, 1, 1));
    }

    #[test]
    fn test_malformed_json_column_becomes_empty() {
        let mut row = sample_row();
        row.notifikace_typy = Some("not-json".to_string());
        let edge = HierarchyEdge::from(row);
        assert!(edge.permissions.notifications.types.is_empty());
    }

    #[test]
    fn test_edge_deserializes_with_defaults() {
        // Minimal payload the editor may send for a fresh edge
        let edge: HierarchyEdge =
            serde_json::from_str(r#"{"source": "1", "target": "2"}"#).unwrap();
        assert_eq!(edge.edge_type, "prime");
        assert_eq!(edge.permissions.level, 1);
        assert!(!edge.permissions.visibility.objednavky);
        assert_eq!(edge.endpoints(), Some((1, 2)));
    }

    #[test]
    fn test_edge_type_field_renames_to_type() {
        let edge: HierarchyEdge =
            serde_json::from_str(r#"{"source": "1", "target": "2", "type": "zastup"}"#).unwrap();
        assert_eq!(edge.edge_type, "zastup");
        let json = serde_json::to_value(&edge).unwrap();
        assert_eq!(json["type"], "zastup");
    }

    #[test]
    fn test_non_numeric_endpoints_rejected() {
        let edge: HierarchyEdge =
            serde_json::from_str(r#"{"source": "abc", "target": "2"}"#).unwrap();
        assert_eq!(edge.endpoints(), None);
    }

    #[test]
    fn test_notification_catalog() {
        let types = notification_types();
        assert_eq!(types.len(), 12);
        assert!(types.iter().any(|t| t.id == "order_created"));
        assert!(types.iter().all(|t| !t.category.is_empty()));
    }

    #[test]
    fn test_user_row_formatting() {
        let row = HierarchyUserRow {
            id: 5,
            jmeno: Some("Petr".to_string()),
            prijmeni: Some("Svoboda".to_string()),
            email: Some("ps@example.org".to_string()),
            pozice: None,
            lokalita: Some("Brno".to_string()),
            usek: None,
        };
        let summary = UserSummary::from(row);
        assert_eq!(summary.name, "Petr Svoboda");
        assert_eq!(summary.initials, "PS");
        assert_eq!(summary.position, "Neuvedeno");
        assert_eq!(summary.location, "Brno");
        assert_eq!(summary.department, "Neuvedeno");
    }
}
