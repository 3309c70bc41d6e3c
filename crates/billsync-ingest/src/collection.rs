//! Static description of each collection kind: how to ask the portal for it,
//! where its rows live, and which parent it references.

use crate::normalize::ids::{self, BILL_ID_FIELDS, SURVEY_ID_FIELDS};
use billsync_common::types::CollectionKind;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    BigInt,
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub ty: ColumnType,
}

const fn text(name: &'static str) -> ColumnSpec {
    ColumnSpec {
        name,
        ty: ColumnType::Text,
    }
}

const fn bigint(name: &'static str) -> ColumnSpec {
    ColumnSpec {
        name,
        ty: ColumnType::BigInt,
    }
}

/// Target table with its upsert key
#[derive(Debug)]
pub struct TableSpec {
    pub name: &'static str,
    /// Natural key; the upsert conflict target
    pub key_columns: &'static [&'static str],
    pub columns: &'static [ColumnSpec],
    /// JSONB column that collects fields without a dedicated column
    pub extra_column: Option<&'static str>,
}

impl TableSpec {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}

/// Foreign reference that must resolve before a record may be written
#[derive(Debug)]
pub struct ParentRef {
    /// Field on the child record holding the parent key
    pub field: &'static str,
    pub table: &'static TableSpec,
    pub column: &'static str,
}

/// Everything the pipeline needs to know about one collection kind
#[derive(Debug)]
pub struct CollectionProfile {
    pub kind: CollectionKind,
    pub slug: &'static str,
    pub requesting_url: &'static str,
    /// `(key, label, visible)` triples echoed back as `displayedColumnsAll`
    pub display_columns: &'static [(&'static str, &'static str, bool)],
    /// Filter keys always sent, blank when the target does not set them
    pub filter_keys: &'static [&'static str],
    pub table: &'static TableSpec,
    pub parent: Option<ParentRef>,
    /// Fields holding the record's own id, in lookup order
    pub id_fields: &'static [&'static str],
}

impl CollectionProfile {
    /// The record's own numeric id, never its parent reference
    pub fn record_id(&self, raw: &Value) -> Option<i64> {
        ids::record_id(raw, self.id_fields)
    }
}

pub static SURVEY_UNITS: TableSpec = TableSpec {
    name: "survey_units",
    key_columns: &["survey_id"],
    columns: &[
        text("survey_id"),
        text("surveyor_name"),
        text("survey_date"),
        text("survey_time"),
        text("gps_lat"),
        text("gps_long"),
        text("gps_full_string"),
        text("district"),
        text("tehsil"),
        text("uc_name"),
        text("uc_type"),
        text("image_portal_url"),
        text("unit_specific_type"),
        text("survey_category"),
        text("survey_consumer_name"),
        text("survey_mobile"),
        text("survey_address"),
        text("house_type"),
        text("water_connection"),
        text("size_marla"),
        text("consumer_type"),
        text("additional_info"),
    ],
    extra_column: Some("answers"),
};

pub static BILLS: TableSpec = TableSpec {
    name: "bills",
    key_columns: &["psid", "bill_month"],
    columns: &[
        text("psid"),
        text("bill_month"),
        text("bill_id"),
        text("survey_id"),
        text("wmc"),
        text("division"),
        text("district"),
        text("tehsil"),
        text("office"),
        text("uc_name"),
        text("billing_category"),
        bigint("amount_due"),
        bigint("fine"),
        bigint("paid_amount"),
        text("channel"),
        text("paid_date"),
        text("status"),
        text("active"),
        text("bill_url"),
    ],
    extra_column: None,
};

static SURVEYS_PROFILE: CollectionProfile = CollectionProfile {
    kind: CollectionKind::Surveys,
    slug: "survey-submissions",
    requesting_url: "/survey-app/view/survey-submissions",
    display_columns: &[
        ("sr_no", "Sr#", true),
        ("added_by", "Submitted By", true),
        ("id", "Survey ID", true),
        ("district_id", "District", true),
        ("tehsil_id", "Tehsil", true),
        ("uc_type", "UC Type", true),
        ("village_id", "Village/Beat", true),
        ("uc_id", "UC", true),
        ("location", "Location", true),
        ("answers_table", "Answers", true),
        ("billers_list", "Total Billers", true),
        ("new_str", "Attachment", true),
        ("added_by_str", "Added By", false),
        ("added_date_time", "Added Date&Time", false),
        ("app_version", "App Version", true),
        ("action", "Action", true),
    ],
    filter_keys: &["district_id", "tehsil_id", "uc_id"],
    table: &SURVEY_UNITS,
    parent: None,
    id_fields: SURVEY_ID_FIELDS,
};

static BILLS_PROFILE: CollectionProfile = CollectionProfile {
    kind: CollectionKind::Bills,
    slug: "suthra-punjab-bills",
    requesting_url: "/suthra-billing/view/suthra-punjab-bills",
    display_columns: &[
        ("sr_no", "Sr#", true),
        ("print_serial", "PDF JOB ID", true),
        ("psid", "PSID", true),
        ("month_str", "Month", true),
        ("attached_department_id", "WMC", true),
        ("division_id", "Division", true),
        ("district_id", "District", true),
        ("tehsil_id", "Tehsil", true),
        ("office_id", "Office", true),
        ("uc_id", "UC", true),
        ("biller_category_id", "Billing Category", true),
        ("amount", "Amount", true),
        ("fine", "Fine", true),
        ("bill_url", "Bill PDF", true),
        ("channel", "Channel", true),
        ("paid_date", "Paid Date", true),
        ("paid_amount", "Paid Amount", true),
        ("status", "Status", true),
        ("active", "Active", true),
        ("action", "Action", true),
    ],
    filter_keys: &["status", "division_id", "district_id", "office_id", "uc_id", "active"],
    table: &BILLS,
    parent: Some(ParentRef {
        field: "survey_id",
        table: &SURVEY_UNITS,
        column: "survey_id",
    }),
    id_fields: BILL_ID_FIELDS,
};

pub fn profile(kind: CollectionKind) -> &'static CollectionProfile {
    match kind {
        CollectionKind::Surveys => &SURVEYS_PROFILE,
        CollectionKind::Bills => &BILLS_PROFILE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_columns_are_columns() {
        for table in [&SURVEY_UNITS, &BILLS] {
            for key in table.key_columns {
                assert!(table.has_column(key), "{} missing key {}", table.name, key);
            }
        }
    }

    #[test]
    fn test_bills_reference_survey_units() {
        let bills = profile(CollectionKind::Bills);
        let parent = bills.parent.as_ref().map(|p| (p.table.name, p.column));
        assert_eq!(parent, Some(("survey_units", "survey_id")));
        assert!(bills.table.has_column("survey_id"));
        assert!(profile(CollectionKind::Surveys).parent.is_none());
    }
}
