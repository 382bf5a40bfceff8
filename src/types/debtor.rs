//! Debtor types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

// ============================================================================
// Option sets
// ============================================================================

pub const PRODUCT_OPTIONS: &[&str] = &[
    "KTA", "Credit Card", "Personal Loan", "Auto Loan", "Mortgage", "Paylater",
];

pub const STATUS_OPTIONS: &[&str] = &[
    "New",
    "Contacted",
    "Promise to Pay",
    "Partial Payment",
    "Paid",
    "Refused to Pay",
    "Unreachable",
    "Skip Trace",
];

/// Status that requires a future follow-up date
pub const STATUS_PROMISE_TO_PAY: &str = "Promise to Pay";

pub const FORECAST_OPTIONS: &[&str] = &["Collectable", "Potential", "Doubtful", "Uncollectable"];

pub const RELIGION_OPTIONS: &[&str] = &[
    "Islam", "Kristen Protestan", "Katolik", "Hindu", "Buddha", "Konghucu",
];

pub const MARITAL_STATUS_OPTIONS: &[&str] = &["Single", "Married", "Divorced", "Widowed"];

pub const SEX_OPTIONS: &[&str] = &["Male", "Female"];

/// Option set for an enumerated debtor field, keyed by wire name
pub fn options_for_field(field: &str) -> Option<&'static [&'static str]> {
    match field {
        "productName" => Some(PRODUCT_OPTIONS),
        "status" => Some(STATUS_OPTIONS),
        "forecast" => Some(FORECAST_OPTIONS),
        "religion" => Some(RELIGION_OPTIONS),
        "maritalStatus" => Some(MARITAL_STATUS_OPTIONS),
        "sex" => Some(SEX_OPTIONS),
        _ => None,
    }
}

// ============================================================================
// Stored entities
// ============================================================================

/// Emergency contact of a debtor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[sqlx(default)]
    pub id: Option<i64>,
    pub name: Option<String>,
    pub relationship: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// Bank account held by a debtor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BankAccount {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[sqlx(default)]
    pub id: Option<i64>,
    pub bank_name: Option<String>,
    pub account_number: Option<String>,
    pub account_holder: Option<String>,
}

/// Debtor entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Debtor {
    pub id: i64,

    // Personal
    pub first_name: String,
    pub last_name: Option<String>,
    pub national_id: Option<String>,
    pub date_of_birth: NaiveDate,
    pub sex: Option<String>,
    pub religion: Option<String>,
    pub marital_status: Option<String>,

    // Contact
    pub email: Option<String>,
    pub mobile_phones: Json<Vec<String>>,
    pub home_phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,

    // Employment
    pub company_name: Option<String>,
    pub job_title: Option<String>,
    pub office_address: Option<String>,
    pub office_phone: Option<String>,

    // Loan
    pub product_name: String,
    pub loan_account_number: Option<String>,
    pub principal_amount: f64,
    pub outstanding_amount: f64,
    pub last_payment_amount: f64,
    pub last_payment_date: Option<NaiveDate>,
    pub total_paid: Option<f64>,
    pub installment_amount: Option<f64>,
    pub tenor_months: Option<i32>,
    pub days_past_due: Option<i32>,

    // Collection
    pub status: Option<String>,
    pub forecast: Option<String>,
    pub next_follow_up_date: Option<DateTime<Utc>>,
    pub size: Option<String>,
    pub notes: Option<String>,
    pub collector_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[sqlx(skip)]
    pub relations: Vec<Relation>,
    #[sqlx(skip)]
    pub bank_accounts: Vec<BankAccount>,
}

/// Validated debtor ready to be stored
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebtorInput {
    pub first_name: String,
    pub last_name: Option<String>,
    pub national_id: Option<String>,
    pub date_of_birth: NaiveDate,
    pub sex: Option<String>,
    pub religion: Option<String>,
    pub marital_status: Option<String>,
    pub email: Option<String>,
    pub mobile_phones: Vec<String>,
    pub home_phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub company_name: Option<String>,
    pub job_title: Option<String>,
    pub office_address: Option<String>,
    pub office_phone: Option<String>,
    pub product_name: String,
    pub loan_account_number: Option<String>,
    pub principal_amount: f64,
    pub outstanding_amount: f64,
    pub last_payment_amount: f64,
    pub last_payment_date: Option<NaiveDate>,
    pub total_paid: Option<f64>,
    pub installment_amount: Option<f64>,
    pub tenor_months: Option<i32>,
    pub days_past_due: Option<i32>,
    pub status: Option<String>,
    pub forecast: Option<String>,
    pub next_follow_up_date: Option<DateTime<Utc>>,
    pub size: Option<String>,
    pub notes: Option<String>,
    pub collector_id: Option<String>,
    #[serde(rename = "Relations", alias = "relations", default)]
    pub relations: Vec<Relation>,
    #[serde(rename = "BankAccounts", alias = "bankAccounts", default)]
    pub bank_accounts: Vec<BankAccount>,
}

// ============================================================================
// Requests
// ============================================================================

/// Filters shared by debtor listing and distribution target selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebtorFilter {
    pub product_name: Option<String>,
    pub status: Option<String>,
    pub city: Option<String>,
    /// Matches first/last name, national id, email or loan account number
    pub search: Option<String>,
    pub collector_id: Option<String>,
    /// Only debtors without an assigned collector
    #[serde(default)]
    pub unassigned_only: bool,
}

/// Request for listing debtors with filters and sorting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDebtorsRequest {
    #[serde(default = "crate::types::messages::default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub filter: DebtorFilter,
    /// Sort by field: "id", "firstName", "outstandingAmount", "daysPastDue", "nextFollowUpDate"
    pub sort_by: Option<String>,
    /// Sort order: "asc", "desc"
    pub sort_order: Option<String>,
}

impl Default for ListDebtorsRequest {
    fn default() -> Self {
        Self {
            limit: crate::types::messages::default_limit(),
            offset: 0,
            filter: DebtorFilter::default(),
            sort_by: None,
            sort_order: None,
        }
    }
}

impl ListDebtorsRequest {
    pub const MAX_LIMIT: i64 = 500;

    /// Page size actually applied to the query
    pub fn page_limit(&self) -> i64 {
        self.limit.clamp(1, Self::MAX_LIMIT)
    }

    pub fn page_offset(&self) -> i64 {
        self.offset.max(0)
    }
}

/// Partial update of a debtor. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDebtorRequest {
    pub id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub national_id: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub sex: Option<String>,
    pub religion: Option<String>,
    pub marital_status: Option<String>,
    pub email: Option<String>,
    pub mobile_phones: Option<Vec<String>>,
    pub home_phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub company_name: Option<String>,
    pub job_title: Option<String>,
    pub office_address: Option<String>,
    pub office_phone: Option<String>,
    pub product_name: Option<String>,
    pub loan_account_number: Option<String>,
    pub principal_amount: Option<f64>,
    pub outstanding_amount: Option<f64>,
    pub last_payment_amount: Option<f64>,
    pub last_payment_date: Option<NaiveDate>,
    pub total_paid: Option<f64>,
    pub installment_amount: Option<f64>,
    pub tenor_months: Option<i32>,
    pub days_past_due: Option<i32>,
    pub status: Option<String>,
    pub forecast: Option<String>,
    pub next_follow_up_date: Option<DateTime<Utc>>,
    pub size: Option<String>,
    pub notes: Option<String>,
    pub collector_id: Option<String>,
}

impl UpdateDebtorRequest {
    /// Fields a collector may change on their own debtors
    pub const COLLECTOR_FIELDS: &'static [&'static str] =
        &["status", "forecast", "nextFollowUpDate", "notes"];

    /// Wire names of the fields carried by this patch
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        macro_rules! track {
            ($($field:ident => $name:literal),* $(,)?) => {
                $( if self.$field.is_some() { fields.push($name); } )*
            };
        }
        track!(
            first_name => "firstName",
            last_name => "lastName",
            national_id => "nationalId",
            date_of_birth => "dateOfBirth",
            sex => "sex",
            religion => "religion",
            marital_status => "maritalStatus",
            email => "email",
            mobile_phones => "mobilePhones",
            home_phone => "homePhone",
            address => "address",
            city => "city",
            postal_code => "postalCode",
            company_name => "companyName",
            job_title => "jobTitle",
            office_address => "officeAddress",
            office_phone => "officePhone",
            product_name => "productName",
            loan_account_number => "loanAccountNumber",
            principal_amount => "principalAmount",
            outstanding_amount => "outstandingAmount",
            last_payment_amount => "lastPaymentAmount",
            last_payment_date => "lastPaymentDate",
            total_paid => "totalPaid",
            installment_amount => "installmentAmount",
            tenor_months => "tenorMonths",
            days_past_due => "daysPastDue",
            status => "status",
            forecast => "forecast",
            next_follow_up_date => "nextFollowUpDate",
            size => "size",
            notes => "notes",
            collector_id => "collectorId",
        );
        fields
    }

    /// Fields outside the collector allowance
    pub fn fields_beyond_collector_scope(&self) -> Vec<&'static str> {
        self.changed_fields()
            .into_iter()
            .filter(|f| !Self::COLLECTOR_FIELDS.contains(f))
            .collect()
    }
}

/// Response after deleting a debtor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteDebtorResponse {
    pub id: i64,
    pub deleted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_for_field_covers_enumerated_fields() {
        for field in ["productName", "status", "forecast", "religion", "maritalStatus", "sex"] {
            assert!(options_for_field(field).is_some(), "{} should have options", field);
        }
        assert!(options_for_field("firstName").is_none());
    }

    #[test]
    fn test_promise_to_pay_is_a_status_option() {
        assert!(STATUS_OPTIONS.contains(&STATUS_PROMISE_TO_PAY));
    }

    #[test]
    fn test_list_paging_is_clamped() {
        let request = ListDebtorsRequest {
            limit: 10_000,
            offset: -3,
            ..Default::default()
        };
        assert_eq!(request.page_limit(), 500);
        assert_eq!(request.page_offset(), 0);

        let request = ListDebtorsRequest {
            limit: 0,
            ..Default::default()
        };
        assert_eq!(request.page_limit(), 1);
        assert_eq!(ListDebtorsRequest::default().page_limit(), 50);
    }

    #[test]
    fn test_changed_fields_lists_only_present_fields() {
        let patch = UpdateDebtorRequest {
            id: 1,
            status: Some("Contacted".to_string()),
            outstanding_amount: Some(10.0),
            ..Default::default()
        };
        assert_eq!(patch.changed_fields(), vec!["outstandingAmount", "status"]);
    }

    #[test]
    fn test_collector_scope_flags_financial_fields() {
        let patch = UpdateDebtorRequest {
            id: 1,
            status: Some("Contacted".to_string()),
            notes: Some("called twice".to_string()),
            ..Default::default()
        };
        assert!(patch.fields_beyond_collector_scope().is_empty());

        let patch = UpdateDebtorRequest {
            id: 1,
            principal_amount: Some(1.0),
            ..Default::default()
        };
        assert_eq!(patch.fields_beyond_collector_scope(), vec!["principalAmount"]);
    }

    #[test]
    fn test_debtor_input_serializes_nested_groups_under_group_names() {
        let input = DebtorInput {
            first_name: "Budi".to_string(),
            relations: vec![Relation { name: Some("Siti".to_string()), ..Default::default() }],
            ..Default::default()
        };
        let json = serde_json::to_value(&input).unwrap();
        assert!(json.get("Relations").is_some());
        assert!(json.get("BankAccounts").is_some());
        assert_eq!(json["firstName"], "Budi");
    }
}
