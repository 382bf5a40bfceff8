//! Debtor row validation
//!
//! Pure business-rule checks for one mapped (and nested-transformed) row.
//! Each field reports only the first rule it breaks.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::services::coercion::{parse_number, parse_plain_date};
use crate::types::{
    options_for_field, BankAccount, DebtorInput, Relation, UpdateDebtorRequest,
    STATUS_PROMISE_TO_PAY,
};

/// Field path -> first violated rule
pub type FieldErrors = BTreeMap<String, String>;

pub const MIN_AGE_YEARS: i32 = 18;

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\p{L} \-]+$").expect("valid name pattern"));

static PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\+62|62|08)\d{8,13}$").expect("valid phone pattern"));

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email pattern"));

/// Validate one row against the debtor rules, evaluated at `now`
pub fn validate_row(row: &Map<String, Value>, now: DateTime<Utc>) -> Result<DebtorInput, FieldErrors> {
    let mut reader = RowReader::new(row);
    let today = now.date_naive();

    let first_name = reader.first_name();
    let date_of_birth = reader.date_of_birth(today);
    let product_name = reader.required_option("productName");
    let mobile_phones = reader.mobile_phones();

    let outstanding_amount = reader.required_amount("outstandingAmount");
    let principal_amount = reader.required_amount("principalAmount");
    let last_payment_amount = reader.required_amount("lastPaymentAmount");
    let total_paid = reader.optional_amount("totalPaid");
    let installment_amount = reader.optional_amount("installmentAmount");
    let tenor_months = reader.optional_whole("tenorMonths");
    let days_past_due = reader.optional_whole("daysPastDue");

    let status = reader.optional_option("status");
    let forecast = reader.optional_option("forecast");
    let religion = reader.optional_option("religion");
    let marital_status = reader.optional_option("maritalStatus");
    let sex = reader.optional_option("sex");

    let next_follow_up_date = reader.next_follow_up(status.as_deref(), now);
    let email = reader.email();
    let last_payment_date = reader.optional_date("lastPaymentDate");

    let relations = reader.group("Relations", |item| Relation {
        id: None,
        name: text_of(item.get("name")),
        relationship: text_of(item.get("relationship")),
        phone: text_of(item.get("phone")),
        address: text_of(item.get("address")),
    });
    let bank_accounts = reader.group("BankAccounts", |item| BankAccount {
        id: None,
        bank_name: text_of(item.get("bankName")),
        account_number: text_of(item.get("accountNumber")),
        account_holder: text_of(item.get("accountHolder")),
    });

    let input = DebtorInput {
        first_name: first_name.unwrap_or_default(),
        last_name: reader.text("lastName"),
        national_id: reader.text("nationalId"),
        date_of_birth: date_of_birth.unwrap_or_default(),
        sex,
        religion,
        marital_status,
        email,
        mobile_phones,
        home_phone: reader.text("homePhone"),
        address: reader.text("address"),
        city: reader.text("city"),
        postal_code: reader.text("postalCode"),
        company_name: reader.text("companyName"),
        job_title: reader.text("jobTitle"),
        office_address: reader.text("officeAddress"),
        office_phone: reader.text("officePhone"),
        product_name: product_name.unwrap_or_default(),
        loan_account_number: reader.text("loanAccountNumber"),
        principal_amount: principal_amount.unwrap_or_default(),
        outstanding_amount: outstanding_amount.unwrap_or_default(),
        last_payment_amount: last_payment_amount.unwrap_or_default(),
        last_payment_date,
        total_paid,
        installment_amount,
        tenor_months,
        days_past_due,
        status,
        forecast,
        next_follow_up_date,
        size: reader.text("size"),
        notes: reader.text("notes"),
        collector_id: reader.text("collectorId"),
        relations,
        bank_accounts,
    };

    reader.finish(input)
}

/// Validate a partial update. Only the fields present are checked.
pub fn validate_patch(patch: &UpdateDebtorRequest, now: DateTime<Utc>) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();

    if let Some(ref name) = patch.first_name {
        if let Err(message) = check_first_name(name) {
            errors.insert("firstName".to_string(), message);
        }
    }

    if let Some(dob) = patch.date_of_birth {
        if age_on(dob, now.date_naive()) < MIN_AGE_YEARS {
            errors.insert("dateOfBirth".to_string(), format!("Debtor must be at least {} years old", MIN_AGE_YEARS));
        }
    }

    let enumerated = [
        ("productName", &patch.product_name),
        ("status", &patch.status),
        ("forecast", &patch.forecast),
        ("religion", &patch.religion),
        ("maritalStatus", &patch.marital_status),
        ("sex", &patch.sex),
    ];
    for (field, value) in enumerated {
        if let Some(value) = value {
            if let Err(message) = check_option(field, value) {
                errors.insert(field.to_string(), message);
            }
        }
    }

    let amounts = [
        ("principalAmount", patch.principal_amount),
        ("outstandingAmount", patch.outstanding_amount),
        ("lastPaymentAmount", patch.last_payment_amount),
        ("totalPaid", patch.total_paid),
        ("installmentAmount", patch.installment_amount),
    ];
    for (field, value) in amounts {
        if matches!(value, Some(v) if v < 0.0) {
            errors.insert(field.to_string(), "Must not be negative".to_string());
        }
    }

    let counts = [("tenorMonths", patch.tenor_months), ("daysPastDue", patch.days_past_due)];
    for (field, value) in counts {
        if matches!(value, Some(v) if v < 0) {
            errors.insert(field.to_string(), "Must not be negative".to_string());
        }
    }

    if let Some(ref email) = patch.email {
        if !email.trim().is_empty() && !EMAIL_PATTERN.is_match(email.trim()) {
            errors.insert("email".to_string(), "Invalid email address".to_string());
        }
    }

    if let Some(ref phones) = patch.mobile_phones {
        check_phones(phones, &mut errors);
    }

    if patch.status.as_deref() == Some(STATUS_PROMISE_TO_PAY) {
        match patch.next_follow_up_date {
            None => {
                errors.insert("nextFollowUpDate".to_string(), "Required when status is Promise to Pay".to_string());
            }
            Some(date) if date <= now => {
                errors.insert("nextFollowUpDate".to_string(), "Follow-up date must be in the future".to_string());
            }
            Some(_) => {}
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

// =============================================================================
// Rule helpers
// =============================================================================

fn check_first_name(name: &str) -> Result<String, String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Required".to_string());
    }
    if name.chars().count() < 2 {
        return Err("Must be at least 2 characters".to_string());
    }
    if !NAME_PATTERN.is_match(name) {
        return Err("Only letters, spaces and hyphens are allowed".to_string());
    }
    Ok(name.to_string())
}

fn check_option(field: &str, value: &str) -> Result<(), String> {
    let options = options_for_field(field).unwrap_or(&[]);
    if options.contains(&value) {
        Ok(())
    } else {
        Err(format!("Must be one of: {}", options.join(", ")))
    }
}

fn normalize_phone(raw: &str) -> String {
    raw.trim().replace([' ', '-', '(', ')', '.'], "")
}

/// Phone format per element plus duplicate detection across the list
fn check_phones(phones: &[String], errors: &mut FieldErrors) -> Vec<String> {
    let normalized: Vec<String> = phones.iter().map(|p| normalize_phone(p)).collect();

    if normalized.is_empty() {
        errors.insert("mobilePhones".to_string(), "At least one mobile phone is required".to_string());
        return normalized;
    }

    for (idx, phone) in normalized.iter().enumerate() {
        if !PHONE_PATTERN.is_match(phone) {
            errors
                .entry(format!("mobilePhones.{}", idx))
                .or_insert_with(|| format!("Invalid Indonesian mobile number: {}", phones[idx]));
        }
    }

    let mut seen = HashSet::new();
    for phone in &normalized {
        if !seen.insert(phone.as_str()) {
            errors
                .entry("mobilePhones".to_string())
                .or_insert_with(|| format!("Duplicate phone number: {}", phone));
            break;
        }
    }

    normalized
}

pub(crate) fn age_on(dob: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - dob.year();
    if (today.month(), today.day()) < (dob.month(), dob.day()) {
        age -= 1;
    }
    age
}

/// Accept `YYYY-MM-DD` (start of day, UTC) or RFC 3339
pub(crate) fn parse_follow_up(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    parse_plain_date(value)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Non-empty text of a scalar JSON value
fn text_of(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn is_absent(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        _ => false,
    }
}

// =============================================================================
// Row reader
// =============================================================================

/// Reads typed values out of a row while recording the first error per field
struct RowReader<'a> {
    row: &'a Map<String, Value>,
    errors: FieldErrors,
}

impl<'a> RowReader<'a> {
    fn new(row: &'a Map<String, Value>) -> Self {
        Self {
            row,
            errors: FieldErrors::new(),
        }
    }

    fn fail(&mut self, field: &str, message: impl Into<String>) {
        self.errors.entry(field.to_string()).or_insert_with(|| message.into());
    }

    fn finish(self, input: DebtorInput) -> Result<DebtorInput, FieldErrors> {
        if self.errors.is_empty() {
            Ok(input)
        } else {
            Err(self.errors)
        }
    }

    fn text(&self, field: &str) -> Option<String> {
        text_of(self.row.get(field))
    }

    fn first_name(&mut self) -> Option<String> {
        let raw = self.text("firstName").unwrap_or_default();
        match check_first_name(&raw) {
            Ok(name) => Some(name),
            Err(message) => {
                self.fail("firstName", message);
                None
            }
        }
    }

    fn date_of_birth(&mut self, today: NaiveDate) -> Option<NaiveDate> {
        let Some(raw) = self.text("dateOfBirth") else {
            self.fail("dateOfBirth", "Required");
            return None;
        };
        let Some(dob) = parse_plain_date(&raw) else {
            self.fail("dateOfBirth", format!("Invalid date: {}", raw));
            return None;
        };
        if age_on(dob, today) < MIN_AGE_YEARS {
            self.fail("dateOfBirth", format!("Debtor must be at least {} years old", MIN_AGE_YEARS));
            return None;
        }
        Some(dob)
    }

    fn optional_date(&mut self, field: &str) -> Option<NaiveDate> {
        let raw = self.text(field)?;
        match parse_plain_date(&raw) {
            Some(date) => Some(date),
            None => {
                self.fail(field, format!("Invalid date: {}", raw));
                None
            }
        }
    }

    fn required_option(&mut self, field: &str) -> Option<String> {
        match self.text(field) {
            None => {
                self.fail(field, "Required");
                None
            }
            Some(value) => self.member(field, value),
        }
    }

    fn optional_option(&mut self, field: &str) -> Option<String> {
        let value = self.text(field)?;
        self.member(field, value)
    }

    fn member(&mut self, field: &str, value: String) -> Option<String> {
        match check_option(field, &value) {
            Ok(()) => Some(value),
            Err(message) => {
                self.fail(field, message);
                None
            }
        }
    }

    fn number(&mut self, field: &str) -> Option<f64> {
        let value = match self.row.get(field) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .or_else(|| parse_number(s)),
            _ => None,
        }
        .filter(|v| v.is_finite());
        match value {
            Some(v) if v < 0.0 => {
                self.fail(field, "Must not be negative");
                None
            }
            Some(v) => Some(v),
            None => {
                self.fail(field, "Must be a number");
                None
            }
        }
    }

    fn required_amount(&mut self, field: &str) -> Option<f64> {
        if is_absent(self.row.get(field)) {
            self.fail(field, "Required");
            return None;
        }
        self.number(field)
    }

    fn optional_amount(&mut self, field: &str) -> Option<f64> {
        if is_absent(self.row.get(field)) {
            return None;
        }
        self.number(field)
    }

    fn optional_whole(&mut self, field: &str) -> Option<i32> {
        let value = self.optional_amount(field)?;
        if value.fract() != 0.0 || value > i32::MAX as f64 {
            self.fail(field, "Must be a whole number");
            return None;
        }
        Some(value as i32)
    }

    fn email(&mut self) -> Option<String> {
        let email = self.text("email")?;
        if EMAIL_PATTERN.is_match(&email) {
            Some(email.to_lowercase())
        } else {
            self.fail("email", "Invalid email address");
            None
        }
    }

    fn mobile_phones(&mut self) -> Vec<String> {
        let phones: Vec<String> = match self.row.get("mobilePhones") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.iter().filter_map(|v| text_of(Some(v))).collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect(),
            Some(other) => vec![other.to_string()],
        };
        check_phones(&phones, &mut self.errors)
    }

    fn next_follow_up(&mut self, status: Option<&str>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let raw = self.text("nextFollowUpDate");
        if status != Some(STATUS_PROMISE_TO_PAY) {
            return raw.as_deref().and_then(parse_follow_up);
        }

        let Some(raw) = raw else {
            self.fail("nextFollowUpDate", "Required when status is Promise to Pay");
            return None;
        };
        match parse_follow_up(&raw) {
            None => {
                self.fail("nextFollowUpDate", format!("Invalid date: {}", raw));
                None
            }
            Some(date) if date <= now => {
                self.fail("nextFollowUpDate", "Follow-up date must be in the future");
                None
            }
            Some(date) => Some(date),
        }
    }

    /// Shallow check of an optional nested group: members must be objects
    fn group<T>(&mut self, field: &str, build: impl Fn(&Map<String, Value>) -> T) -> Vec<T> {
        let items = match self.row.get(field) {
            None | Some(Value::Null) => return Vec::new(),
            Some(Value::Array(items)) => items,
            Some(_) => {
                self.fail(field, "Must be a list");
                return Vec::new();
            }
        };

        let mut built = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            match item {
                Value::Object(obj) => built.push(build(obj)),
                _ => self.fail(&format!("{}.{}", field, idx), "Must be an object"),
            }
        }
        built
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 9, 0, 0).unwrap()
    }

    fn valid_row() -> Map<String, Value> {
        json!({
            "firstName": "Budi",
            "lastName": "Santoso",
            "dateOfBirth": "1985-04-12",
            "productName": "KTA",
            "mobilePhones": ["081234567890"],
            "outstandingAmount": 5450000.5,
            "principalAmount": 10000000,
            "lastPaymentAmount": 0,
        })
        .as_object()
        .unwrap()
        .clone()
    }

    fn with(mut row: Map<String, Value>, field: &str, value: Value) -> Map<String, Value> {
        row.insert(field.to_string(), value);
        row
    }

    #[test]
    fn test_valid_row_passes() {
        let input = validate_row(&valid_row(), now()).unwrap();
        assert_eq!(input.first_name, "Budi");
        assert_eq!(input.mobile_phones, vec!["081234567890".to_string()]);
        assert_eq!(input.outstanding_amount, 5_450_000.5);
    }

    #[test]
    fn test_missing_first_name_fails_at_first_name() {
        let mut row = valid_row();
        row.remove("firstName");
        let errors = validate_row(&row, now()).unwrap_err();
        assert!(errors.contains_key("firstName"));
    }

    #[test]
    fn test_first_name_length_rule() {
        assert!(validate_row(&with(valid_row(), "firstName", json!("Jo")), now()).is_ok());

        let errors = validate_row(&with(valid_row(), "firstName", json!("J")), now()).unwrap_err();
        assert_eq!(errors["firstName"], "Must be at least 2 characters");
    }

    #[test]
    fn test_first_name_rejects_digits() {
        let errors = validate_row(&with(valid_row(), "firstName", json!("Budi 2")), now()).unwrap_err();
        assert_eq!(errors["firstName"], "Only letters, spaces and hyphens are allowed");
    }

    #[test]
    fn test_minor_is_rejected() {
        let errors = validate_row(&with(valid_row(), "dateOfBirth", json!("2010-01-01")), now()).unwrap_err();
        assert!(errors["dateOfBirth"].contains("18"));
    }

    #[test]
    fn test_unparseable_birth_date_is_rejected() {
        let errors = validate_row(&with(valid_row(), "dateOfBirth", json!("not-a-date")), now()).unwrap_err();
        assert!(errors["dateOfBirth"].starts_with("Invalid date"));
    }

    #[test]
    fn test_product_must_be_known() {
        let errors = validate_row(&with(valid_row(), "productName", json!("Leasing")), now()).unwrap_err();
        assert!(errors["productName"].starts_with("Must be one of"));
    }

    #[test]
    fn test_promise_to_pay_requires_follow_up() {
        let row = with(valid_row(), "status", json!("Promise to Pay"));
        let errors = validate_row(&row, now()).unwrap_err();
        assert!(errors.contains_key("nextFollowUpDate"));
    }

    #[test]
    fn test_promise_to_pay_rejects_past_follow_up() {
        let yesterday = (now() - Duration::days(1)).date_naive().to_string();
        let row = with(valid_row(), "status", json!("Promise to Pay"));
        let row = with(row, "nextFollowUpDate", json!(yesterday));
        let errors = validate_row(&row, now()).unwrap_err();
        assert_eq!(errors["nextFollowUpDate"], "Follow-up date must be in the future");
    }

    #[test]
    fn test_promise_to_pay_accepts_future_follow_up() {
        let tomorrow = (now() + Duration::days(1)).date_naive().to_string();
        let row = with(valid_row(), "status", json!("Promise to Pay"));
        let row = with(row, "nextFollowUpDate", json!(tomorrow));
        let input = validate_row(&row, now()).unwrap();
        assert!(input.next_follow_up_date.unwrap() > now());
    }

    #[test]
    fn test_follow_up_unconstrained_for_other_status() {
        let row = with(valid_row(), "status", json!("Contacted"));
        let row = with(row, "nextFollowUpDate", json!("2001-01-01"));
        assert!(validate_row(&row, now()).is_ok());
    }

    #[test]
    fn test_duplicate_phones_fail() {
        let row = with(valid_row(), "mobilePhones", json!(["081234567890", "081234567890"]));
        let errors = validate_row(&row, now()).unwrap_err();
        assert!(errors["mobilePhones"].starts_with("Duplicate phone number"));
    }

    #[test]
    fn test_distinct_phones_pass() {
        let row = with(valid_row(), "mobilePhones", json!(["081234567890", "081234567891"]));
        assert!(validate_row(&row, now()).is_ok());
    }

    #[test]
    fn test_phone_prefixes() {
        for phone in ["+6281234567890", "6281234567890", "0812345678"] {
            let row = with(valid_row(), "mobilePhones", json!([phone]));
            assert!(validate_row(&row, now()).is_ok(), "{} should be accepted", phone);
        }
        let row = with(valid_row(), "mobilePhones", json!(["0712345678"]));
        let errors = validate_row(&row, now()).unwrap_err();
        assert!(errors.contains_key("mobilePhones.0"));
    }

    #[test]
    fn test_at_least_one_phone() {
        let row = with(valid_row(), "mobilePhones", json!([]));
        let errors = validate_row(&row, now()).unwrap_err();
        assert_eq!(errors["mobilePhones"], "At least one mobile phone is required");
    }

    #[test]
    fn test_required_amounts() {
        let mut row = valid_row();
        row.remove("principalAmount");
        let row = with(row, "outstandingAmount", json!(-5));
        let errors = validate_row(&row, now()).unwrap_err();
        assert_eq!(errors["principalAmount"], "Required");
        assert_eq!(errors["outstandingAmount"], "Must not be negative");
    }

    #[test]
    fn test_non_finite_amounts_are_not_numbers() {
        for raw in ["NaN", "inf", "infinity", "-inf"] {
            let errors = validate_row(&with(valid_row(), "outstandingAmount", json!(raw)), now()).unwrap_err();
            assert_eq!(errors["outstandingAmount"], "Must be a number", "input {:?}", raw);
        }
        let input = validate_row(&with(valid_row(), "outstandingAmount", json!("5.450.000,50")), now()).unwrap();
        assert_eq!(input.outstanding_amount, 5_450_000.5);
    }

    #[test]
    fn test_optional_amount_must_be_non_negative() {
        assert!(validate_row(&with(valid_row(), "totalPaid", json!(250000)), now()).is_ok());
        let errors = validate_row(&with(valid_row(), "totalPaid", json!(-1)), now()).unwrap_err();
        assert_eq!(errors["totalPaid"], "Must not be negative");
    }

    #[test]
    fn test_whole_number_fields() {
        let errors = validate_row(&with(valid_row(), "tenorMonths", json!(12.5)), now()).unwrap_err();
        assert_eq!(errors["tenorMonths"], "Must be a whole number");
    }

    #[test]
    fn test_enumerated_fields_allow_empty() {
        let row = with(valid_row(), "religion", json!(""));
        let row = with(row, "sex", json!("Female"));
        let input = validate_row(&row, now()).unwrap();
        assert!(input.religion.is_none());
        assert_eq!(input.sex.as_deref(), Some("Female"));

        let errors = validate_row(&with(valid_row(), "maritalStatus", json!("Complicated")), now()).unwrap_err();
        assert!(errors.contains_key("maritalStatus"));
    }

    #[test]
    fn test_nested_groups_are_shallow() {
        let row = with(valid_row(), "BankAccounts", json!([{ "bankName": "BCA", "accountNumber": 1234567 }]));
        let row = with(row, "Relations", json!([{}]));
        let input = validate_row(&row, now()).unwrap();
        assert_eq!(input.bank_accounts[0].bank_name.as_deref(), Some("BCA"));
        assert_eq!(input.bank_accounts[0].account_number.as_deref(), Some("1234567"));
        assert_eq!(input.relations.len(), 1);

        let row = with(valid_row(), "Relations", json!(["Siti"]));
        let errors = validate_row(&row, now()).unwrap_err();
        assert!(errors.contains_key("Relations.0"));
    }

    #[test]
    fn test_multiple_fields_reported_once_each() {
        let row = json!({ "firstName": "J" }).as_object().unwrap().clone();
        let errors = validate_row(&row, now()).unwrap_err();
        assert_eq!(errors["firstName"], "Must be at least 2 characters");
        for field in ["dateOfBirth", "productName", "mobilePhones", "outstandingAmount"] {
            assert!(errors.contains_key(field), "{} should be reported", field);
        }
    }

    #[test]
    fn test_patch_checks_only_present_fields() {
        let patch = UpdateDebtorRequest { id: 1, notes: Some("x".to_string()), ..Default::default() };
        assert!(validate_patch(&patch, now()).is_ok());

        let patch = UpdateDebtorRequest {
            id: 1,
            status: Some("Promise to Pay".to_string()),
            ..Default::default()
        };
        let errors = validate_patch(&patch, now()).unwrap_err();
        assert!(errors.contains_key("nextFollowUpDate"));

        let patch = UpdateDebtorRequest {
            id: 1,
            forecast: Some("Maybe".to_string()),
            total_paid: Some(-3.0),
            ..Default::default()
        };
        let errors = validate_patch(&patch, now()).unwrap_err();
        assert!(errors.contains_key("forecast"));
        assert!(errors.contains_key("totalPaid"));
    }

    #[test]
    fn test_age_on_birthday_boundary() {
        let dob = NaiveDate::from_ymd_opt(2007, 6, 10).unwrap();
        assert_eq!(age_on(dob, NaiveDate::from_ymd_opt(2025, 6, 10).unwrap()), 18);
        assert_eq!(age_on(dob, NaiveDate::from_ymd_opt(2025, 6, 9).unwrap()), 17);
    }
}
