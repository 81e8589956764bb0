//! Typed views of the record collections.
//!
//! Every write is decoded into its collection's model and validated before it
//! reaches storage. Fields a model does not name are kept in `extra`, so the
//! stored document is never narrowed by the type.

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{FieldError, RefKeeperError, Result};
use crate::types::{Collection, ObjectId, Record};

/// A record type bound to one collection.
pub trait Model: Serialize + DeserializeOwned {
    const COLLECTION: Collection;

    /// Field-level problems that serde cannot express.
    fn validate(&self) -> Vec<FieldError>;
}

/// Treats an explicit `null` like an absent field.
fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts a string or a number (phone numbers arrive both ways).
fn string_like<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {other}"
        ))),
    }
}

fn require(errors: &mut Vec<FieldError>, field: &str, value: Option<&str>) {
    if value.map_or(true, |v| v.trim().is_empty()) {
        errors.push(FieldError::new(field, "is required"));
    }
}

fn check_email(errors: &mut Vec<FieldError>, field: &str, value: Option<&str>) {
    if let Some(email) = value.map(str::trim).filter(|e| !e.is_empty()) {
        let valid = email
            .split_once('@')
            .is_some_and(|(user, domain)| !user.is_empty() && domain.contains('.'));
        if !valid {
            errors.push(FieldError::new(field, "is not a valid email address"));
        }
    }
}

// ---------------------------------------------------------------------------
// Shared sub-documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub country: Option<ObjectId>,
    pub state: Option<ObjectId>,
    pub city: Option<ObjectId>,
    pub tehsil: Option<ObjectId>,
    pub post_office: Option<ObjectId>,
    pub location: Option<ObjectId>,
    #[serde(flatten)]
    pub extra: Record,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Phone {
    #[serde(default, alias = "phoneNumber", deserialize_with = "string_like")]
    pub number: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub extra: Record,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Email {
    pub address: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub extra: Record,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Education {
    pub education: Option<ObjectId>,
    pub degree: Option<ObjectId>,
    #[serde(flatten)]
    pub extra: Record,
}

fn check_emails(errors: &mut Vec<FieldError>, emails: &[Email]) {
    for (index, email) in emails.iter().enumerate() {
        check_email(errors, &format!("emails[{index}].address"), email.address.as_deref());
    }
}

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub name: Option<String>,
    pub surname: Option<String>,
    pub title: Option<ObjectId>,
    pub country_code: Option<ObjectId>,
    #[serde(default, deserialize_with = "nullable")]
    pub phones: Vec<Phone>,
    #[serde(default, deserialize_with = "nullable")]
    pub emails: Vec<Email>,
    pub profession_category: Option<ObjectId>,
    pub profession_sub_category: Option<ObjectId>,
    pub designation: Option<ObjectId>,
    pub source: Option<ObjectId>,
    pub sub_source: Option<ObjectId>,
    pub owner: Option<ObjectId>,
    #[serde(default, deserialize_with = "nullable")]
    pub educations: Vec<Education>,
    pub personal_address: Option<Address>,
    pub correspondence_address: Option<Address>,
    #[serde(flatten)]
    pub extra: Record,
}

impl Model for Contact {
    const COLLECTION: Collection = Collection::Contacts;

    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        require(&mut errors, "name", self.name.as_deref());
        check_emails(&mut errors, &self.emails);
        errors
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub phones: Vec<Phone>,
    #[serde(default, deserialize_with = "nullable")]
    pub emails: Vec<Email>,
    pub company_type: Option<ObjectId>,
    pub industry: Option<ObjectId>,
    pub source: Option<ObjectId>,
    pub sub_source: Option<ObjectId>,
    pub owner: Option<ObjectId>,
    #[serde(default, deserialize_with = "nullable")]
    pub employees: Vec<ObjectId>,
    #[serde(flatten)]
    pub extra: Record,
}

impl Model for Company {
    const COLLECTION: Collection = Collection::Companies;

    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        require(&mut errors, "name", self.name.as_deref());
        check_emails(&mut errors, &self.emails);
        errors
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub name: Option<String>,
    pub developer_id: Option<ObjectId>,
    pub is_joint_venture: Option<bool>,
    #[serde(default, deserialize_with = "nullable")]
    pub category: Vec<ObjectId>,
    #[serde(default, deserialize_with = "nullable")]
    pub sub_category: Vec<ObjectId>,
    pub status: Option<ObjectId>,
    pub parking_type: Option<ObjectId>,
    #[serde(default, deserialize_with = "nullable")]
    pub assign: Vec<ObjectId>,
    #[serde(flatten)]
    pub extra: Record,
}

impl Model for Project {
    const COLLECTION: Collection = Collection::Projects;

    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        require(&mut errors, "name", self.name.as_deref());
        errors
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub project_id: Option<ObjectId>,
    pub block: Option<String>,
    #[serde(default, deserialize_with = "string_like")]
    pub unit_number: Option<String>,
    pub category: Option<ObjectId>,
    pub sub_category: Option<ObjectId>,
    pub intent: Option<ObjectId>,
    pub status: Option<ObjectId>,
    pub facing: Option<ObjectId>,
    #[serde(default, deserialize_with = "nullable")]
    pub owners: Vec<ObjectId>,
    #[serde(default, deserialize_with = "nullable")]
    pub associates: Vec<ObjectId>,
    pub assigned_to: Option<ObjectId>,
    #[serde(flatten)]
    pub extra: Record,
}

impl Model for InventoryItem {
    const COLLECTION: Collection = Collection::Inventory;

    fn validate(&self) -> Vec<FieldError> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub salutation: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "string_like")]
    pub mobile: Option<String>,
    pub email: Option<String>,
    pub requirement: Option<ObjectId>,
    pub sub_requirement: Option<ObjectId>,
    pub budget: Option<ObjectId>,
    pub location: Option<ObjectId>,
    pub source: Option<ObjectId>,
    pub status: Option<ObjectId>,
    #[serde(default, deserialize_with = "nullable")]
    pub property_type: Vec<ObjectId>,
    #[serde(default, deserialize_with = "nullable")]
    pub unit_type: Vec<ObjectId>,
    #[serde(default, deserialize_with = "nullable")]
    pub facing: Vec<ObjectId>,
    pub owner: Option<ObjectId>,
    #[serde(default, deserialize_with = "nullable")]
    pub contacts: Vec<ObjectId>,
    #[serde(flatten)]
    pub extra: Record,
}

impl Model for Lead {
    const COLLECTION: Collection = Collection::Leads;

    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        require(&mut errors, "firstName", self.first_name.as_deref());
        require(&mut errors, "mobile", self.mobile.as_deref());
        check_email(&mut errors, "email", self.email.as_deref());
        errors
    }
}

/// Pipeline stage of a deal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DealStage {
    #[default]
    Open,
    Quote,
    Negotiation,
    Booked,
    Closed,
    Cancelled,
    #[serde(rename = "Closed Won")]
    ClosedWon,
    #[serde(rename = "Closed Lost")]
    ClosedLost,
    Stalled,
}

impl DealStage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DealStage::Closed | DealStage::Cancelled | DealStage::ClosedWon | DealStage::ClosedLost
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyStructure {
    pub owner: Option<ObjectId>,
    pub buyer: Option<ObjectId>,
    pub channel_partner: Option<ObjectId>,
    #[serde(rename = "internalRM")]
    pub internal_rm: Option<ObjectId>,
    #[serde(flatten)]
    pub extra: Record,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub project_id: Option<ObjectId>,
    pub inventory_id: Option<ObjectId>,
    pub unit_type: Option<ObjectId>,
    pub property_type: Option<ObjectId>,
    pub intent: Option<ObjectId>,
    pub source: Option<ObjectId>,
    pub deal_type: Option<ObjectId>,
    pub transaction_type: Option<ObjectId>,
    pub stage: Option<DealStage>,
    pub deal_probability: Option<f64>,
    pub owner: Option<ObjectId>,
    pub associated_contact: Option<ObjectId>,
    pub party_structure: Option<PartyStructure>,
    pub assigned_to: Option<ObjectId>,
    #[serde(flatten)]
    pub extra: Record,
}

impl Model for Deal {
    const COLLECTION: Collection = Collection::Deals;

    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if let Some(p) = self.deal_probability {
            if !(0.0..=100.0).contains(&p) {
                errors.push(FieldError::new("dealProbability", "must be between 0 and 100"));
            }
        }
        errors
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Inactive,
    Suspended,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(alias = "fullName")]
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<ObjectId>,
    pub status: Option<UserStatus>,
    #[serde(flatten)]
    pub extra: Record,
}

impl Model for User {
    const COLLECTION: Collection = Collection::Users;

    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        require(&mut errors, "name", self.name.as_deref());
        require(&mut errors, "email", self.email.as_deref());
        check_email(&mut errors, "email", self.email.as_deref());
        errors
    }
}

// ---------------------------------------------------------------------------
// Decoding and validation
// ---------------------------------------------------------------------------

/// Decodes a record body into `T`, then runs its field checks.
pub fn decode<T: Model>(record: &Record) -> Result<T> {
    let model: T = serde_json::from_value(Value::Object(record.clone())).map_err(|e| {
        RefKeeperError::Validation {
            collection: T::COLLECTION.to_string(),
            errors: vec![FieldError::new("body", e.to_string())],
        }
    })?;
    let errors = model.validate();
    if !errors.is_empty() {
        return Err(RefKeeperError::Validation {
            collection: T::COLLECTION.to_string(),
            errors,
        });
    }
    Ok(model)
}

/// Validates a record body against the model of `collection`.
pub fn validate_record(collection: Collection, record: &Record) -> Result<()> {
    match collection {
        Collection::Contacts => decode::<Contact>(record).map(drop),
        Collection::Companies => decode::<Company>(record).map(drop),
        Collection::Projects => decode::<Project>(record).map(drop),
        Collection::Inventory => decode::<InventoryItem>(record).map(drop),
        Collection::Leads => decode::<Lead>(record).map(drop),
        Collection::Deals => decode::<Deal>(record).map(drop),
        Collection::Users => decode::<User>(record).map(drop),
    }
}
