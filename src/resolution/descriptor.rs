use serde::{Deserialize, Serialize};

use crate::types::Collection;

/// What a reference field points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RefTarget {
    /// A row of the shared reference table. Labels resolve through
    /// find-or-create; closed categories (`create_missing = false`) only find.
    Lookup {
        category: String,
        #[serde(default = "default_create_missing")]
        create_missing: bool,
    },
    /// Another record. Labels are matched against `match_fields` of the
    /// target collection and never create anything.
    Entity {
        collection: Collection,
        #[serde(default)]
        match_fields: Vec<String>,
    },
}

fn default_create_missing() -> bool {
    true
}

/// Declares one foreign-reference field inside a record.
///
/// `path` is dot-separated; arrays met on intermediate segments fan out over
/// their elements, so `educations.degree` addresses the `degree` of every
/// education entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub path: String,
    pub target: RefTarget,
    #[serde(default)]
    pub is_array: bool,
}

impl FieldDescriptor {
    /// A scalar reference into the lookup category `category`.
    pub fn lookup(path: &str, category: &str) -> Self {
        Self {
            path: path.to_string(),
            target: RefTarget::Lookup {
                category: category.to_string(),
                create_missing: true,
            },
            is_array: false,
        }
    }

    /// A scalar reference to a record of `collection`.
    pub fn entity(path: &str, collection: Collection) -> Self {
        Self {
            path: path.to_string(),
            target: RefTarget::Entity {
                collection,
                match_fields: Vec::new(),
            },
            is_array: false,
        }
    }

    /// Marks the field as holding an array of references.
    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }

    /// Turns off lazy creation for a lookup target.
    pub fn closed(mut self) -> Self {
        if let RefTarget::Lookup { create_missing, .. } = &mut self.target {
            *create_missing = false;
        }
        self
    }

    /// Lets an entity target accept labels matched against `fields`.
    pub fn matching(mut self, fields: &[&str]) -> Self {
        if let RefTarget::Entity { match_fields, .. } = &mut self.target {
            *match_fields = fields.iter().map(|f| f.to_string()).collect();
        }
        self
    }

    /// The lookup category, if this descriptor targets the reference table.
    pub fn category(&self) -> Option<&str> {
        match &self.target {
            RefTarget::Lookup { category, .. } => Some(category),
            RefTarget::Entity { .. } => None,
        }
    }
}

fn address_refs(prefix: &str) -> Vec<FieldDescriptor> {
    [
        ("country", "Country"),
        ("state", "State"),
        ("city", "City"),
        ("tehsil", "Tehsil"),
        ("postOffice", "PostOffice"),
        ("location", "Location"),
    ]
    .iter()
    .map(|(field, category)| FieldDescriptor::lookup(&format!("{prefix}.{field}"), category))
    .collect()
}

/// The built-in reference fields of each collection.
pub fn default_descriptors(collection: Collection) -> Vec<FieldDescriptor> {
    let user_ref = |path: &str| FieldDescriptor::entity(path, Collection::Users).matching(&["name", "email"]);

    match collection {
        Collection::Contacts => {
            let mut refs = vec![
                FieldDescriptor::lookup("title", "Title"),
                FieldDescriptor::lookup("countryCode", "CountryCode"),
                FieldDescriptor::lookup("professionCategory", "ProfessionCategory"),
                FieldDescriptor::lookup("professionSubCategory", "ProfessionSubCategory"),
                FieldDescriptor::lookup("designation", "Designation"),
                FieldDescriptor::lookup("source", "Source"),
                FieldDescriptor::lookup("subSource", "SubSource"),
                user_ref("owner"),
                FieldDescriptor::lookup("educations.education", "Education"),
                FieldDescriptor::lookup("educations.degree", "Degree"),
                FieldDescriptor::lookup("loans.loanType", "LoanType"),
                FieldDescriptor::lookup("loans.bank", "Bank"),
                FieldDescriptor::lookup("socialMedia.platform", "SocialPlatform"),
                FieldDescriptor::lookup("incomes.incomeType", "IncomeType"),
                FieldDescriptor::lookup("documents.documentType", "DocumentType"),
            ];
            refs.extend(address_refs("personalAddress"));
            refs.extend(address_refs("correspondenceAddress"));
            refs
        }
        Collection::Companies => {
            let mut refs = vec![
                FieldDescriptor::lookup("companyType", "CompanyType"),
                FieldDescriptor::lookup("industry", "Industry"),
                FieldDescriptor::lookup("source", "Source"),
                FieldDescriptor::lookup("subSource", "SubSource"),
                user_ref("owner"),
                FieldDescriptor::entity("employees", Collection::Contacts).array(),
            ];
            for office in [
                "registeredOffice",
                "branchOffice",
                "corporateOffice",
                "headOffice",
                "siteOffice",
            ] {
                refs.extend(address_refs(&format!("addresses.{office}")));
            }
            refs
        }
        Collection::Projects => vec![
            FieldDescriptor::lookup("category", "Category").array(),
            FieldDescriptor::lookup("subCategory", "SubCategory").array(),
            FieldDescriptor::lookup("status", "ProjectStatus"),
            FieldDescriptor::lookup("parkingType", "ParkingType"),
            FieldDescriptor::entity("developerId", Collection::Companies).matching(&["name"]),
            user_ref("assign").array(),
        ],
        Collection::Inventory => vec![
            FieldDescriptor::lookup("category", "Category"),
            FieldDescriptor::lookup("subCategory", "SubCategory"),
            FieldDescriptor::lookup("intent", "Intent"),
            FieldDescriptor::lookup("status", "InventoryStatus"),
            FieldDescriptor::lookup("facing", "Facing"),
            FieldDescriptor::entity("projectId", Collection::Projects).matching(&["name"]),
            FieldDescriptor::entity("owners", Collection::Contacts).array(),
            FieldDescriptor::entity("associates", Collection::Contacts).array(),
            user_ref("assignedTo"),
        ],
        Collection::Leads => vec![
            FieldDescriptor::lookup("requirement", "Requirement"),
            FieldDescriptor::lookup("subRequirement", "SubRequirement"),
            FieldDescriptor::lookup("budget", "Budget"),
            FieldDescriptor::lookup("location", "Location"),
            FieldDescriptor::lookup("source", "Source"),
            FieldDescriptor::lookup("status", "LeadStatus"),
            FieldDescriptor::lookup("propertyType", "PropertyType").array(),
            FieldDescriptor::lookup("unitType", "UnitType").array(),
            FieldDescriptor::lookup("facing", "Facing").array(),
            user_ref("owner"),
            FieldDescriptor::entity("contacts", Collection::Contacts).array(),
        ],
        Collection::Deals => vec![
            FieldDescriptor::entity("projectId", Collection::Projects).matching(&["name"]),
            FieldDescriptor::entity("inventoryId", Collection::Inventory),
            FieldDescriptor::lookup("unitType", "UnitType"),
            FieldDescriptor::lookup("propertyType", "PropertyType"),
            FieldDescriptor::lookup("intent", "Intent"),
            FieldDescriptor::lookup("source", "Source"),
            FieldDescriptor::lookup("dealType", "DealType"),
            FieldDescriptor::lookup("transactionType", "TransactionType"),
            FieldDescriptor::entity("owner", Collection::Contacts),
            FieldDescriptor::entity("associatedContact", Collection::Contacts),
            FieldDescriptor::entity("partyStructure.owner", Collection::Contacts),
            FieldDescriptor::entity("partyStructure.buyer", Collection::Contacts),
            FieldDescriptor::entity("partyStructure.channelPartner", Collection::Contacts),
            user_ref("partyStructure.internalRM"),
            user_ref("assignedTo"),
        ],
        Collection::Users => vec![FieldDescriptor::lookup("role", "Role").closed()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_set_flags() {
        let d = FieldDescriptor::lookup("category", "Category").array().closed();
        assert!(d.is_array);
        assert_eq!(
            d.target,
            RefTarget::Lookup {
                category: "Category".to_string(),
                create_missing: false
            }
        );
        assert_eq!(d.category(), Some("Category"));
    }

    #[test]
    fn test_matching_only_applies_to_entities() {
        let lookup = FieldDescriptor::lookup("status", "ProjectStatus").matching(&["name"]);
        assert_eq!(lookup, FieldDescriptor::lookup("status", "ProjectStatus"));

        let owner = FieldDescriptor::entity("owner", Collection::Users).matching(&["email"]);
        assert_eq!(
            owner.target,
            RefTarget::Entity {
                collection: Collection::Users,
                match_fields: vec!["email".to_string()]
            }
        );
    }

    #[test]
    fn test_descriptor_json_defaults() {
        let json = r#"{"path":"status","target":{"kind":"lookup","category":"LeadStatus"}}"#;
        let d: FieldDescriptor = serde_json::from_str(json).unwrap();
        assert!(!d.is_array);
        assert_eq!(d, FieldDescriptor::lookup("status", "LeadStatus"));
    }

    #[test]
    fn test_every_collection_has_defaults() {
        for collection in Collection::all() {
            assert!(!default_descriptors(*collection).is_empty());
        }
        let projects = default_descriptors(Collection::Projects);
        assert!(projects
            .iter()
            .any(|d| d.path == "category" && d.is_array && d.category() == Some("Category")));
    }
}
