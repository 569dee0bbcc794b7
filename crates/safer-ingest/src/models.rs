//! Carrier snapshot data model
//!
//! [`CarrierRecord`] mirrors the sections of a SAFER carrier snapshot page.
//! Every scalar is optional because the registry omits fields freely; counts
//! in the safety tables default to zero like the page itself does.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Registry key naming one carrier (a USDOT number)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Create an identifier, trimming surrounding whitespace
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// A structured record produced by a document parser
///
/// The pipeline only needs the record's key; everything else is owned by
/// the parser and the store that understand the concrete type.
pub trait ParsedRecord {
    /// Key of the entity this record describes, if the document carried one
    fn identifier(&self) -> Option<&Identifier>;
}

/// Inspection region on the snapshot page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Region {
    Us,
    Canada,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Us => "US",
            Region::Canada => "CANADA",
        }
    }
}

/// Which of the two snapshot addresses a row holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AddressKind {
    Physical,
    Mailing,
}

impl AddressKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressKind::Physical => "PHYSICAL",
            AddressKind::Mailing => "MAILING",
        }
    }
}

/// Full carrier snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CarrierRecord {
    pub metadata: RecordMetadata,
    pub identity: CompanyIdentity,
    pub contact: ContactInfo,
    pub status: OperatingStatus,
    pub operations: Operations,
    pub safety: SafetyRecord,
}

impl ParsedRecord for CarrierRecord {
    fn identifier(&self) -> Option<&Identifier> {
        self.metadata.usdot_number.as_ref().filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub source: String,
    pub snapshot_date: Option<NaiveDate>,
    pub usdot_number: Option<Identifier>,
    pub entity_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyIdentity {
    pub legal_name: Option<String>,
    pub dba_name: Option<String>,
    /// MC/MX/FF docket numbers, e.g. `MC-123456`
    pub authority_numbers: Vec<String>,
    pub duns_number: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub phone: Option<String>,
    pub physical_address: Address,
    pub mailing_address: Address,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: String,
}

impl Default for Address {
    fn default() -> Self {
        Self {
            street: None,
            city: None,
            state: None,
            zip_code: None,
            country: "US".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatingStatus {
    pub usdot_status: Option<String>,
    pub operating_authority_status: Option<String>,
    pub out_of_service_date: Option<NaiveDate>,
    pub mcs_150_form_date: Option<NaiveDate>,
    pub mcs_150_mileage: Option<i64>,
    pub mcs_150_mileage_year: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Operations {
    pub power_units: Option<i32>,
    pub drivers: Option<i32>,
    pub operation_classifications: Vec<String>,
    pub cargo_carried: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetyRecord {
    pub us_inspections: InspectionSummary,
    pub canada_inspections: InspectionSummary,
    pub us_crashes: CrashSummary,
    pub canada_crashes: CrashSummary,
    pub safety_rating: SafetyRating,
}

/// One region's inspection table
///
/// Canada only reports vehicle and driver columns; the hazmat and IEP
/// breakdowns stay zeroed for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InspectionSummary {
    pub total_inspections: i32,
    pub total_iep_inspections: i32,
    pub vehicle: InspectionBreakdown,
    pub driver: InspectionBreakdown,
    pub hazmat: InspectionBreakdown,
    pub iep: InspectionBreakdown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InspectionBreakdown {
    pub inspections: i32,
    pub out_of_service: i32,
    pub out_of_service_rate_pct: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashSummary {
    pub fatal: i32,
    pub injury: i32,
    pub tow: i32,
    pub total: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetyRating {
    pub rating: Option<String>,
    pub rating_date: Option<NaiveDate>,
    pub review_date: Option<NaiveDate>,
    pub rating_type: Option<String>,
}
