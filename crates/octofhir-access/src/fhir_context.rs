//! Resource-model context shared by all checkers.
//!
//! Holds the FHIR version and the Patient compartment definition: which
//! resource types belong to a patient and which search parameter / element
//! links them to the patient.
//!
//! Based on <https://hl7.org/fhir/R4/compartmentdefinition-patient.html>,
//! limited to the links that point at the patient the data is about.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Supported FHIR versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FhirVersion {
    /// FHIR R4 (4.0.1)
    #[default]
    R4,
    /// FHIR R4B (4.3.0)
    R4B,
    /// FHIR R5 (5.0.0)
    R5,
}

impl fmt::Display for FhirVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::R4 => write!(f, "4.0.1"),
            Self::R4B => write!(f, "4.3.0"),
            Self::R5 => write!(f, "5.0.0"),
        }
    }
}

// =============================================================================
// Compartment Definition
// =============================================================================

/// How a resource type is linked to its compartment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompartmentInclusion {
    /// Search parameter that links to the compartment.
    pub param: &'static str,
    /// Top-level resource element holding the reference.
    pub element: &'static str,
}

const fn link(param: &'static str, element: &'static str) -> CompartmentInclusion {
    CompartmentInclusion { param, element }
}

/// A compartment definition.
#[derive(Debug, Clone)]
pub struct CompartmentDefinition {
    /// Compartment type (e.g., "Patient").
    pub code: String,
    resources: HashMap<String, Vec<CompartmentInclusion>>,
}

impl CompartmentDefinition {
    /// The Patient compartment.
    #[must_use]
    pub fn patient() -> Self {
        let subject = link("subject", "subject");
        let patient_subject = link("patient", "subject");
        let patient = link("patient", "patient");

        let table: &[(&str, &[CompartmentInclusion])] = &[
            ("Account", &[subject]),
            ("AdverseEvent", &[subject]),
            ("AllergyIntolerance", &[patient]),
            ("Appointment", &[link("actor", "participant")]),
            ("AuditEvent", &[link("patient", "entity")]),
            ("Basic", &[patient_subject]),
            ("CarePlan", &[patient_subject, subject]),
            ("CareTeam", &[patient_subject, subject]),
            ("ChargeItem", &[subject]),
            ("Claim", &[patient]),
            ("ClinicalImpression", &[subject]),
            ("Communication", &[subject]),
            ("CommunicationRequest", &[subject]),
            ("Composition", &[subject]),
            ("Condition", &[patient_subject, subject]),
            ("Consent", &[patient]),
            ("Coverage", &[link("beneficiary", "beneficiary")]),
            ("DetectedIssue", &[patient]),
            ("DeviceRequest", &[subject]),
            ("DeviceUseStatement", &[subject]),
            ("DiagnosticReport", &[patient_subject, subject]),
            ("DocumentReference", &[patient_subject, subject]),
            ("Encounter", &[patient_subject, subject]),
            ("EpisodeOfCare", &[patient]),
            ("ExplanationOfBenefit", &[patient]),
            ("FamilyMemberHistory", &[patient]),
            ("Flag", &[patient_subject, subject]),
            ("Goal", &[patient_subject, subject]),
            ("ImagingStudy", &[patient_subject, subject]),
            ("Immunization", &[patient]),
            ("List", &[patient_subject, subject]),
            ("MeasureReport", &[link("patient", "subject")]),
            ("MedicationAdministration", &[patient_subject, subject]),
            ("MedicationDispense", &[patient_subject, subject]),
            ("MedicationRequest", &[patient_subject, subject]),
            ("MedicationStatement", &[patient_subject, subject]),
            ("NutritionOrder", &[patient]),
            ("Observation", &[patient_subject, subject]),
            ("Procedure", &[patient_subject, subject]),
            ("Provenance", &[link("patient", "target")]),
            ("QuestionnaireResponse", &[patient_subject, subject]),
            ("RelatedPerson", &[patient]),
            ("RiskAssessment", &[patient_subject, subject]),
            ("ServiceRequest", &[patient_subject, subject]),
            ("Specimen", &[patient_subject, subject]),
            ("SupplyDelivery", &[patient]),
            ("VisionPrescription", &[patient]),
        ];

        let mut resources: HashMap<String, Vec<CompartmentInclusion>> = table
            .iter()
            .map(|(rt, links)| (rt.to_string(), links.to_vec()))
            .collect();

        // The compartment's own resource type is linked by id.
        resources.insert("Patient".to_string(), vec![link("_id", "id")]);

        Self {
            code: "Patient".to_string(),
            resources,
        }
    }

    /// Check if a resource type belongs to this compartment.
    #[must_use]
    pub fn includes_resource_type(&self, resource_type: &str) -> bool {
        self.resources.contains_key(resource_type)
    }

    /// Links for a resource type.
    #[must_use]
    pub fn get_inclusions(&self, resource_type: &str) -> Option<&[CompartmentInclusion]> {
        self.resources.get(resource_type).map(Vec::as_slice)
    }
}

// =============================================================================
// FHIR Context
// =============================================================================

/// Resource-model context handed to checker factories.
#[derive(Debug, Clone)]
pub struct FhirContext {
    version: FhirVersion,
    patient_compartment: CompartmentDefinition,
}

impl FhirContext {
    /// Context for a FHIR version.
    #[must_use]
    pub fn new(version: FhirVersion) -> Self {
        Self {
            version,
            patient_compartment: CompartmentDefinition::patient(),
        }
    }

    /// Context for FHIR R4.
    #[must_use]
    pub fn r4() -> Self {
        Self::new(FhirVersion::R4)
    }

    /// FHIR version of the backend.
    #[must_use]
    pub fn version(&self) -> FhirVersion {
        self.version
    }

    /// The Patient compartment definition.
    #[must_use]
    pub fn patient_compartment(&self) -> &CompartmentDefinition {
        &self.patient_compartment
    }

    /// Check if a resource type belongs to the Patient compartment.
    #[must_use]
    pub fn is_in_patient_compartment(&self, resource_type: &str) -> bool {
        self.patient_compartment
            .includes_resource_type(resource_type)
    }
}

impl Default for FhirContext {
    fn default() -> Self {
        Self::r4()
    }
}
