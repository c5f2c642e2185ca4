//! FHIR R4 resources, restricted to the fields this bridge emits.

use serde::Serialize;

const OBSERVATION_CATEGORY: &str =
    "http://terminology.hl7.org/CodeSystem/observation-category";
const LOINC: &str = "http://loinc.org";
const UCUM: &str = "http://unitsofmeasure.org";
/// Local code system for readings FHIR has no vital-sign code for.
const SENSOR_CODES: &str = "http://example.org/CodeSystem/sensor";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    resource_type: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    timestamp: String,
    entry: Vec<Entry>,
}

impl Bundle {
    pub fn len(&self) -> usize {
        self.entry.len()
    }
}

#[derive(Debug, Serialize)]
struct Entry {
    resource: Observation,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    resource_type: &'static str,
    status: &'static str,
    category: [CodeableConcept; 1],
    code: CodeableConcept,
    effective_date_time: String,
    value_quantity: Quantity,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<Reference>,
}

#[derive(Debug, Serialize)]
struct CodeableConcept {
    coding: [Coding; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct Coding {
    system: &'static str,
    code: &'static str,
    display: &'static str,
}

#[derive(Debug, Serialize)]
struct Quantity {
    value: f64,
    unit: &'static str,
    system: &'static str,
    code: &'static str,
}

#[derive(Debug, Serialize)]
struct Reference {
    reference: String,
}

const VITAL_SIGNS: Coding = Coding {
    system: OBSERVATION_CATEGORY,
    code: "vital-signs",
    display: "Vital Signs",
};

const ENVIRONMENT: Coding = Coding {
    system: OBSERVATION_CATEGORY,
    code: "environment",
    display: "Environment",
};

pub fn heart_rate(value: f64, patient: Option<&str>) -> Observation {
    observation(
        Coding {
            system: LOINC,
            code: "8867-4",
            display: "Heart rate",
        },
        Quantity {
            value,
            unit: "beats/minute",
            system: UCUM,
            code: "/min",
        },
        VITAL_SIGNS,
        patient,
    )
}

pub fn oxygen_saturation(value: f64, patient: Option<&str>) -> Observation {
    observation(
        Coding {
            system: LOINC,
            code: "59408-5",
            display: "Oxygen saturation in Arterial blood by Pulse oximetry",
        },
        Quantity {
            value,
            unit: "percent",
            system: UCUM,
            code: "%",
        },
        VITAL_SIGNS,
        patient,
    )
}

pub fn ambient_temperature(value: f64, patient: Option<&str>) -> Observation {
    observation(
        Coding {
            system: SENSOR_CODES,
            code: "ambient-temperature",
            display: "Ambient temperature",
        },
        Quantity {
            value,
            unit: "°C",
            system: UCUM,
            code: "Cel",
        },
        ENVIRONMENT,
        patient,
    )
}

pub fn relative_humidity(value: f64, patient: Option<&str>) -> Observation {
    observation(
        Coding {
            system: SENSOR_CODES,
            code: "humidity",
            display: "Relative humidity",
        },
        Quantity {
            value,
            unit: "percent",
            system: UCUM,
            code: "%",
        },
        ENVIRONMENT,
        patient,
    )
}

fn observation(
    code: Coding,
    value: Quantity,
    category: Coding,
    patient: Option<&str>,
) -> Observation {
    Observation {
        resource_type: "Observation",
        status: "final",
        category: [CodeableConcept {
            coding: [category],
            text: None,
        }],
        code: CodeableConcept {
            text: Some(code.display),
            coding: [code],
        },
        effective_date_time: now_utc(),
        value_quantity: value,
        subject: patient.map(|reference| Reference {
            reference: reference.to_owned(),
        }),
    }
}

/// Collection bundle, `None` when there is nothing to deliver.
pub fn bundle(observations: Vec<Observation>) -> Option<Bundle> {
    if observations.is_empty() {
        return None;
    }
    Some(Bundle {
        resource_type: "Bundle",
        kind: "collection",
        timestamp: now_utc(),
        entry: observations
            .into_iter()
            .map(|resource| Entry { resource })
            .collect(),
    })
}

fn now_utc() -> String {
    jiff::Timestamp::now().strftime("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heart_rate_observation_carries_the_loinc_coding() {
        let obs = heart_rate(72.5, Some("Patient/example"));
        let json = serde_json::to_value(&obs).unwrap();

        assert_eq!(json["resourceType"], "Observation");
        assert_eq!(json["status"], "final");
        assert_eq!(json["code"]["coding"][0]["code"], "8867-4");
        assert_eq!(json["code"]["coding"][0]["system"], LOINC);
        assert_eq!(json["valueQuantity"]["value"], 72.5);
        assert_eq!(json["valueQuantity"]["code"], "/min");
        assert_eq!(json["category"][0]["coding"][0]["code"], "vital-signs");
        assert_eq!(json["subject"]["reference"], "Patient/example");
    }

    #[test]
    fn subject_is_omitted_without_a_patient() {
        let obs = oxygen_saturation(98.0, None);
        let json = serde_json::to_value(&obs).unwrap();
        assert!(json.get("subject").is_none());
    }

    #[test]
    fn timestamps_are_utc_to_the_second() {
        let obs = relative_humidity(45.0, None);
        let json = serde_json::to_value(&obs).unwrap();
        let stamp = json["effectiveDateTime"].as_str().unwrap();
        assert!(stamp.ends_with('Z'), "not UTC: {stamp}");
        // 2026-08-06T12:00:00Z
        assert_eq!(stamp.len(), 20);
    }

    #[test]
    fn empty_bundles_are_not_built() {
        assert!(bundle(Vec::new()).is_none());
    }

    #[test]
    fn bundle_wraps_each_observation_in_an_entry() {
        let bundle = bundle(vec![
            heart_rate(60.0, None),
            ambient_temperature(21.0, None),
        ])
        .unwrap();
        assert_eq!(bundle.len(), 2);

        let json = serde_json::to_value(&bundle).unwrap();
        assert_eq!(json["resourceType"], "Bundle");
        assert_eq!(json["type"], "collection");
        assert_eq!(json["entry"][1]["resource"]["code"]["coding"][0]["code"],
            "ambient-temperature");
    }
}
