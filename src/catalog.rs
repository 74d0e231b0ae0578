//! Diagnostic trouble code (DTC) and fault-tree catalogs.
//!
//! The catalog is built once, validated, and then shared read-only between
//! every ECU of every vehicle (`Arc<Catalog>`). Loading never degrades to an
//! empty catalog: any I/O, YAML or consistency problem is returned to the
//! caller as a [`CatalogError`].

use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const MAX_DTC_CODE_LEN: usize = 8;

pub const DTCS_FILE_NAME: &str = "dtcs.yaml";
pub const FAULT_TREE_FILE_NAME: &str = "fault_tree.yaml";

const BUILTIN_DTCS_YAML: &str = include_str!("../catalog/dtcs.yaml");
const BUILTIN_FAULT_TREE_YAML: &str = include_str!("../catalog/fault_tree.yaml");

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed catalog YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("DTC catalog defines no ECUs")]
    Empty,

    #[error("unknown ECU tag `{0}`, expected one of: bmm, pmm, tmm")]
    UnknownEcuTag(String),

    #[error("DTC {code} is not defined for {ecu}")]
    UndefinedDtc { ecu: EcuTag, code: String },

    #[error("invalid DTC code `{0}`")]
    InvalidDtcCode(String),

    #[error("rationality DTC {code} on {ecu} needs lower_limit <= upper_limit")]
    InvalidBounds { ecu: EcuTag, code: DtcCode },

    #[error("symptom `{0}` has no conditions")]
    EmptySymptom(String),

    #[error("symptom `{symptom}` references undefined DTC {code}")]
    UnknownCondition { symptom: String, code: DtcCode },

    #[error("symptom `{symptom}` has invalid weight {weight} for cause `{cause}`")]
    InvalidWeight {
        symptom: String,
        cause: String,
        weight: f64,
    },
}

/// Control unit tags as they appear in the DTC catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EcuTag {
    /// Battery Management Module.
    Bmm,
    /// Powertrain (inverter + motor) Management Module.
    Pmm,
    /// Thermal Management Module.
    Tmm,
}

impl EcuTag {
    pub const ALL: [EcuTag; 3] = [EcuTag::Bmm, EcuTag::Pmm, EcuTag::Tmm];

    pub fn as_str(self) -> &'static str {
        match self {
            EcuTag::Bmm => "bmm",
            EcuTag::Pmm => "pmm",
            EcuTag::Tmm => "tmm",
        }
    }
}

impl fmt::Display for EcuTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EcuTag {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EcuTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| CatalogError::UnknownEcuTag(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DtcKind {
    Rationality,
    OpenCircuit,
    ShortCircuit,
    CommsMissing,
}

impl fmt::Display for DtcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DtcKind::Rationality => "rationality",
            DtcKind::OpenCircuit => "open_circuit",
            DtcKind::ShortCircuit => "short_circuit",
            DtcKind::CommsMissing => "comms_missing",
        };
        f.write_str(name)
    }
}

/// A short alphanumeric diagnostic code such as `A001`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DtcCode(ArrayString<MAX_DTC_CODE_LEN>);

impl DtcCode {
    pub fn new(code: &str) -> Result<Self, CatalogError> {
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CatalogError::InvalidDtcCode(code.to_string()));
        }
        ArrayString::from(code)
            .map(DtcCode)
            .map_err(|_| CatalogError::InvalidDtcCode(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl FromStr for DtcCode {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DtcCode::new(s)
    }
}

impl TryFrom<String> for DtcCode {
    type Error = CatalogError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DtcCode::new(&value)
    }
}

impl From<DtcCode> for String {
    fn from(code: DtcCode) -> Self {
        code.as_str().to_string()
    }
}

impl fmt::Display for DtcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for DtcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DtcCode({})", self.as_str())
    }
}

/// Inclusive `[lower, upper]` range of a rationality check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

impl Bounds {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DtcDefinition {
    #[serde(rename = "type")]
    pub kind: DtcKind,
    /// Name of the ECU output signal this code monitors.
    pub signal: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper_limit: Option<f64>,
}

impl DtcDefinition {
    /// Bounds of a rationality code. `None` for every other kind.
    pub fn bounds(&self) -> Option<Bounds> {
        if self.kind != DtcKind::Rationality {
            return None;
        }
        match (self.lower_limit, self.upper_limit) {
            (Some(lower), Some(upper)) => Some(Bounds { lower, upper }),
            _ => None,
        }
    }
}

/// What [`Catalog::get_dtc_metadata`] hands back for one code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DtcMetadata {
    pub ecu: EcuTag,
    pub code: DtcCode,
    pub kind: DtcKind,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
}

/// ECU tag → code → definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DtcCatalog {
    units: BTreeMap<EcuTag, BTreeMap<DtcCode, DtcDefinition>>,
}

impl DtcCatalog {
    pub fn new(units: BTreeMap<EcuTag, BTreeMap<DtcCode, DtcDefinition>>) -> Self {
        Self { units }
    }

    pub fn get(&self, ecu: EcuTag, code: &DtcCode) -> Option<&DtcDefinition> {
        self.units.get(&ecu).and_then(|codes| codes.get(code))
    }

    pub fn contains(&self, ecu: EcuTag, code: &DtcCode) -> bool {
        self.get(ecu, code).is_some()
    }

    /// Codes defined for one ECU, in code order.
    pub fn codes_for(&self, ecu: EcuTag) -> impl Iterator<Item = (&DtcCode, &DtcDefinition)> {
        self.units.get(&ecu).into_iter().flat_map(|codes| codes.iter())
    }

    pub fn is_defined(&self, code: &DtcCode) -> bool {
        self.units.values().any(|codes| codes.contains_key(code))
    }

    pub fn ecus(&self) -> impl Iterator<Item = EcuTag> + '_ {
        self.units.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.units.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Symptom {
    pub conditions: Vec<DtcCode>,
    pub probable_cause_weights: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaultTreeCatalog {
    pub symptoms: BTreeMap<String, Symptom>,
}

/// Validated DTC and fault-tree catalogs.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    dtcs: DtcCatalog,
    fault_tree: FaultTreeCatalog,
}

impl Catalog {
    pub fn new(dtcs: DtcCatalog, fault_tree: FaultTreeCatalog) -> Result<Self, CatalogError> {
        let catalog = Self { dtcs, fault_tree };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_yaml_str(dtcs_yaml: &str, fault_tree_yaml: &str) -> Result<Self, CatalogError> {
        let dtcs: DtcCatalog = serde_yaml::from_str(dtcs_yaml)?;
        let fault_tree: FaultTreeCatalog = serde_yaml::from_str(fault_tree_yaml)?;
        Self::new(dtcs, fault_tree)
    }

    /// Reads `dtcs.yaml` and `fault_tree.yaml` from `dir`.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let dir = dir.as_ref();
        let dtcs_yaml = read_catalog_file(&dir.join(DTCS_FILE_NAME))?;
        let fault_tree_yaml = read_catalog_file(&dir.join(FAULT_TREE_FILE_NAME))?;
        let catalog = Self::from_yaml_str(&dtcs_yaml, &fault_tree_yaml)?;

        tracing::info!(
            dir = %dir.display(),
            dtcs = catalog.dtcs.len(),
            symptoms = catalog.fault_tree.symptoms.len(),
            "loaded diagnostic catalog"
        );
        Ok(catalog)
    }

    /// The reference catalog shipped with the crate.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_yaml_str(BUILTIN_DTCS_YAML, BUILTIN_FAULT_TREE_YAML)
    }

    pub fn dtcs(&self) -> &DtcCatalog {
        &self.dtcs
    }

    pub fn fault_tree(&self) -> &FaultTreeCatalog {
        &self.fault_tree
    }

    /// Looks up one code. Rationality codes carry their `[lower, upper]`
    /// bounds, other kinds only kind and description.
    pub fn get_dtc_metadata(&self, ecu: &str, code: &str) -> Result<DtcMetadata, CatalogError> {
        let tag: EcuTag = ecu.parse()?;
        let undefined = || CatalogError::UndefinedDtc {
            ecu: tag,
            code: code.to_string(),
        };
        let dtc = DtcCode::new(code).map_err(|_| undefined())?;
        let definition = self.dtcs.get(tag, &dtc).ok_or_else(undefined)?;

        Ok(DtcMetadata {
            ecu: tag,
            code: dtc,
            kind: definition.kind,
            description: definition.description.clone(),
            bounds: definition.bounds(),
        })
    }

    fn validate(&self) -> Result<(), CatalogError> {
        if self.dtcs.is_empty() {
            return Err(CatalogError::Empty);
        }

        for ecu in self.dtcs.ecus() {
            for (code, definition) in self.dtcs.codes_for(ecu) {
                if definition.kind != DtcKind::Rationality {
                    continue;
                }
                let valid = definition
                    .bounds()
                    .is_some_and(|b| b.lower.is_finite() && b.upper.is_finite() && b.lower <= b.upper);
                if !valid {
                    return Err(CatalogError::InvalidBounds { ecu, code: *code });
                }
            }
        }

        for (name, symptom) in &self.fault_tree.symptoms {
            if symptom.conditions.is_empty() {
                return Err(CatalogError::EmptySymptom(name.clone()));
            }
            if let Some(code) = symptom.conditions.iter().find(|c| !self.dtcs.is_defined(c)) {
                return Err(CatalogError::UnknownCondition {
                    symptom: name.clone(),
                    code: *code,
                });
            }
            for (cause, &weight) in &symptom.probable_cause_weights {
                if !weight.is_finite() || weight < 0.0 {
                    return Err(CatalogError::InvalidWeight {
                        symptom: name.clone(),
                        cause: cause.clone(),
                        weight,
                    });
                }
            }
        }

        Ok(())
    }
}

fn read_catalog_file(path: &Path) -> Result<String, CatalogError> {
    std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtc_code_validation() {
        assert!(DtcCode::new("A001").is_ok());
        assert!(DtcCode::new("").is_err());
        assert!(DtcCode::new("A 01").is_err());
        assert!(DtcCode::new("TOOLONGCODE").is_err());
    }

    #[test]
    fn test_ecu_tag_parsing() {
        assert_eq!("bmm".parse::<EcuTag>().unwrap(), EcuTag::Bmm);
        assert_eq!("tmm".parse::<EcuTag>().unwrap(), EcuTag::Tmm);
        assert!(matches!(
            "vcu".parse::<EcuTag>(),
            Err(CatalogError::UnknownEcuTag(tag)) if tag == "vcu"
        ));
    }

    #[test]
    fn test_bounds_only_for_rationality() {
        let definition = DtcDefinition {
            kind: DtcKind::OpenCircuit,
            signal: "v_bus".into(),
            description: "open".into(),
            lower_limit: Some(0.0),
            upper_limit: Some(1.0),
        };
        assert!(definition.bounds().is_none());

        let rationality = DtcDefinition {
            kind: DtcKind::Rationality,
            ..definition
        };
        assert_eq!(rationality.bounds(), Some(Bounds { lower: 0.0, upper: 1.0 }));
    }

    #[test]
    fn test_builtin_catalog_loads() {
        let catalog = Catalog::builtin().unwrap();
        assert!(catalog.dtcs().len() > 30);
        assert!(catalog.fault_tree().symptoms.contains_key("hv_bus_short_circuit"));
    }
}
