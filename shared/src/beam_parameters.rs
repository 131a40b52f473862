//! Grouped beam measurement results.
//!
//! A [`BeamParameters`] value is rebuilt for every processed frame and only
//! contains the quantities that were enabled for that frame. Consumers that
//! need a flat view (the parameter logger) use [`BeamParameters::flatten`],
//! which names pair values `"Group: Key X"` / `"Group: Key Y"` and scalar
//! values `"Group: Key"`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumIter};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumIter,
)]
pub enum ParameterGroup {
    #[strum(to_string = "Beam Width")]
    BeamWidth,
    #[strum(to_string = "Beam Position And Orientation")]
    PositionOrientation,
    #[strum(to_string = "Other Parameters")]
    Other,
}

/// Beam width estimators.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumIter,
)]
pub enum WidthMethod {
    #[strum(to_string = "4 Sigma")]
    FourSigma,
    #[strum(to_string = "13.5% level")]
    IntensityLevel,
    #[strum(to_string = "Gauss approximation")]
    GaussApproximation,
    #[strum(to_string = "86% Power")]
    PowerLevel,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumIter,
)]
pub enum PositionKind {
    #[strum(to_string = "Global position")]
    Global,
    #[strum(to_string = "Local position")]
    Local,
    #[strum(to_string = "Angle")]
    Angle,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumIter,
)]
pub enum OtherParameter {
    #[strum(to_string = "Power")]
    Power,
    #[strum(to_string = "Area")]
    Area,
}

/// A measured quantity: an `(x, y)` pair or a single number.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    Pair(f64, f64),
    Scalar(f64),
}

impl ParameterValue {
    pub fn as_pair(&self) -> Option<(f64, f64)> {
        match *self {
            ParameterValue::Pair(x, y) => Some((x, y)),
            ParameterValue::Scalar(_) => None,
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match *self {
            ParameterValue::Scalar(v) => Some(v),
            ParameterValue::Pair(..) => None,
        }
    }

    fn push_flat(&self, name: String, out: &mut Vec<(String, f64)>) {
        match *self {
            ParameterValue::Pair(x, y) => {
                out.push((format!("{name} X"), x));
                out.push((format!("{name} Y"), y));
            }
            ParameterValue::Scalar(v) => out.push((name, v)),
        }
    }
}

/// Per-frame grouped beam parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeamParameters {
    /// Widths per method in physical units: `(dx, dy)` for profile-based
    /// methods, a single diameter for the encircled-power method
    pub widths: BTreeMap<WidthMethod, ParameterValue>,
    pub position: BTreeMap<PositionKind, ParameterValue>,
    pub other: BTreeMap<OtherParameter, f64>,
}

impl BeamParameters {
    pub fn is_empty(&self) -> bool {
        self.widths.is_empty() && self.position.is_empty() && self.other.is_empty()
    }

    pub fn width(&self, method: WidthMethod) -> Option<ParameterValue> {
        self.widths.get(&method).copied()
    }

    pub fn position(&self, kind: PositionKind) -> Option<ParameterValue> {
        self.position.get(&kind).copied()
    }

    pub fn other(&self, parameter: OtherParameter) -> Option<f64> {
        self.other.get(&parameter).copied()
    }

    /// Flatten to `("Group: Key[ X|Y]", value)` pairs in group order.
    pub fn flatten(&self) -> Vec<(String, f64)> {
        let mut out = Vec::new();
        for (method, value) in &self.widths {
            value.push_flat(format!("{}: {method}", ParameterGroup::BeamWidth), &mut out);
        }
        for (kind, value) in &self.position {
            value.push_flat(
                format!("{}: {kind}", ParameterGroup::PositionOrientation),
                &mut out,
            );
        }
        for (parameter, &value) in &self.other {
            out.push((format!("{}: {parameter}", ParameterGroup::Other), value));
        }
        out
    }

    /// Names produced by [`Self::flatten`].
    pub fn parameter_names(&self) -> Vec<String> {
        self.flatten().into_iter().map(|(name, _)| name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_names_and_order() {
        let mut params = BeamParameters::default();
        params
            .widths
            .insert(WidthMethod::FourSigma, ParameterValue::Pair(10.0, 12.0));
        params
            .position
            .insert(PositionKind::Angle, ParameterValue::Scalar(5.0));
        params
            .position
            .insert(PositionKind::Global, ParameterValue::Pair(1.0, 2.0));
        params.other.insert(OtherParameter::Power, 800.0);

        let flat = params.flatten();
        let names: Vec<&str> = flat.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Beam Width: 4 Sigma X",
                "Beam Width: 4 Sigma Y",
                "Beam Position And Orientation: Global position X",
                "Beam Position And Orientation: Global position Y",
                "Beam Position And Orientation: Angle",
                "Other Parameters: Power",
            ]
        );
        assert_eq!(flat[1].1, 12.0);
        assert_eq!(flat[5].1, 800.0);
    }

    #[test]
    fn test_lookup_helpers() {
        let mut params = BeamParameters::default();
        assert!(params.is_empty());
        params.other.insert(OtherParameter::Area, 42.0);
        assert_eq!(params.other(OtherParameter::Area), Some(42.0));
        assert_eq!(params.width(WidthMethod::PowerLevel), None);
        assert_eq!(WidthMethod::IntensityLevel.to_string(), "13.5% level");
    }
}
