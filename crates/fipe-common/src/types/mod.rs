//! Catalog record types
//!
//! The catalog is a tree: a [`Brand`] lists [`Model`]s, a model lists
//! [`Year`]s and every year resolves to one priced [`Detail`]. Children keep an
//! owning pointer to their parent so catalog paths can be rebuilt without
//! touching the network again.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Root of a crawl subtree
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Brand {
    pub id: String,
    pub name: String,
}

impl Brand {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Catalog path of this brand, relative to the vehicle root
    pub fn path(&self) -> String {
        format!("marcas/{}", self.id)
    }
}

impl fmt::Display for Brand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A vehicle model listed under one brand
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Model {
    #[serde(skip_serializing)]
    pub brand: Arc<Brand>,
    pub id: String,
    pub name: String,
}

impl Model {
    pub fn new(brand: Arc<Brand>, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            brand,
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn path(&self) -> String {
        format!("{}/modelos/{}", self.brand.path(), self.id)
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.brand, self.name)
    }
}

/// A model year (year + fuel code, e.g. `2014-1`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Year {
    #[serde(skip_serializing)]
    pub model: Arc<Model>,
    pub id: String,
    pub name: String,
}

impl Year {
    pub fn new(model: Arc<Model>, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            model,
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn brand(&self) -> &Brand {
        &self.model.brand
    }

    pub fn path(&self) -> String {
        format!("{}/anos/{}", self.model.path(), self.id)
    }
}

impl fmt::Display for Year {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.model, self.name)
    }
}

/// Flat priced record, the terminal output of a crawl
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detail {
    /// FIPE code (`CodigoFipe`)
    #[serde(rename = "id")]
    pub fipe_id: String,
    #[serde(rename = "type")]
    pub vehicle_type: i32,
    pub value: BigDecimal,
    #[serde(rename = "brand")]
    pub brand_name: String,
    #[serde(rename = "model")]
    pub model_name: String,
    #[serde(rename = "year")]
    pub year_name: String,
    pub fuel: String,
    /// `MM-YYYY`
    pub month_reference: String,
    pub fuel_sign: String,
}

/// Accumulated output of one brand pipeline, or of several once unified
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionResult {
    pub brand: Vec<Brand>,
    pub models: Vec<Model>,
    pub years: Vec<Year>,
    pub data: Vec<Detail>,
}

impl ExtractionResult {
    /// Empty result holding only the brand singleton
    pub fn for_brand(brand: Brand) -> Self {
        Self {
            brand: vec![brand],
            ..Self::default()
        }
    }

    /// Concatenate every buffer of `results`, field by field, in input order
    pub fn unify<I>(results: I) -> Self
    where
        I: IntoIterator<Item = ExtractionResult>,
    {
        results
            .into_iter()
            .fold(Self::default(), |mut unified, result| {
                unified.brand.extend(result.brand);
                unified.models.extend(result.models);
                unified.years.extend(result.years);
                unified.data.extend(result.data);
                unified
            })
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            brands: self.brand.len(),
            models: self.models.len(),
            years: self.years.len(),
            details: self.data.len(),
        }
    }
}

/// Buffer lengths of an [`ExtractionResult`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub brands: usize,
    pub models: usize,
    pub years: usize,
    pub details: usize,
}

impl std::ops::AddAssign for BatchSummary {
    fn add_assign(&mut self, other: Self) {
        self.brands += other.brands;
        self.models += other.models;
        self.years += other.years;
        self.details += other.details;
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} brands, {} models, {} years, {} details",
            self.brands, self.models, self.years, self.details
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn detail(fipe_id: &str) -> Detail {
        Detail {
            fipe_id: fipe_id.to_string(),
            vehicle_type: 1,
            value: BigDecimal::from_str("1234.56").unwrap(),
            brand_name: "Fiat".to_string(),
            model_name: "Uno".to_string(),
            year_name: "2014 Gasolina".to_string(),
            fuel: "Gasolina".to_string(),
            month_reference: "03-2024".to_string(),
            fuel_sign: "G".to_string(),
        }
    }

    fn result_for(brand_id: &str, fipe_ids: &[&str]) -> ExtractionResult {
        let brand = Arc::new(Brand::new(brand_id, format!("Brand {}", brand_id)));
        let mut result = ExtractionResult::for_brand((*brand).clone());
        let model = Arc::new(Model::new(brand, "1", "Model"));
        result.models.push((*model).clone());
        for id in fipe_ids {
            result.years.push(Year::new(model.clone(), *id, "2014"));
            result.data.push(detail(id));
        }
        result
    }

    #[test]
    fn test_paths_follow_parent_chain() {
        let brand = Arc::new(Brand::new("21", "Fiat"));
        let model = Arc::new(Model::new(brand, "4828", "Uno"));
        let year = Year::new(model.clone(), "2014-1", "2014 Gasolina");

        assert_eq!(model.path(), "marcas/21/modelos/4828");
        assert_eq!(year.path(), "marcas/21/modelos/4828/anos/2014-1");
        assert_eq!(year.brand().name, "Fiat");
        assert_eq!(year.to_string(), "Fiat Uno 2014 Gasolina");
    }

    #[test]
    fn test_unify_preserves_input_order() {
        let first = result_for("1", &["a", "b"]);
        let second = result_for("2", &["c", "d"]);

        let unified = ExtractionResult::unify(vec![first, second]);

        assert_eq!(unified.brand.len(), 2);
        assert_eq!(unified.brand[0].id, "1");
        assert_eq!(unified.brand[1].id, "2");
        let ids: Vec<_> = unified.data.iter().map(|d| d.fipe_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert_eq!(unified.summary().years, 4);
    }

    #[test]
    fn test_unify_empty_input() {
        let unified = ExtractionResult::unify(Vec::new());
        assert_eq!(unified, ExtractionResult::default());
        assert_eq!(unified.summary(), BatchSummary::default());
    }

    #[test]
    fn test_detail_serializes_with_table_columns() {
        let json = serde_json::to_value(detail("001004-9")).unwrap();
        assert_eq!(json["id"], "001004-9");
        assert_eq!(json["type"], 1);
        assert_eq!(json["month_reference"], "03-2024");
    }

    #[test]
    fn test_model_serializes_without_parent() {
        let brand = Arc::new(Brand::new("21", "Fiat"));
        let model = Model::new(brand, "4828", "Uno");
        let json = serde_json::to_value(&model).unwrap();
        assert_eq!(json, serde_json::json!({"id": "4828", "name": "Uno"}));
    }
}
