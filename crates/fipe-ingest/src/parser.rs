//! Upstream payloads and their normalization into records

use bigdecimal::BigDecimal;
use fipe_common::types::{Brand, Detail, Model, Year};
use fipe_common::FipeError;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::str::FromStr;
use std::sync::Arc;

/// Portuguese month names as returned in `MesReferencia`
const MONTHS: [(&str, &str); 12] = [
    ("janeiro", "01"),
    ("fevereiro", "02"),
    ("março", "03"),
    ("abril", "04"),
    ("maio", "05"),
    ("junho", "06"),
    ("julho", "07"),
    ("agosto", "08"),
    ("setembro", "09"),
    ("outubro", "10"),
    ("novembro", "11"),
    ("dezembro", "12"),
];

const VALUE_PATTERN: &str = r"R\$\s*([\d.,]+)";

// ============================================================================
// Wire types
// ============================================================================

/// `{codigo, nome}` entry of the brand, model and year listings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CatalogItem {
    #[serde(deserialize_with = "code_as_string")]
    pub codigo: String,
    pub nome: String,
}

/// Body of `/marcas/{brand}/modelos`
#[derive(Debug, Clone, Deserialize)]
pub struct ModelListing {
    pub modelos: Vec<CatalogItem>,
}

/// Body of `/marcas/{brand}/modelos/{model}/anos/{year}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DetailDocument {
    pub valor: String,
    pub mes_referencia: String,
    pub tipo_veiculo: i32,
    pub combustivel: String,
    pub codigo_fipe: String,
    pub sigla_combustivel: String,
}

/// Listing codes arrive as numbers for models and as strings elsewhere
fn code_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Text(String),
        Number(i64),
    }

    Ok(match Code::deserialize(deserializer)? {
        Code::Text(text) => text,
        Code::Number(number) => number.to_string(),
    })
}

impl CatalogItem {
    pub fn into_brand(self) -> Brand {
        Brand::new(self.codigo, self.nome)
    }

    pub fn into_model(self, brand: Arc<Brand>) -> Model {
        Model::new(brand, self.codigo, self.nome)
    }

    pub fn into_year(self, model: Arc<Model>) -> Year {
        Year::new(model, self.codigo, self.nome)
    }
}

// ============================================================================
// Normalization
// ============================================================================

/// Converts detail documents into [`Detail`] records
#[derive(Debug, Clone)]
pub struct Normalizer {
    value_pattern: Regex,
}

impl Normalizer {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            value_pattern: Regex::new(VALUE_PATTERN)?,
        })
    }

    /// `"R$ 1.234,56"` -> `1234.56`
    pub fn parse_value(&self, raw: &str) -> Result<BigDecimal, FipeError> {
        let digits = self
            .value_pattern
            .captures(raw)
            .and_then(|captures| captures.get(1))
            .ok_or_else(|| FipeError::InvalidValue(raw.to_string()))?;

        let normalized = digits.as_str().replace('.', "").replace(',', ".");

        BigDecimal::from_str(&normalized).map_err(|_| FipeError::InvalidValue(raw.to_string()))
    }

    /// `"março de 2024"` -> `"03-2024"`
    ///
    /// The first token must match a month name exactly; the last token is
    /// taken verbatim, so `"março"` alone yields `"03-março"`.
    pub fn parse_month_reference(&self, raw: &str) -> Result<String, FipeError> {
        let invalid = || FipeError::InvalidMonthReference(raw.to_string());

        let name = raw.split_whitespace().next().ok_or_else(invalid)?;
        let year = raw.split_whitespace().last().ok_or_else(invalid)?;

        let number = MONTHS
            .iter()
            .find(|(month, _)| *month == name)
            .map(|(_, number)| *number)
            .ok_or_else(invalid)?;

        Ok(format!("{}-{}", number, year))
    }

    pub fn detail(&self, document: DetailDocument, year: &Year) -> Result<Detail, FipeError> {
        Ok(Detail {
            value: self.parse_value(&document.valor)?,
            month_reference: self.parse_month_reference(&document.mes_referencia)?,
            fipe_id: document.codigo_fipe,
            vehicle_type: document.tipo_veiculo,
            brand_name: year.brand().name.clone(),
            model_name: year.model.name.clone(),
            year_name: year.name.clone(),
            fuel: document.combustivel,
            fuel_sign: document.sigla_combustivel,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn normalizer() -> Normalizer {
        Normalizer::new().unwrap()
    }

    #[test]
    fn test_parse_value() {
        let n = normalizer();
        assert_eq!(
            n.parse_value("R$ 1.234,56").unwrap(),
            BigDecimal::from_str("1234.56").unwrap()
        );
        assert_eq!(
            n.parse_value("R$ 104.877,00").unwrap(),
            BigDecimal::from_str("104877.00").unwrap()
        );
        assert_eq!(
            n.parse_value("R$12,5").unwrap(),
            BigDecimal::from_str("12.5").unwrap()
        );
    }

    #[test]
    fn test_parse_value_without_currency() {
        let n = normalizer();
        assert_eq!(
            n.parse_value("1.234,56"),
            Err(FipeError::InvalidValue("1.234,56".to_string()))
        );
        assert!(n.parse_value("R$ sob consulta").is_err());
        assert!(n.parse_value("").is_err());
    }

    #[test]
    fn test_parse_month_reference() {
        let n = normalizer();
        assert_eq!(n.parse_month_reference("março 2024").unwrap(), "03-2024");
        assert_eq!(n.parse_month_reference("janeiro de 2023 ").unwrap(), "01-2023");
        assert_eq!(n.parse_month_reference("dezembro de 2021").unwrap(), "12-2021");
    }

    #[test]
    fn test_parse_month_reference_single_token() {
        assert_eq!(normalizer().parse_month_reference("março").unwrap(), "03-março");
    }

    #[test]
    fn test_parse_month_reference_is_case_sensitive() {
        assert_eq!(
            normalizer().parse_month_reference("Dezembro de 2021"),
            Err(FipeError::InvalidMonthReference("Dezembro de 2021".to_string()))
        );
    }

    #[test]
    fn test_parse_month_reference_unknown_month() {
        let n = normalizer();
        assert!(matches!(
            n.parse_month_reference("martober 2024"),
            Err(FipeError::InvalidMonthReference(_))
        ));
        assert!(n.parse_month_reference("").is_err());
    }

    #[test]
    fn test_catalog_item_accepts_numeric_code() {
        let listing: ModelListing = serde_json::from_str(
            r#"{"modelos": [{"codigo": 4828, "nome": "Uno"}], "anos": []}"#,
        )
        .unwrap();
        assert_eq!(listing.modelos[0].codigo, "4828");

        let years: Vec<CatalogItem> =
            serde_json::from_str(r#"[{"codigo": "2014-1", "nome": "2014 Gasolina"}]"#).unwrap();
        assert_eq!(years[0].codigo, "2014-1");
    }

    #[test]
    fn test_detail_from_document() {
        let document: DetailDocument = serde_json::from_str(
            r#"{
                "TipoVeiculo": 1,
                "Valor": "R$ 34.421,00",
                "Marca": "Fiat",
                "Modelo": "Uno",
                "AnoModelo": 2014,
                "Combustivel": "Gasolina",
                "CodigoFipe": "001267-0",
                "MesReferencia": "março de 2024",
                "SiglaCombustivel": "G"
            }"#,
        )
        .unwrap();

        let brand = Arc::new(Brand::new("21", "Fiat"));
        let model = Arc::new(Model::new(brand, "4828", "Uno"));
        let year = Year::new(model, "2014-1", "2014 Gasolina");

        let detail = normalizer().detail(document, &year).unwrap();

        assert_eq!(detail.fipe_id, "001267-0");
        assert_eq!(detail.value, BigDecimal::from_str("34421.00").unwrap());
        assert_eq!(detail.month_reference, "03-2024");
        assert_eq!(detail.brand_name, "Fiat");
        assert_eq!(detail.model_name, "Uno");
        assert_eq!(detail.year_name, "2014 Gasolina");
        assert_eq!(detail.fuel_sign, "G");
    }
}
