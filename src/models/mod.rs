use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Value written when a column could not be resolved.
pub const NOT_AVAILABLE: &str = "N/A";

pub const TICKER_FIELD: &str = "Ticker";
pub const ORIGIN_FIELD: &str = "Origin";
pub const ERROR_FIELD: &str = "Erro";

// ── Column definitions ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    #[serde(alias = "simples")]
    Simple,
    #[serde(alias = "avancado", alias = "avançado")]
    Advanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExcelFormat {
    #[default]
    #[serde(alias = "Texto", alias = "texto")]
    Text,
    #[serde(alias = "Número", alias = "numero", alias = "Numero")]
    Number,
    #[serde(alias = "Moeda", alias = "moeda")]
    Currency,
    #[serde(alias = "Porcentagem", alias = "porcentagem")]
    Percentage,
}

/// A user-configured column: where to find one value on an entity page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub kind: ColumnKind,
    #[serde(default)]
    pub search_class: Option<String>,
    #[serde(default)]
    pub return_class: Option<String>,
    #[serde(default)]
    pub css_selector: Option<String>,
    #[serde(default)]
    pub excel_format: ExcelFormat,
}

impl ColumnDefinition {
    pub fn simple(name: &str, search_class: &str, return_class: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ColumnKind::Simple,
            search_class: Some(search_class.to_string()),
            return_class: Some(return_class.to_string()),
            css_selector: None,
            excel_format: ExcelFormat::Text,
        }
    }

    pub fn advanced(name: &str, css_selector: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ColumnKind::Advanced,
            search_class: None,
            return_class: None,
            css_selector: Some(css_selector.to_string()),
            excel_format: ExcelFormat::Text,
        }
    }

    #[cfg(test)]
    pub fn with_format(mut self, format: ExcelFormat) -> Self {
        self.excel_format = format;
        self
    }

    /// `(search_class, return_class)` when both are present and non-blank.
    pub fn class_pair(&self) -> Option<(&str, &str)> {
        let search = non_blank(self.search_class.as_deref())?;
        let ret = non_blank(self.return_class.as_deref())?;
        Some((search, ret))
    }

    pub fn selector(&self) -> Option<&str> {
        non_blank(self.css_selector.as_deref())
    }

    /// Describes why the definition cannot be resolved, if it cannot.
    pub fn problem(&self) -> Option<&'static str> {
        match self.kind {
            ColumnKind::Simple if self.class_pair().is_none() => {
                Some("Configuração de coluna simples incompleta")
            }
            ColumnKind::Advanced if self.selector().is_none() => Some("Seletor CSS não definido"),
            _ => None,
        }
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

// ── Origin / category ────────────────────────────────────────────────────────

/// Provenance tag stamped on every row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    Stock,
    Fund,
    PortfolioStock,
    PortfolioFund,
}

impl Origin {
    pub fn label(self) -> &'static str {
        match self {
            Self::Stock => "Stock",
            Self::Fund => "Fund",
            Self::PortfolioStock => "PortfolioStock",
            Self::PortfolioFund => "PortfolioFund",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-entity page families on the site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Stocks,
    Funds,
}

impl Category {
    pub fn origin(self) -> Origin {
        match self {
            Self::Stocks => Origin::Stock,
            Self::Funds => Origin::Fund,
        }
    }

    /// Path segment of the entity page: `/acoes/PETR4/`, `/fiis/HGLG11/`.
    pub fn path_segment(self) -> &'static str {
        match self {
            Self::Stocks => "acoes",
            Self::Funds => "fiis",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Stocks => "ação",
            Self::Funds => "FII",
        }
    }
}

/// What one extraction pass is aimed at.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionTarget<'a> {
    Entity {
        category: Category,
        ticker: &'a str,
        columns: &'a [ColumnDefinition],
    },
    PortfolioStocks,
    PortfolioFunds,
}

impl ExtractionTarget<'_> {
    pub fn origin(&self) -> Origin {
        match self {
            Self::Entity { category, .. } => category.origin(),
            Self::PortfolioStocks => Origin::PortfolioStock,
            Self::PortfolioFunds => Origin::PortfolioFund,
        }
    }
}

// ── Row record ───────────────────────────────────────────────────────────────

/// Insertion-ordered column → value mapping for one extracted row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowRecord {
    fields: Vec<(String, String)>,
}

impl RowRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; a replaced key keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Value at a column position, in insertion order.
    pub fn value_at(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Every value is empty after trimming.
    pub fn is_blank(&self) -> bool {
        self.fields.iter().all(|(_, v)| v.trim().is_empty())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RowRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = RowRecord::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

impl Serialize for RowRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_record_keeps_insertion_order() {
        let mut row = RowRecord::new();
        row.insert("Ativo", "PETR4");
        row.insert("Quantidade", "100");
        row.insert("Ativo", "VALE3");

        assert_eq!(row.keys().collect::<Vec<_>>(), vec!["Ativo", "Quantidade"]);
        assert_eq!(row.get("Ativo"), Some("VALE3"));
        assert_eq!(row.value_at(1), Some("100"));
        assert_eq!(
            serde_json::to_string(&row).unwrap(),
            r#"{"Ativo":"VALE3","Quantidade":"100"}"#
        );
    }

    #[test]
    fn test_blank_rows() {
        let row: RowRecord = [("a", " "), ("b", "")].into_iter().collect();
        assert!(row.is_blank());
        assert!(!row.clone().with("c", "1").is_blank());
    }

    #[test]
    fn test_column_problems() {
        assert_eq!(ColumnDefinition::simple("P/L", "cell", "value").problem(), None);
        assert_eq!(
            ColumnDefinition::simple("P/L", "cell", " ").problem(),
            Some("Configuração de coluna simples incompleta")
        );
        assert_eq!(
            ColumnDefinition::advanced("DY", "").problem(),
            Some("Seletor CSS não definido")
        );
    }

    #[test]
    fn test_column_kind_accepts_legacy_names() {
        let col: ColumnDefinition = serde_json::from_str(
            r##"{"name":"DY","kind":"avancado","css_selector":"#dy","excel_format":"Porcentagem"}"##,
        )
        .unwrap();
        assert_eq!(col.kind, ColumnKind::Advanced);
        assert_eq!(col.excel_format, ExcelFormat::Percentage);
    }
}
