//! Record assembly: per-entity rows and the final named collections.

use crate::models::{ERROR_FIELD, ORIGIN_FIELD, Origin, RowRecord, TICKER_FIELD};
use tracing::debug;

pub const STOCKS_SHEET: &str = "Acoes";
pub const PORTFOLIO_SHEET: &str = "Carteiras";

fn is_reserved(name: &str) -> bool {
    name == TICKER_FIELD || name == ORIGIN_FIELD
}

/// `Ticker` and `Origin` first, then the column values in order. Columns
/// named like the reserved fields are dropped.
pub fn assemble(key: &str, origin: Origin, values: Vec<(String, String)>) -> RowRecord {
    let mut row = RowRecord::new()
        .with(TICKER_FIELD, key)
        .with(ORIGIN_FIELD, origin.label());
    for (name, value) in values {
        if is_reserved(&name) {
            debug!("column {} shadows a reserved field, skipped", name);
            continue;
        }
        row.insert(name, value);
    }
    row
}

/// Row for an entity whose page could not be processed.
pub fn assemble_error(key: &str, origin: Origin, error: &str) -> RowRecord {
    with_error(assemble(key, origin, Vec::new()), error)
}

/// Attach an error under `Erro`, leaving column values untouched. A second
/// error is appended to the first.
pub fn with_error(mut row: RowRecord, error: &str) -> RowRecord {
    let merged = match row.get(ERROR_FIELD) {
        Some(existing) if !existing.is_empty() => format!("{existing}; {error}"),
        _ => error.to_string(),
    };
    row.insert(ERROR_FIELD, merged);
    row
}

/// Stamp the same origin on every bulk row.
pub fn stamp_origin(rows: Vec<RowRecord>, origin: Origin) -> Vec<RowRecord> {
    rows.into_iter()
        .map(|mut row| {
            row.insert(ORIGIN_FIELD, origin.label());
            row
        })
        .collect()
}

/// Everything one run produced, by provenance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub stocks: Vec<RowRecord>,
    pub funds: Vec<RowRecord>,
    pub portfolio_stocks: Vec<RowRecord>,
    pub portfolio_funds: Vec<RowRecord>,
}

impl Dataset {
    pub fn extend(&mut self, origin: Origin, rows: Vec<RowRecord>) {
        let target = match origin {
            Origin::Stock => &mut self.stocks,
            Origin::Fund => &mut self.funds,
            Origin::PortfolioStock => &mut self.portfolio_stocks,
            Origin::PortfolioFund => &mut self.portfolio_funds,
        };
        target.extend(rows);
    }

    pub fn len(&self) -> usize {
        self.stocks.len() + self.funds.len() + self.portfolio_stocks.len() + self.portfolio_funds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entity rows carrying an `Erro` field.
    pub fn error_count(&self) -> usize {
        self.stocks
            .iter()
            .chain(&self.funds)
            .filter(|r| r.get(ERROR_FIELD).is_some())
            .count()
    }

    /// Named collections handed to the exporter: entity pages and portfolios.
    pub fn sheets(&self) -> Vec<(&'static str, Vec<&RowRecord>)> {
        vec![
            (STOCKS_SHEET, self.stocks.iter().chain(&self.funds).collect()),
            (
                PORTFOLIO_SHEET,
                self.portfolio_stocks.iter().chain(&self.portfolio_funds).collect(),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_assemble_orders_fields() {
        let row = assemble("PETR4", Origin::Stock, values(&[("P/L", "4,2"), ("Ticker", "x"), ("DY", "N/A")]));
        assert_eq!(row.keys().collect::<Vec<_>>(), vec!["Ticker", "Origin", "P/L", "DY"]);
        assert_eq!(row.get("Ticker"), Some("PETR4"));
        assert_eq!(row.get("Origin"), Some("Stock"));
    }

    #[test]
    fn test_errors_merge_without_overwriting_values() {
        let row = assemble("HGLG11", Origin::Fund, values(&[("DY", "8,1%")]));
        let row = with_error(with_error(row, "coluna P/VP falhou"), "timeout");
        assert_eq!(row.get("DY"), Some("8,1%"));
        assert_eq!(row.get("Erro"), Some("coluna P/VP falhou; timeout"));
    }

    #[test]
    fn test_error_record() {
        let row = assemble_error("XYZ4", Origin::Stock, "Página não carregou");
        assert_eq!(
            row,
            RowRecord::new()
                .with("Ticker", "XYZ4")
                .with("Origin", "Stock")
                .with("Erro", "Página não carregou")
        );
    }

    #[test]
    fn test_dataset_sheets() {
        let mut data = Dataset::default();
        data.extend(Origin::Stock, vec![assemble("PETR4", Origin::Stock, vec![])]);
        data.extend(Origin::Fund, vec![assemble_error("HGLG11", Origin::Fund, "erro")]);
        let bulk = vec![RowRecord::new().with("Ativo", "VALE3")];
        data.extend(Origin::PortfolioStock, stamp_origin(bulk, Origin::PortfolioStock));

        assert_eq!(data.len(), 3);
        assert_eq!(data.error_count(), 1);
        assert_eq!(data.portfolio_stocks[0].get("Origin"), Some("PortfolioStock"));

        let sheets = data.sheets();
        assert_eq!(sheets[0].0, "Acoes");
        assert_eq!(sheets[0].1.len(), 2);
        assert_eq!(sheets[1].1.len(), 1);
    }
}
