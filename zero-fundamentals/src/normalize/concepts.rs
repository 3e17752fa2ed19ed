//! Versioned concept alias table and the single matcher that reads it.
//!
//! Provider concept names drift between filers and over time
//! (`us-gaap_Revenues`, `us-gaap_RevenueFromContractWithCustomer...`,
//! `revenue`). The aliases live in `concepts.json` so that such drift is a
//! data change. A custom table can be loaded with [`ConceptTable::from_json`].

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

const BUILTIN_TABLE: &str = include_str!("concepts.json");

static BUILTIN: Lazy<Arc<ConceptTable>> = Lazy::new(|| {
    match ConceptTable::from_json(BUILTIN_TABLE) {
        Ok(table) => Arc::new(table),
        Err(e) => {
            tracing::error!(error = %e, "Built-in concept table is invalid");
            Arc::new(ConceptTable::empty())
        }
    }
});

/// Canonical fields resolved from raw statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConceptField {
    Revenue,
    NetIncome,
    NetIncomeToCommon,
    OperatingIncome,
    GrossProfit,
    Eps,
    EpsBasic,
    SharesOutstanding,
    SharesBasic,
    SharesDiluted,
    TotalAssets,
    TotalLiabilities,
    TotalEquity,
    LongTermDebt,
    ShortTermDebt,
    Cash,
    OperatingCashFlow,
    CapitalExpenditures,
    DividendsPaid,
    FreeCashFlow,
}

/// Statement section of a reported filing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statement {
    Bs,
    Ic,
    Cf,
}

/// Aliases for one field, most specific first.
#[derive(Debug, Clone, Deserialize)]
pub struct ConceptRule {
    pub field: ConceptField,
    pub statements: Vec<Statement>,
    pub aliases: Vec<String>,
    #[serde(default)]
    pub excludes: Vec<String>,
}

/// Ordered field → alias rules plus a version tag.
#[derive(Debug, Clone, Deserialize)]
pub struct ConceptTable {
    pub version: String,
    fields: Vec<ConceptRule>,
    #[serde(skip)]
    index: HashMap<ConceptField, usize>,
}

/// A `{concept, value}` pair after numeric parsing.
#[derive(Debug, Clone, Copy)]
pub struct ConceptValue<'a> {
    pub concept: &'a str,
    pub value: f64,
}

impl ConceptTable {
    /// The table compiled into the binary.
    pub fn builtin() -> Arc<ConceptTable> {
        Arc::clone(&BUILTIN)
    }

    /// Parse a table from JSON. Aliases and excludes are lower-cased.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut table: ConceptTable =
            serde_json::from_str(json).context("Failed to parse concept table")?;

        for rule in &mut table.fields {
            rule.aliases = rule.aliases.iter().map(|a| normalize_name(a)).collect();
            rule.excludes = rule.excludes.iter().map(|e| normalize_name(e)).collect();
        }
        table.index = table
            .fields
            .iter()
            .enumerate()
            .map(|(i, rule)| (rule.field, i))
            .collect();
        Ok(table)
    }

    fn empty() -> Self {
        Self {
            version: "empty".into(),
            fields: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn rule(&self, field: ConceptField) -> Option<&ConceptRule> {
        self.index.get(&field).map(|&i| &self.fields[i])
    }

    /// Resolve `field` against `entries`.
    ///
    /// Two passes over the aliases in order: first an exact match on the
    /// concept's local name, then case-insensitive containment that skips
    /// names carrying an excluded fragment. The first hit wins.
    pub fn find(&self, field: ConceptField, entries: &[ConceptValue<'_>]) -> Option<f64> {
        let rule = self.rule(field)?;
        let names: Vec<String> = entries.iter().map(|e| normalize_name(e.concept)).collect();

        for alias in &rule.aliases {
            if let Some(i) = names.iter().position(|n| n == alias) {
                return Some(entries[i].value);
            }
        }

        for alias in &rule.aliases {
            let hit = names.iter().position(|n| {
                n.contains(alias.as_str()) && !rule.excludes.iter().any(|x| n.contains(x.as_str()))
            });
            if let Some(i) = hit {
                return Some(entries[i].value);
            }
        }

        None
    }
}

/// Lower-case local name with namespace and punctuation removed.
///
/// `us-gaap_NetIncomeLoss` and `ifrs-full:Revenue` lose their namespace;
/// `netIncome` and `net_income` both become `netincome`.
pub fn normalize_name(concept: &str) -> String {
    let local = match concept.split_once(|c| c == '_' || c == ':') {
        Some((ns, rest))
            if rest.chars().next().is_some_and(|c| c.is_ascii_uppercase())
                && ns.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') =>
        {
            rest
        }
        _ => concept,
    };

    local
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries<'a>(pairs: &[(&'a str, f64)]) -> Vec<ConceptValue<'a>> {
        pairs
            .iter()
            .map(|(concept, value)| ConceptValue { concept, value: *value })
            .collect()
    }

    #[test]
    fn test_builtin_table_loads() {
        let table = ConceptTable::builtin();
        assert!(!table.version.is_empty());
        assert!(table.rule(ConceptField::Revenue).is_some());
        assert!(table.rule(ConceptField::FreeCashFlow).is_some());
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("us-gaap_NetIncomeLoss"), "netincomeloss");
        assert_eq!(normalize_name("ifrs-full:Revenue"), "revenue");
        assert_eq!(normalize_name("netIncome"), "netincome");
        assert_eq!(normalize_name("net_income"), "netincome");
    }

    #[test]
    fn test_exact_match_beats_earlier_contains() {
        let table = ConceptTable::builtin();
        let lines = entries(&[
            ("us-gaap_NetIncomeLossAttributableToNoncontrollingInterest", 5.0),
            ("us-gaap_NetIncomeLoss", 100.0),
        ]);
        assert_eq!(table.find(ConceptField::NetIncome, &lines), Some(100.0));
    }

    #[test]
    fn test_excludes_block_cost_of_revenue() {
        let table = ConceptTable::builtin();
        let lines = entries(&[("us-gaap_CostOfRevenue", 60.0)]);
        assert_eq!(table.find(ConceptField::Revenue, &lines), None);

        let lines = entries(&[
            ("us-gaap_CostOfRevenue", 60.0),
            ("custom_TotalNetRevenues", 100.0),
        ]);
        assert_eq!(table.find(ConceptField::Revenue, &lines), Some(100.0));
    }

    #[test]
    fn test_alias_order_is_most_specific_first() {
        let table = ConceptTable::builtin();
        let lines = entries(&[
            ("us-gaap_Revenues", 90.0),
            ("us-gaap_RevenueFromContractWithCustomerExcludingAssessedTax", 100.0),
        ]);
        assert_eq!(table.find(ConceptField::Revenue, &lines), Some(100.0));
    }

    #[test]
    fn test_debt_current_and_noncurrent_are_distinct() {
        let table = ConceptTable::builtin();
        let lines = entries(&[
            ("us-gaap_LongTermDebtCurrent", 10.0),
            ("us-gaap_LongTermDebtNoncurrent", 90.0),
        ]);
        assert_eq!(table.find(ConceptField::LongTermDebt, &lines), Some(90.0));
        assert_eq!(table.find(ConceptField::ShortTermDebt, &lines), Some(10.0));
    }

    #[test]
    fn test_custom_table() {
        let json = r#"{
            "version": "test-1",
            "fields": [
                {"field": "revenue", "statements": ["ic"], "aliases": ["Turnover"]}
            ]
        }"#;
        let table = ConceptTable::from_json(json).unwrap();
        assert_eq!(table.version, "test-1");
        let lines = entries(&[("uk-gaap_Turnover", 42.0)]);
        assert_eq!(table.find(ConceptField::Revenue, &lines), Some(42.0));
        assert_eq!(table.find(ConceptField::NetIncome, &lines), None);
    }

    #[test]
    fn test_invalid_table_is_error() {
        let bogus = r#"{"version": "x", "fields": [{"field": "bogus"}]}"#;
        assert!(ConceptTable::from_json(bogus).is_err());
    }
}
