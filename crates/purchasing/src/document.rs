//! Parsed supplier document (invoice / delivery note).
//!
//! Wire parsing (XML, CSV) happens upstream; this is the shape handed to the
//! importer.

use std::collections::HashSet;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_matching::ExternalItem;
use stockledger_parties::SupplierId;

use crate::error::ImportDomainError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSupplier {
    /// As printed on the document; normalized by the importer.
    pub tax_id: String,
    pub company_name: String,
    pub trade_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLine {
    pub line_number: u32,
    pub supplier_sku: Option<String>,
    pub barcode: Option<String>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub unit: Option<String>,
}

impl DocumentLine {
    pub fn new(line_number: u32, description: impl Into<String>, quantity: Decimal, unit_cost: Decimal) -> Self {
        Self {
            line_number,
            supplier_sku: None,
            barcode: None,
            description: description.into(),
            quantity,
            unit_cost,
            unit: None,
        }
    }

    pub fn with_sku(mut self, sku: impl Into<String>) -> Self {
        self.supplier_sku = Some(sku.into());
        self
    }

    pub fn with_barcode(mut self, barcode: impl Into<String>) -> Self {
        self.barcode = Some(barcode.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Line-level checks. A failure here fails only this line.
    pub fn validate(&self) -> Result<(), String> {
        if self.quantity <= Decimal::ZERO {
            return Err(format!("line {}: quantity must be positive", self.line_number));
        }
        if self.unit_cost < Decimal::ZERO {
            return Err(format!("line {}: unit cost cannot be negative", self.line_number));
        }
        let has_sku = self.supplier_sku.as_deref().is_some_and(|s| !s.trim().is_empty());
        if !has_sku && self.description.trim().is_empty() {
            return Err(format!("line {}: no item code or description", self.line_number));
        }
        Ok(())
    }

    /// The line as input to the matcher.
    pub fn external_item(&self, supplier: SupplierId) -> ExternalItem {
        ExternalItem {
            supplier: Some(supplier),
            supplier_sku: self.supplier_sku.clone(),
            barcode: self.barcode.clone(),
            description: self.description.clone(),
        }
    }

    pub fn normalized_unit(&self) -> String {
        normalize_unit(self.unit.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierDocument {
    /// Unique access key of the document; the dedup identity.
    pub key: String,
    pub number: Option<String>,
    pub issued_on: NaiveDate,
    pub supplier: DocumentSupplier,
    pub lines: Vec<DocumentLine>,
}

impl SupplierDocument {
    /// Document-level checks. A failure here rejects the whole document.
    pub fn validate(&self) -> Result<(), ImportDomainError> {
        if self.key.trim().is_empty() {
            return Err(ImportDomainError::MalformedDocument("document key is empty".into()));
        }
        if self.supplier.tax_id.trim().is_empty() {
            return Err(ImportDomainError::MalformedDocument("supplier tax id is empty".into()));
        }
        if self.lines.is_empty() {
            return Err(ImportDomainError::MalformedDocument("document has no lines".into()));
        }
        let mut seen = HashSet::new();
        for line in &self.lines {
            if !seen.insert(line.line_number) {
                return Err(ImportDomainError::MalformedDocument(format!(
                    "line number {} appears twice",
                    line.line_number
                )));
            }
        }
        Ok(())
    }
}

/// Map the unit spellings found on supplier documents to the catalog's
/// short codes. Unknown units pass through uppercased; missing is `UN`.
pub fn normalize_unit(raw: Option<&str>) -> String {
    let unit = match raw.map(str::trim).filter(|u| !u.is_empty()) {
        Some(u) => u.to_uppercase(),
        None => return "UN".to_string(),
    };
    let mapped = match unit.as_str() {
        "UNID" | "UND" | "UN" => "UN",
        "PÇ" | "PÇA" | "PEC" | "PECA" | "PC" => "PC",
        "CX" | "CAIXA" => "CX",
        "KG" | "KILOGRAMA" => "KG",
        "MT" | "METRO" | "MTS" | "M" => "M",
        "LT" | "LITRO" | "L" => "L",
        _ => return unit,
    };
    mapped.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_document() -> SupplierDocument {
        SupplierDocument {
            key: "35260311222333000181550010000012341000012345".into(),
            number: Some("1234".into()),
            issued_on: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
            supplier: DocumentSupplier {
                tax_id: "11.222.333/0001-81".into(),
                company_name: "Linhas Corrente Ltda".into(),
                trade_name: None,
            },
            lines: vec![
                DocumentLine::new(1, "LINHA AZUL", Decimal::from(10), Decimal::new(250, 2)),
                DocumentLine::new(2, "LINHA VERDE", Decimal::from(5), Decimal::new(250, 2)),
            ],
        }
    }

    #[test]
    fn valid_document_passes() {
        assert!(test_document().validate().is_ok());
    }

    #[test]
    fn duplicate_line_numbers_are_malformed() {
        let mut doc = test_document();
        doc.lines[1].line_number = 1;
        assert!(matches!(doc.validate(), Err(ImportDomainError::MalformedDocument(_))));
    }

    #[test]
    fn empty_key_or_lines_are_malformed() {
        let mut doc = test_document();
        doc.key = "  ".into();
        assert!(doc.validate().is_err());

        let mut doc = test_document();
        doc.lines.clear();
        assert!(doc.validate().is_err());
    }

    #[test]
    fn line_validation_is_local() {
        let line = DocumentLine::new(3, "X", Decimal::ZERO, Decimal::ONE);
        assert!(line.validate().unwrap_err().contains("line 3"));
        let line = DocumentLine::new(4, "", Decimal::ONE, Decimal::ONE);
        assert!(line.validate().is_err());
        let line = DocumentLine::new(5, "", Decimal::ONE, Decimal::ONE).with_sku("S-1");
        assert!(line.validate().is_ok());
    }

    #[test]
    fn units_are_normalized() {
        assert_eq!(normalize_unit(Some(" unid ")), "UN");
        assert_eq!(normalize_unit(Some("Peca")), "PC");
        assert_eq!(normalize_unit(Some("metro")), "M");
        assert_eq!(normalize_unit(Some("rolo")), "ROLO");
        assert_eq!(normalize_unit(None), "UN");
    }
}
