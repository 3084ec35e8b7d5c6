//! Statement report model: what a rendered statement shows, already formatted.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::account::MirroredAccount;
use crate::movement::{Direction, Movement};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const NO_COUNTERPARTY: &str = " - ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementRow {
    pub created_at: String,
    pub kind: String,
    pub counterparty: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementReport {
    pub document: String,
    pub customer_name: String,
    pub account_number: String,
    pub rows: Vec<StatementRow>,
}

impl StatementReport {
    /// Build the report for `account` from its movement history, in the order given.
    pub fn build(account: &MirroredAccount, movements: &[Movement]) -> Self {
        Self {
            document: account.document().to_string(),
            customer_name: account.name().to_string(),
            account_number: account.number().to_string(),
            rows: movements.iter().map(row).collect(),
        }
    }
}

fn row(movement: &Movement) -> StatementRow {
    StatementRow {
        created_at: format_timestamp(movement.created_at),
        kind: direction_label(movement.direction).to_string(),
        counterparty: movement
            .counterparty
            .map(|n| n.to_string())
            .unwrap_or_else(|| NO_COUNTERPARTY.to_string()),
        amount: format_amount(movement.value),
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

fn direction_label(direction: Direction) -> &'static str {
    match direction {
        Direction::In => "Entrada",
        Direction::Out => "Saída",
    }
}

/// Format minor units as `R$ <units>.<cents>` without going through floats.
pub fn format_amount(minor_units: i64) -> String {
    let sign = if minor_units < 0 { "-" } else { "" };
    let abs = minor_units.unsigned_abs();
    format!("R$ {sign}{}.{:02}", abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerflow_core::{AccountName, AccountNumber, Document};
    use proptest::prelude::*;

    fn account() -> MirroredAccount {
        MirroredAccount::created(
            AccountNumber::FIRST,
            Document::parse("01234567890").unwrap(),
            AccountName::parse("John Doe").unwrap(),
        )
    }

    fn at() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn amounts_keep_their_cents() {
        assert_eq!(format_amount(150), "R$ 1.50");
        assert_eq!(format_amount(15_000), "R$ 150.00");
        assert_eq!(format_amount(7), "R$ 0.07");
        assert_eq!(format_amount(0), "R$ 0.00");
        assert_eq!(format_amount(-250), "R$ -2.50");
    }

    #[test]
    fn rows_are_labelled_and_formatted() {
        let other = AccountNumber::new(2).unwrap();
        let movements = vec![
            Movement::deposit(AccountNumber::FIRST, 15_000, at()),
            Movement::transfer_out(AccountNumber::FIRST, other, 2_550, at()),
        ];

        let report = StatementReport::build(&account(), &movements);

        assert_eq!(report.customer_name, "John Doe");
        assert_eq!(report.document, "01234567890");
        assert_eq!(
            report.rows[0],
            StatementRow {
                created_at: "2023-11-14 22:13:20".to_string(),
                kind: "Entrada".to_string(),
                counterparty: " - ".to_string(),
                amount: "R$ 150.00".to_string(),
            }
        );
        assert_eq!(report.rows[1].kind, "Saída");
        assert_eq!(report.rows[1].counterparty, "2");
        assert_eq!(report.rows[1].amount, "R$ 25.50");
    }

    #[test]
    fn account_without_movements_has_no_rows() {
        assert!(StatementReport::build(&account(), &[]).rows.is_empty());
    }

    proptest! {
        /// Property: the formatted amount parses back to the same minor units.
        #[test]
        fn amount_formatting_is_lossless(value in 0i64..10_000_000_000) {
            let formatted = format_amount(value);
            let digits: String = formatted
                .trim_start_matches("R$ ")
                .chars()
                .filter(|c| *c != '.')
                .collect();
            prop_assert_eq!(digits.parse::<i64>().unwrap(), value);
        }
    }
}
