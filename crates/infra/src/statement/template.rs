//! Report model to HTML.

use std::fmt::Write;

use thiserror::Error;

use ledgerflow_statements::StatementReport;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("failed to write statement document: {0}")]
    Write(String),
}

impl From<std::fmt::Error> for TemplateError {
    fn from(err: std::fmt::Error) -> Self {
        TemplateError::Write(err.to_string())
    }
}

/// Turns a report model into a document the renderer accepts.
pub trait StatementTemplate: Send + Sync {
    fn compile(&self, report: &StatementReport) -> Result<String, TemplateError>;
}

/// Built-in HTML statement layout. Every interpolated value is escaped.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlStatementTemplate;

const STYLE: &str = "body{font-family:sans-serif;margin:32px;color:#222}\
table{width:100%;border-collapse:collapse;margin-top:24px}\
th,td{border-bottom:1px solid #ddd;padding:6px 8px;text-align:left}\
td.amount{text-align:right}";

impl StatementTemplate for HtmlStatementTemplate {
    fn compile(&self, report: &StatementReport) -> Result<String, TemplateError> {
        let mut html = String::with_capacity(1024 + report.rows.len() * 160);

        write!(
            html,
            "<!DOCTYPE html><html lang=\"pt-BR\"><head><meta charset=\"utf-8\">\
             <title>Extrato</title><style>{STYLE}</style></head><body>"
        )?;
        write!(
            html,
            "<h1>Extrato</h1><p>Cliente: {}</p><p>Documento: {}</p><p>Conta: {}</p>",
            escape(&report.customer_name),
            escape(&report.document),
            escape(&report.account_number),
        )?;

        html.push_str(
            "<table><thead><tr><th>Data</th><th>Tipo</th><th>Conta</th><th>Valor</th></tr></thead><tbody>",
        );
        for row in &report.rows {
            write!(
                html,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td class=\"amount\">{}</td></tr>",
                escape(&row.created_at),
                escape(&row.kind),
                escape(&row.counterparty),
                escape(&row.amount),
            )?;
        }
        html.push_str("</tbody></table></body></html>");

        Ok(html)
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
