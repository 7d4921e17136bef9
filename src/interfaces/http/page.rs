//! HTML rendering for the public verification page.

use crate::application::verification::VerificationResult;
use crate::domain::audit::VerificationOutcome;

pub fn render_verification(result: &VerificationResult) -> String {
    let (title, tone) = match result.outcome {
        VerificationOutcome::Success => ("Payment verified", "ok"),
        VerificationOutcome::Expired => ("Link expired", "warn"),
        VerificationOutcome::Invalid => ("Invalid link", "error"),
        VerificationOutcome::Failed => ("Verification unavailable", "error"),
    };

    let details = match &result.payment_data {
        Some(payment) => format!(
            "<table>\
             <tr><th>Voucher</th><td>{}</td></tr>\
             <tr><th>Company</th><td>{}</td></tr>\
             <tr><th>Counterparty</th><td>{}</td></tr>\
             <tr><th>Amount</th><td>{} {}</td></tr>\
             <tr><th>Status</th><td>{}</td></tr>\
             </table>",
            escape(&payment.voucher_number),
            escape(&payment.company),
            escape(&payment.counterparty_name),
            payment.amount,
            escape(&payment.currency),
            payment.approval_state,
        ),
        None => String::new(),
    };

    let reference = result
        .code
        .as_deref()
        .map(|code| format!("<p class=\"ref\">Reference: {}</p>", escape(code)))
        .unwrap_or_default();

    format!(
        "<!DOCTYPE html>\
         <html lang=\"en\"><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         <title>{title}</title></head>\
         <body class=\"{tone}\"><main>\
         <h1>{title}</h1><p>{message}</p>{details}{reference}\
         </main></body></html>",
        message = escape(&result.message),
    )
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
            _ => out.push(c),
        }
    }
    out
}
