//! Terminal output formatting
//!
//! Human output as comfy-table tables, machine output as JSON, selected per
//! command by the `--json` flag.

use chrono::{DateTime, Utc};
use comfy_table::{Cell, ContentArrangement, Table};
use scribe_core::{ConnectivityState, CreditBundle, GenerationReceipt, PipelineState};

fn base_table() -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Render the credit balance.
pub fn format_balance(balance: u32, last_synced: Option<DateTime<Utc>>, json: bool) -> String {
    if json {
        return serde_json::json!({
            "balance": balance,
            "lastSyncedAt": last_synced.map(|t| t.to_rfc3339()),
        })
        .to_string();
    }

    let mut table = base_table();
    table.set_header(vec!["Credits", "Last synced"]);
    table.add_row(vec![
        Cell::new(balance),
        Cell::new(
            last_synced
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string()),
        ),
    ]);
    table.to_string()
}

/// Render the pipeline status overview.
pub fn format_status(
    signed_in: bool,
    balance: u32,
    last_synced: Option<DateTime<Utc>>,
    connectivity: ConnectivityState,
    state: PipelineState,
    waiting_for_network: bool,
    can_submit: bool,
    json: bool,
) -> String {
    if json {
        return serde_json::json!({
            "signedIn": signed_in,
            "balance": balance,
            "lastSyncedAt": last_synced.map(|t| t.to_rfc3339()),
            "connectivity": match connectivity {
                ConnectivityState::Online => "online",
                ConnectivityState::Offline => "offline",
            },
            "state": state,
            "waitingForNetwork": waiting_for_network,
            "canSubmit": can_submit,
        })
        .to_string();
    }

    let mut table = base_table();
    table.set_header(vec!["Field", "Value"]);
    table.add_row(vec!["Signed in", if signed_in { "yes" } else { "no" }]);
    table.add_row(vec!["Credits".to_string(), balance.to_string()]);
    table.add_row(vec![
        "Last synced".to_string(),
        last_synced
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string()),
    ]);
    table.add_row(vec![
        "Connectivity",
        match connectivity {
            ConnectivityState::Online => "online",
            ConnectivityState::Offline => "offline",
        },
    ]);
    table.add_row(vec!["State".to_string(), format!("{:?}", state)]);
    table.add_row(vec![
        "Waiting for network",
        if waiting_for_network { "yes" } else { "no" },
    ]);
    table.add_row(vec!["Can submit", if can_submit { "yes" } else { "no" }]);
    table.to_string()
}

/// Render a finished generation.
pub fn format_receipt(receipt: &GenerationReceipt, json: bool) -> String {
    if json {
        return serde_json::json!({
            "content": receipt.content,
            "remainingCredits": receipt.remaining_credits,
        })
        .to_string();
    }

    match receipt.remaining_credits {
        Some(remaining) => format!("{}\n\n({} credits remaining)", receipt.content, remaining),
        None => receipt.content.clone(),
    }
}

/// Render the purchase offer shown when credits run out.
pub fn format_offer(bundle: &CreditBundle) -> String {
    format!(
        "Out of credits. Buy {} for {}.{:02} with `scribe buy`.",
        bundle.line_item_label,
        bundle.total_minor_units() / 100,
        bundle.total_minor_units() % 100,
    )
}
