use mirror_ports::Reservoir;
use mirror_sync::{StreamingClient, TerminalState};
use tracing::info;

pub fn log_terminal_state(state: &TerminalState) {
    let account = state.account_information();
    info!(
        account_id = state.account_id(),
        connected = state.connected(),
        connected_to_broker = state.connected_to_broker(),
        synchronized = state.is_synchronized(),
        positions = state.positions().len(),
        orders = state.orders().len(),
        balance = ?account.as_ref().map(|a| a.balance),
        equity = ?account.as_ref().map(|a| a.equity),
        free_margin = ?account.as_ref().map(|a| a.free_margin),
        "Terminal state"
    );
}

/// Log every account's terminal plus client-wide counters
pub fn log_client(client: &StreamingClient, latency: Option<&dyn Reservoir>) {
    for account_id in client.account_ids() {
        if let Some(state) = client.terminal_state(&account_id) {
            log_terminal_state(&state);
        }
    }

    let throttler = client.throttler();
    info!(
        active_synchronizations = throttler.active_synchronization_ids().len(),
        queued_synchronizations = throttler.queue_len(),
        latency_avg_ms = ?latency.and_then(|l| l.average()),
        latency_p99_ms = ?latency.and_then(|l| l.percentile(99.0)),
        "Client status"
    );
}
