// Network transport for the bill-split ledger. The binary in `main.rs` wires
// this to the actor from `billsplit-app`; integration tests drive it directly.

pub mod ws_server;
