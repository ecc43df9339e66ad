// crates/flowcore-rpc/src/ids.rs
// ============================================================================
// Module: Flowcore RPC Id Generation
// Description: Mints opaque ids for create-ops whose caller left the id
//              field blank (spec.md §4.10 "IDs generated when absent").
// Purpose: Give `saveFlow`/`saveTrigger`/`startRun` a single id-minting
//          convention, shared with the Trigger Manager's own run id
//          minting.
// Dependencies: rand
// ============================================================================

use rand::RngCore;
use rand::rngs::OsRng;

/// Returns a random lowercase-hex id with the given prefix, e.g.
/// `flow-3f9a...`.
#[must_use]
pub fn new_id(prefix: &str) -> String {
    let mut bytes = [0_u8; 16];
    OsRng.fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("{prefix}-{hex}")
}
