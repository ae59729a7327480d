//! Generate a peer id.

use taskflow_sync_types::PeerId;

/// Run the peer-id command.
pub fn run(prefix: &str) -> PeerId {
    let id = PeerId::generate_with_prefix(prefix);
    println!("{id}");
    id
}
