use crate::sync::get::ListEntry;
use log::{error, info};

pub fn display_entries(entries: &[ListEntry], json: bool) {
    if entries.is_empty() {
        info!("no messages");
        return;
    }

    if json {
        match serde_json::to_string_pretty(entries) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Error converting to JSON: {}", e),
        }
        return;
    }

    entries
        .iter()
        .for_each(|entry| println!("{} {} ({})", entry.seq, entry.subject, entry.date));
}
