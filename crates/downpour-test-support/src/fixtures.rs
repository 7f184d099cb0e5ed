//! Download record builders shared by unit and integration suites.

use downpour_core::{DownloadRecord, UserDownloads};

/// A record still being fetched upstream.
#[must_use]
pub fn active_record(id: &str, progress: u8) -> DownloadRecord {
    DownloadRecord {
        id: id.to_string(),
        filename: format!("{id}.mkv"),
        progress,
        status: "downloading".to_string(),
        ..DownloadRecord::default()
    }
}

/// A settled record holding an already-unrestricted direct link.
#[must_use]
pub fn completed_record(id: &str, link: &str) -> DownloadRecord {
    DownloadRecord {
        id: id.to_string(),
        filename: format!("{id}.mkv"),
        progress: 100,
        status: "downloaded".to_string(),
        link: link.to_string(),
        resolved: true,
        ..DownloadRecord::default()
    }
}

/// A user owning the given records.
#[must_use]
pub fn user(username: &str, downloads: Vec<DownloadRecord>) -> UserDownloads {
    UserDownloads {
        username: username.to_string(),
        downloads,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_records_poll_and_completed_records_do_not() {
        assert!(active_record("t1", 40).is_active());
        assert!(!completed_record("t2", "https://cdn.example.net/f").is_active());
    }

    #[test]
    fn completed_records_carry_a_resolved_link() {
        let record = completed_record("t2", "https://cdn.example.net/f");
        assert!(record.link_is_resolved());
    }

    #[test]
    fn user_builder_counts_active_records() {
        let owner = user(
            "alice",
            vec![
                active_record("t1", 40),
                completed_record("t2", "https://cdn.example.net/f"),
            ],
        );
        assert_eq!(owner.active_count(), 1);
    }
}
