use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Eight lowercase hex characters, enough to keep two uploads in the same millisecond apart.
pub fn short_random() -> String {
    let mut simple = Uuid::new_v4().simple().to_string();
    simple.truncate(8);
    simple
}

/// A key for a newly uploaded object: `{unix millis}-{random}.{ext}`. Keys sort by upload time.
pub fn storage_object_key(extension: &str, now: DateTime<Utc>) -> String {
    let extension = extension.trim_start_matches('.').to_ascii_lowercase();
    format!("{}-{}.{extension}", now.timestamp_millis(), short_random())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_random() {
        let a = short_random();
        assert_eq!(a.len(), 8);
        assert_ne!(a, short_random());
    }

    #[test]
    fn test_storage_object_key() {
        let now = DateTime::from_timestamp_millis(1_730_880_000_123).unwrap();
        let key = storage_object_key(".JPG", now);

        let (stem, extension) = key.rsplit_once('.').unwrap();
        assert_eq!(extension, "jpg");
        let (millis, random) = stem.split_once('-').unwrap();
        assert_eq!(millis, "1730880000123");
        assert_eq!(random.len(), 8);
        assert!(random.chars().all(|c| c.is_ascii_hexdigit()));

        assert_ne!(key, storage_object_key("jpg", now));
    }
}
