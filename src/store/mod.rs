/// Persistent storage for the media repository
///
/// Datastores name the destinations blobs are written to, the registry maps
/// their URIs to stable generated identifiers, the persister streams bytes
/// onto disk, and the media store tracks media and thumbnail records.

pub mod media_store;
pub mod models;
pub mod persister;
pub mod registry;

pub use media_store::MediaStore;
pub use models::{Datastore, Media, Thumbnail};
pub use persister::FilePersister;
pub use registry::DatastoreRegistry;

use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};

/// Length of generated datastore, media, and blob file identifiers
pub const GENERATED_ID_LENGTH: usize = 32;

/// Generate a random identifier from the OS entropy source.
/// Alphabet is A-Z, a-z, 0-9.
pub(crate) fn generate_secure_id(length: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// True when a sqlx error is a uniqueness violation reported by the storage
/// layer. Losers of an insert race treat this as success and re-read.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_alphanumeric_and_sized() {
        let id = generate_secure_id(GENERATED_ID_LENGTH);
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        let a = generate_secure_id(GENERATED_ID_LENGTH);
        let b = generate_secure_id(GENERATED_ID_LENGTH);
        assert_ne!(a, b);
    }
}
