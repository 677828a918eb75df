//! In-memory session store: user key material, registration progress and
//! reserved pending-message slots, each keyed by uid.
//!
//! The store owns every row. Reads hand out clones; callers mutate the copy
//! and resubmit it with `update`, or use `modify` for an in-place
//! read-modify-write under the row's shard lock.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use relaychat_shared::envelope::Content;
use relaychat_shared::error::RelayError;
use relaychat_shared::ids::Uid;

/// A row addressable by uid.
pub trait Row: Clone {
    fn uid(&self) -> &Uid;
}

/// A client's public key bundle and, once received, its wrapped session key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserKeyRow {
    pub uid: Uid,
    /// Base64 public key bundle sent at registration.
    pub public_key: String,
    /// Session key wrapped under the relay's public key. Never stored unwrapped.
    pub wrapped_symmetric_key: Option<String>,
}

impl UserKeyRow {
    pub fn new(uid: Uid, public_key: String) -> Self {
        Self {
            uid,
            public_key,
            wrapped_symmetric_key: None,
        }
    }
}

impl Row for UserKeyRow {
    fn uid(&self) -> &Uid {
        &self.uid
    }
}

/// Monotonic registration progress for one uid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRow {
    pub uid: Uid,
    pub otp_sent: bool,
    pub otp_sent_at: Option<DateTime<Utc>>,
    /// The code most recently issued.
    pub otp_value: Option<String>,
    /// Wrong echoes received over the whole registration, across reissues.
    pub otp_attempts: u32,
    pub otp_confirmed: bool,
    pub symmetric_key_received: bool,
    pub public_key_received: bool,
    registration_complete: bool,
}

impl RegistrationRow {
    pub fn new(uid: Uid) -> Self {
        Self {
            uid,
            otp_sent: false,
            otp_sent_at: None,
            otp_value: None,
            otp_attempts: 0,
            otp_confirmed: false,
            symmetric_key_received: false,
            public_key_received: false,
            registration_complete: false,
        }
    }

    /// Record a freshly issued code, replacing any previous one.
    pub fn record_otp_issued(&mut self, otp: String, now: DateTime<Utc>) {
        self.otp_sent = true;
        self.otp_sent_at = Some(now);
        self.otp_value = Some(otp);
    }

    /// True once `window` has fully elapsed since the code was issued.
    pub fn otp_expired(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        match self.otp_sent_at {
            Some(sent_at) => now - sent_at >= window,
            None => true,
        }
    }

    /// Set `registration_complete` if and only if every prerequisite holds.
    /// Returns the resulting completion state.
    pub fn try_complete(&mut self) -> bool {
        if self.public_key_received && self.symmetric_key_received && self.otp_confirmed {
            self.registration_complete = true;
        }
        self.registration_complete
    }

    pub fn is_complete(&self) -> bool {
        self.registration_complete
    }
}

impl Row for RegistrationRow {
    fn uid(&self) -> &Uid {
        &self.uid
    }
}

/// Store-and-forward slot for an offline recipient. Reserved: the relay
/// only forwards to live connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessageRow {
    pub uid: Uid,
    pub destination_uid: Uid,
    pub message: Content,
    pub timestamp: DateTime<Utc>,
    pub remaining_attempts: u32,
}

impl Row for PendingMessageRow {
    fn uid(&self) -> &Uid {
        &self.uid
    }
}

/// Returned by [`Table::insert`] when the uid is already present.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("row already exists for uid {0}")]
pub struct AlreadyExists(pub Uid);

/// One uid-keyed table. Every operation is atomic per row.
pub struct Table<R: Row> {
    rows: DashMap<Uid, R>,
}

impl<R: Row> Table<R> {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
        }
    }

    /// Copy of the row for `uid`, if any.
    pub fn find_by_uid(&self, uid: &Uid) -> Option<R> {
        self.rows.get(uid).map(|row| row.value().clone())
    }

    /// Insert a row unless its uid is already present.
    pub fn insert(&self, row: R) -> Result<(), AlreadyExists> {
        match self.rows.entry(row.uid().clone()) {
            Entry::Occupied(occupied) => Err(AlreadyExists(occupied.key().clone())),
            Entry::Vacant(vacant) => {
                vacant.insert(row);
                Ok(())
            }
        }
    }

    /// Replace the row with the same uid. No-op (returns false) if absent.
    pub fn update(&self, row: R) -> bool {
        match self.rows.get_mut(row.uid()) {
            Some(mut existing) => {
                *existing = row;
                true
            }
            None => false,
        }
    }

    /// Mutate the row for `uid` in place, returning the closure's result.
    pub fn modify<T>(&self, uid: &Uid, f: impl FnOnce(&mut R) -> T) -> Option<T> {
        self.rows.get_mut(uid).map(|mut row| f(row.value_mut()))
    }

    pub fn remove(&self, uid: &Uid) -> Option<R> {
        self.rows.remove(uid).map(|(_, row)| row)
    }

    pub fn contains(&self, uid: &Uid) -> bool {
        self.rows.contains_key(uid)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl<R: Row> Default for Table<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// The relay's three tables.
#[derive(Default)]
pub struct SessionStore {
    pub user_keys: Table<UserKeyRow>,
    pub registrations: Table<RegistrationRow>,
    pub pending_messages: Table<PendingMessageRow>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the key row and the registration row for `uid` as one step.
    ///
    /// The registration-table entry stays locked while the key row is
    /// inserted, so two concurrent registrations of the same uid cannot both
    /// succeed and no reader sees a registration row without its key row.
    pub fn register(&self, uid: &Uid, public_key: String) -> Result<(), RelayError> {
        let duplicate = || RelayError::DuplicateRegistration {
            uid: uid.to_string(),
        };

        match self.registrations.rows.entry(uid.clone()) {
            Entry::Occupied(_) => Err(duplicate()),
            Entry::Vacant(vacant) => {
                self.user_keys
                    .insert(UserKeyRow::new(uid.clone(), public_key))
                    .map_err(|_| duplicate())?;

                let mut row = RegistrationRow::new(uid.clone());
                row.public_key_received = true;
                vacant.insert(row);
                Ok(())
            }
        }
    }

    /// Drop both rows of an unfinished registration so the uid can start over.
    ///
    /// Completed registrations are left alone. Returns true if rows were removed.
    pub fn abandon(&self, uid: &Uid) -> bool {
        match self.registrations.rows.entry(uid.clone()) {
            Entry::Occupied(occupied) if !occupied.get().is_complete() => {
                self.user_keys.remove(uid);
                occupied.remove();
                true
            }
            _ => false,
        }
    }

    /// True if `uid` has finished the handshake.
    pub fn is_registered(&self, uid: &Uid) -> bool {
        self.registrations
            .find_by_uid(uid)
            .is_some_and(|row| row.is_complete())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(s: &str) -> Uid {
        Uid::parse(s).unwrap()
    }

    #[test]
    fn insert_then_find_returns_copy() {
        let table: Table<UserKeyRow> = Table::new();
        table.insert(UserKeyRow::new(uid("555"), "pk".into())).unwrap();

        let mut copy = table.find_by_uid(&uid("555")).unwrap();
        copy.public_key = "changed".into();

        assert_eq!(table.find_by_uid(&uid("555")).unwrap().public_key, "pk");
    }

    #[test]
    fn insert_duplicate_returns_already_exists() {
        let table: Table<UserKeyRow> = Table::new();
        table.insert(UserKeyRow::new(uid("555"), "a".into())).unwrap();
        let result = table.insert(UserKeyRow::new(uid("555"), "b".into()));
        assert_eq!(result, Err(AlreadyExists(uid("555"))));
        assert_eq!(table.find_by_uid(&uid("555")).unwrap().public_key, "a");
    }

    #[test]
    fn update_replaces_existing_row() {
        let table: Table<UserKeyRow> = Table::new();
        table.insert(UserKeyRow::new(uid("555"), "pk".into())).unwrap();

        let mut row = table.find_by_uid(&uid("555")).unwrap();
        row.wrapped_symmetric_key = Some("wrapped".into());
        assert!(table.update(row));

        let stored = table.find_by_uid(&uid("555")).unwrap();
        assert_eq!(stored.wrapped_symmetric_key.as_deref(), Some("wrapped"));
    }

    #[test]
    fn update_absent_row_is_noop() {
        let table: Table<UserKeyRow> = Table::new();
        assert!(!table.update(UserKeyRow::new(uid("555"), "pk".into())));
        assert!(table.is_empty());
    }

    #[test]
    fn modify_mutates_in_place() {
        let table: Table<RegistrationRow> = Table::new();
        table.insert(RegistrationRow::new(uid("555"))).unwrap();
        let attempts = table.modify(&uid("555"), |row| {
            row.otp_attempts += 1;
            row.otp_attempts
        });
        assert_eq!(attempts, Some(1));
        assert_eq!(table.modify(&uid("777"), |row| row.otp_attempts), None);
    }

    #[test]
    fn remove_deletes_row() {
        let table: Table<UserKeyRow> = Table::new();
        table.insert(UserKeyRow::new(uid("555"), "pk".into())).unwrap();
        assert!(table.remove(&uid("555")).is_some());
        assert!(!table.contains(&uid("555")));
        assert!(table.remove(&uid("555")).is_none());
    }

    #[test]
    fn register_creates_both_rows() {
        let store = SessionStore::new();
        store.register(&uid("555"), "pk".into()).unwrap();

        let keys = store.user_keys.find_by_uid(&uid("555")).unwrap();
        assert_eq!(keys.public_key, "pk");
        assert!(keys.wrapped_symmetric_key.is_none());

        let reg = store.registrations.find_by_uid(&uid("555")).unwrap();
        assert!(reg.public_key_received);
        assert!(!reg.otp_sent);
        assert!(!reg.is_complete());
    }

    #[test]
    fn register_twice_is_duplicate_and_keeps_first_rows() {
        let store = SessionStore::new();
        store.register(&uid("555"), "first".into()).unwrap();
        let result = store.register(&uid("555"), "second".into());
        assert!(matches!(result, Err(RelayError::DuplicateRegistration { .. })));
        assert_eq!(
            store.user_keys.find_by_uid(&uid("555")).unwrap().public_key,
            "first"
        );
        assert_eq!(store.user_keys.len(), 1);
        assert_eq!(store.registrations.len(), 1);
    }

    #[test]
    fn concurrent_registration_of_same_uid_succeeds_once() {
        let store = SessionStore::new();
        let successes = std::sync::atomic::AtomicUsize::new(0);
        std::thread::scope(|s| {
            for i in 0..16 {
                let store = &store;
                let successes = &successes;
                s.spawn(move || {
                    if store.register(&uid("555"), format!("pk-{i}")).is_ok() {
                        successes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                });
            }
        });
        assert_eq!(successes.into_inner(), 1);
        assert_eq!(store.user_keys.len(), 1);
    }

    #[test]
    fn try_complete_requires_all_flags() {
        let mut row = RegistrationRow::new(uid("555"));
        assert!(!row.try_complete());
        row.public_key_received = true;
        assert!(!row.try_complete());
        row.otp_confirmed = true;
        assert!(!row.try_complete());
        row.symmetric_key_received = true;
        assert!(row.try_complete());
        assert!(row.is_complete());
    }

    #[test]
    fn otp_expiry_is_inclusive_of_window() {
        let mut row = RegistrationRow::new(uid("555"));
        let issued = Utc::now();
        row.record_otp_issued("123456".into(), issued);
        let window = chrono::Duration::seconds(10);

        assert!(!row.otp_expired(issued + chrono::Duration::seconds(9), window));
        assert!(row.otp_expired(issued + chrono::Duration::seconds(10), window));
        assert!(row.otp_expired(issued + chrono::Duration::seconds(11), window));
    }

    #[test]
    fn otp_never_issued_counts_as_expired() {
        let row = RegistrationRow::new(uid("555"));
        assert!(row.otp_expired(Utc::now(), chrono::Duration::seconds(10)));
    }

    #[test]
    fn reissuing_otp_keeps_attempt_count() {
        let mut row = RegistrationRow::new(uid("555"));
        row.record_otp_issued("111111".into(), Utc::now());
        row.otp_attempts = 2;
        row.record_otp_issued("222222".into(), Utc::now());
        assert_eq!(row.otp_attempts, 2);
        assert_eq!(row.otp_value.as_deref(), Some("222222"));
    }

    #[test]
    fn abandon_removes_unfinished_registration() {
        let store = SessionStore::new();
        store.register(&uid("555"), "pk".into()).unwrap();

        assert!(store.abandon(&uid("555")));
        assert!(!store.registrations.contains(&uid("555")));
        assert!(!store.user_keys.contains(&uid("555")));
        store.register(&uid("555"), "pk2".into()).unwrap();
    }

    #[test]
    fn abandon_keeps_completed_registration() {
        let store = SessionStore::new();
        store.register(&uid("555"), "pk".into()).unwrap();
        store.registrations.modify(&uid("555"), |row| {
            row.otp_confirmed = true;
            row.symmetric_key_received = true;
            row.try_complete();
        });

        assert!(!store.abandon(&uid("555")));
        assert!(!store.abandon(&uid("999")));
        assert!(store.is_registered(&uid("555")));
        assert!(store.user_keys.contains(&uid("555")));
    }

    #[test]
    fn pending_message_table_supports_store_operations() {
        let store = SessionStore::new();
        let row = PendingMessageRow {
            uid: uid("555"),
            destination_uid: uid("777"),
            message: Content {
                uid: uid("555"),
                destination_uid: uid("777"),
                content: "c".into(),
                mac: "m".into(),
                signature: "s".into(),
            },
            timestamp: Utc::now(),
            remaining_attempts: 3,
        };
        store.pending_messages.insert(row.clone()).unwrap();
        assert_eq!(store.pending_messages.find_by_uid(&uid("555")), Some(row));
        assert!(store.pending_messages.remove(&uid("555")).is_some());
    }

    #[test]
    fn is_registered_reflects_completion() {
        let store = SessionStore::new();
        assert!(!store.is_registered(&uid("555")));
        store.register(&uid("555"), "pk".into()).unwrap();
        assert!(!store.is_registered(&uid("555")));
        store.registrations.modify(&uid("555"), |row| {
            row.otp_confirmed = true;
            row.symmetric_key_received = true;
            row.try_complete();
        });
        assert!(store.is_registered(&uid("555")));
    }
}
